//! In-memory store backed by an ordered map
//!
//! Transactions buffer their writes in an overlay and apply them under the
//! store's write lock on commit. Reads inside a transaction see the overlay
//! on top of the latest committed state (read-committed isolation).
//! Observers are notified while the write lock is held, which fixes the
//! delivery order to the commit order.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ontograph_core::{Disconnect, Handler, Observer, Result, Variant};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::overlay::{self, Rows, Writes};
use crate::{KvChange, KvPair, Store, Transaction, Tx};

struct Shared {
    rows: RwLock<Rows>,
    observer: Observer<Vec<KvChange>>,
}

impl Shared {
    /// Apply writes to `rows`, returning the changes that altered state
    fn apply(rows: &mut Rows, writes: Writes) -> Vec<KvChange> {
        let mut changes = Vec::with_capacity(writes.len());
        for (key, write) in writes {
            match write {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                    changes.push(KvChange {
                        variant: Variant::Set,
                        key,
                        value,
                    });
                }
                None => {
                    if rows.remove(&key).is_some() {
                        changes.push(KvChange {
                            variant: Variant::Delete,
                            key,
                            value: Vec::new(),
                        });
                    }
                }
            }
        }
        changes
    }

    async fn commit(&self, writes: Writes) {
        let mut rows = self.rows.write().await;
        let changes = Self::apply(&mut rows, writes);
        if !changes.is_empty() {
            self.observer.notify(&changes);
        }
        drop(rows);
    }
}

fn scan(rows: &Rows, prefix: &[u8]) -> Rows {
    rows.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// In-memory ordered key-value store
#[derive(Clone)]
pub struct MemStore {
    shared: Arc<Shared>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                rows: RwLock::new(BTreeMap::new()),
                observer: Observer::new(),
            }),
        }
    }

    /// Open a transaction without boxing it
    pub fn begin_tx(&self) -> MemTx {
        MemTx {
            shared: Arc::clone(&self.shared),
            writes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of committed rows
    pub async fn len(&self) -> usize {
        self.shared.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Tx for MemStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.shared.rows.read().await.get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut writes = BTreeMap::new();
        writes.insert(key.to_vec(), Some(value.to_vec()));
        self.shared.commit(writes).await;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut writes = BTreeMap::new();
        writes.insert(key.to_vec(), None);
        self.shared.commit(writes).await;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let rows = self.shared.rows.read().await;
        Ok(overlay::into_pairs(scan(&rows, prefix)))
    }
}

impl Store for MemStore {
    fn begin(&self) -> Box<dyn Transaction> {
        Box::new(self.begin_tx())
    }

    fn tx(&self) -> &dyn Tx {
        self
    }

    fn observe(&self, prefix: &[u8], handler: Handler<Vec<KvChange>>) -> Disconnect {
        let prefix = prefix.to_vec();
        self.shared.observer.on_change(move |changes: &Vec<KvChange>| {
            let matching: Vec<KvChange> = changes
                .iter()
                .filter(|c| c.key.starts_with(&prefix))
                .cloned()
                .collect();
            if !matching.is_empty() {
                handler(&matching);
            }
        })
    }
}

/// A transaction over a [`MemStore`]
pub struct MemTx {
    shared: Arc<Shared>,
    writes: Mutex<Writes>,
}

impl MemTx {
    /// Number of buffered writes
    pub async fn pending(&self) -> usize {
        self.writes.lock().await.len()
    }
}

#[async_trait]
impl Tx for MemTx {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(write) = self.writes.lock().await.get(key) {
            return Ok(write.clone());
        }
        Ok(self.shared.rows.read().await.get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .await
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.writes.lock().await.insert(key.to_vec(), None);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let committed = scan(&*self.shared.rows.read().await, prefix);
        let writes = self.writes.lock().await;
        Ok(overlay::merge(committed, &writes, prefix))
    }
}

#[async_trait]
impl Transaction for MemTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemTx { shared, writes } = *self;
        let writes = writes.into_inner();
        tracing::trace!(writes = writes.len(), "committing transaction");
        shared.commit(writes).await;
        Ok(())
    }

    fn as_tx(&self) -> &dyn Tx {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_direct_set_get_delete() {
        let store = MemStore::new();
        store.set(b"a", b"1").await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap(), None);
        // Missing keys delete cleanly
        store.delete(b"missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_prefix_in_key_order() {
        let store = MemStore::new();
        for key in ["p/c", "p/a", "q/a", "p/b"] {
            store.set(key.as_bytes(), b"").await.unwrap();
        }
        let keys: Vec<Vec<u8>> = store
            .scan_prefix(b"p/")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![b"p/a".to_vec(), b"p/b".to_vec(), b"p/c".to_vec()]);
    }

    #[tokio::test]
    async fn test_transaction_isolation_and_commit() {
        let store = MemStore::new();
        store.set(b"k/1", b"old").await.unwrap();

        let tx = store.begin();
        tx.set(b"k/2", b"new").await.unwrap();
        tx.delete(b"k/1").await.unwrap();

        // The transaction sees its own writes
        let in_tx = tx.scan_prefix(b"k/").await.unwrap();
        assert_eq!(in_tx.len(), 1);
        assert_eq!(in_tx[0].key, b"k/2".to_vec());

        // The store does not until commit
        assert!(store.get(b"k/2").await.unwrap().is_none());
        assert!(store.get(b"k/1").await.unwrap().is_some());

        tx.commit().await.unwrap();
        assert!(store.get(b"k/1").await.unwrap().is_none());
        assert_eq!(store.get(b"k/2").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemStore::new();
        {
            let tx = store.begin_tx();
            tx.set(b"x", b"y").await.unwrap();
            assert_eq!(tx.pending().await, 1);
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_observe_filters_by_prefix_in_commit_order() {
        let store = MemStore::new();
        let seen: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let d = store.observe(
            b"rel/",
            Arc::new(move |changes: &Vec<KvChange>| {
                s.lock()
                    .unwrap()
                    .extend(changes.iter().map(|c| c.key.clone()));
            }),
        );

        let tx = store.begin();
        tx.set(b"rel/1", b"").await.unwrap();
        tx.set(b"res/1", b"").await.unwrap();
        tx.commit().await.unwrap();
        store.set(b"rel/2", b"").await.unwrap();
        // Deleting a missing key produces no change
        store.delete(b"rel/missing").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![b"rel/1".to_vec(), b"rel/2".to_vec()]
        );

        d.disconnect();
        store.set(b"rel/3", b"").await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}

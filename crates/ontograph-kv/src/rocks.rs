//! RocksDB-backed store
//!
//! Rows live in the default column family under the same keys the in-memory
//! store uses. Transactions buffer their writes and commit them as one
//! `WriteBatch`. Commits are serialized by a lock that is also held while
//! observers run, so delivery follows commit order.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ontograph_core::{Disconnect, Handler, Observer, OntologyError, Result, Variant};
use parking_lot::Mutex;
use rocksdb::{Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, trace};

use crate::overlay::{self, Rows, Writes};
use crate::{KvChange, KvPair, Store, Transaction, Tx};

fn storage_error(e: rocksdb::Error) -> OntologyError {
    OntologyError::Storage(e.to_string())
}

struct Shared {
    db: DB,
    commit: Mutex<()>,
    observer: Observer<Vec<KvChange>>,
}

impl Shared {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get(key).map_err(storage_error)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Rows> {
        let mut rows = Rows::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item.map_err(storage_error)?;
            // No prefix extractor is configured, so the iterator runs past
            // the prefix
            if !key.starts_with(prefix) {
                break;
            }
            rows.insert(key.into_vec(), value.into_vec());
        }
        Ok(rows)
    }

    /// Write `writes` atomically and notify observers of what changed
    fn commit(&self, writes: Writes) -> Result<()> {
        let _guard = self.commit.lock();
        let mut batch = WriteBatch::default();
        let mut changes = Vec::with_capacity(writes.len());
        for (key, write) in writes {
            match write {
                Some(value) => {
                    batch.put(&key, &value);
                    changes.push(KvChange {
                        variant: Variant::Set,
                        key,
                        value,
                    });
                }
                None => {
                    if self.get(&key)?.is_some() {
                        batch.delete(&key);
                        changes.push(KvChange {
                            variant: Variant::Delete,
                            key,
                            value: Vec::new(),
                        });
                    }
                }
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.db.write(batch).map_err(storage_error)?;
        trace!(changes = changes.len(), "committed rocksdb batch");
        self.observer.notify(&changes);
        Ok(())
    }
}

/// Persistent ordered key-value store on RocksDB
#[derive(Clone)]
pub struct RocksStore {
    shared: Arc<Shared>,
}

impl RocksStore {
    /// Open the database at `path`, creating it if missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).map_err(storage_error)?;
        info!(path = %path.display(), "opened rocksdb store");
        Ok(Self {
            shared: Arc::new(Shared {
                db,
                commit: Mutex::new(()),
                observer: Observer::new(),
            }),
        })
    }

    /// Open a transaction without boxing it
    pub fn begin_tx(&self) -> RocksTx {
        RocksTx {
            shared: Arc::clone(&self.shared),
            writes: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Tx for RocksStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.shared.get(key)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut writes = Writes::new();
        writes.insert(key.to_vec(), Some(value.to_vec()));
        self.shared.commit(writes)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut writes = Writes::new();
        writes.insert(key.to_vec(), None);
        self.shared.commit(writes)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        Ok(overlay::into_pairs(self.shared.scan(prefix)?))
    }

    async fn set_many(&self, pairs: &[KvPair]) -> Result<()> {
        let writes = pairs
            .iter()
            .map(|pair| (pair.key.clone(), Some(pair.value.clone())))
            .collect();
        self.shared.commit(writes)
    }

    async fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        let writes = keys.iter().map(|key| (key.clone(), None)).collect();
        self.shared.commit(writes)
    }
}

impl Store for RocksStore {
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

/// A transaction over a [`RocksStore`]. Reads see the buffered writes on
/// top of the latest committed state.
pub struct RocksTx {
    shared: Arc<Shared>,
    writes: Mutex<Writes>,
}

#[async_trait]
impl Tx for RocksTx {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(write) = self.writes.lock().get(key) {
            return Ok(write.clone());
        }
        self.shared.get(key)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.writes.lock().insert(key.to_vec(), None);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let committed = self.shared.scan(prefix)?;
        Ok(overlay::merge(committed, &self.writes.lock(), prefix))
    }
}

#[async_trait]
impl Transaction for RocksTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let RocksTx { shared, writes } = *self;
        shared.commit(writes.into_inner())
    }

    fn as_tx(&self) -> &dyn Tx {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn keys(pairs: Vec<KvPair>) -> Vec<Vec<u8>> {
        pairs.into_iter().map(|p| p.key).collect()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.set(b"a", b"1").await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").await.unwrap();
        assert!(!store.exists(b"a").await.unwrap());
        store.delete(b"missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_prefix_stops_at_prefix_end() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        for key in ["p/c", "p/a", "q/a", "p/b", "o/z"] {
            store.set(key.as_bytes(), b"").await.unwrap();
        }
        assert_eq!(
            keys(store.scan_prefix(b"p/").await.unwrap()),
            vec![b"p/a".to_vec(), b"p/b".to_vec(), b"p/c".to_vec()]
        );
        assert_eq!(store.scan_prefix(b"").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_transaction_overlay_and_commit() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.set(b"k/1", b"old").await.unwrap();

        let tx = store.begin();
        tx.set(b"k/2", b"new").await.unwrap();
        tx.delete(b"k/1").await.unwrap();
        assert_eq!(keys(tx.scan_prefix(b"k/").await.unwrap()), vec![b"k/2".to_vec()]);
        assert!(store.get(b"k/2").await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get(b"k/1").await.unwrap().is_none());
        assert_eq!(store.get(b"k/2").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            let tx = store.begin();
            tx.set(b"r/1", b"x").await.unwrap();
            tx.commit().await.unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"r/1").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_observe_reports_real_changes_only() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let seen: Arc<StdMutex<Vec<(Variant, Vec<u8>)>>> = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let d = store.observe(
            b"rel/",
            Arc::new(move |changes: &Vec<KvChange>| {
                s.lock()
                    .unwrap()
                    .extend(changes.iter().map(|c| (c.variant, c.key.clone())));
            }),
        );

        store.set(b"rel/1", b"").await.unwrap();
        store.set(b"res/1", b"").await.unwrap();
        store
            .delete_many(&[b"rel/1".to_vec(), b"rel/missing".to_vec()])
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Variant::Set, b"rel/1".to_vec()),
                (Variant::Delete, b"rel/1".to_vec())
            ]
        );

        d.disconnect();
        store.set(b"rel/2", b"").await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}

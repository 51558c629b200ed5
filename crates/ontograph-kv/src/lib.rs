//! Ontograph KV - Transactional key-value store abstraction
//!
//! The ontology persists resources and relationships as rows in an ordered
//! key-value store. This crate defines the contract it needs (point reads
//! and writes, prefix range scans, transactions, and per-prefix change
//! notification) and ships two implementations: an in-memory store and a
//! persistent RocksDB store.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ontograph_core::{Disconnect, Handler, Result, Variant};

pub mod memory;
mod overlay;
pub mod rocks;

pub use memory::{MemStore, MemTx};
pub use rocks::{RocksStore, RocksTx};

/// A key/value row returned from a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A committed mutation of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub variant: Variant,
    pub key: Vec<u8>,
    /// Empty for deletes
    pub value: Vec<u8>,
}

/// Read/write access to the store, either directly or inside a transaction
#[async_trait]
pub trait Tx: Send + Sync {
    /// Get the value stored at a key
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set a key
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key. Deleting a missing key succeeds.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// All rows whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>>;

    /// Check whether a key exists
    async fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Set several keys
    async fn set_many(&self, pairs: &[KvPair]) -> Result<()> {
        for pair in pairs {
            self.set(&pair.key, &pair.value).await?;
        }
        Ok(())
    }

    /// Delete several keys
    async fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// A pending set of writes applied atomically on commit. Dropping an
/// uncommitted transaction discards it.
#[async_trait]
pub trait Transaction: Tx {
    /// Apply all writes and notify observers
    async fn commit(self: Box<Self>) -> Result<()>;

    /// View this transaction as a plain [`Tx`]
    fn as_tx(&self) -> &dyn Tx;
}

/// The backing store shared by every writer and query
pub trait Store: Send + Sync {
    /// Open a new transaction
    fn begin(&self) -> Box<dyn Transaction>;

    /// Auto-committing access: every write is its own transaction
    fn tx(&self) -> &dyn Tx;

    /// Subscribe to committed changes under `prefix`. Batches arrive in
    /// commit order and are never empty.
    fn observe(&self, prefix: &[u8], handler: Handler<Vec<KvChange>>) -> Disconnect;
}

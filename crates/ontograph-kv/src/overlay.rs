//! Buffered transaction writes layered over committed rows

use std::collections::BTreeMap;

use crate::KvPair;

/// Committed rows in key order
pub(crate) type Rows = BTreeMap<Vec<u8>, Vec<u8>>;

/// Pending writes of a transaction; `None` marks a delete
pub(crate) type Writes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Apply the writes under `prefix` on top of the committed `rows`
pub(crate) fn merge(mut rows: Rows, writes: &Writes, prefix: &[u8]) -> Vec<KvPair> {
    for (key, write) in writes.range(prefix.to_vec()..) {
        if !key.starts_with(prefix) {
            break;
        }
        match write {
            Some(value) => {
                rows.insert(key.clone(), value.clone());
            }
            None => {
                rows.remove(key);
            }
        }
    }
    into_pairs(rows)
}

pub(crate) fn into_pairs(rows: Rows) -> Vec<KvPair> {
    rows.into_iter()
        .map(|(key, value)| KvPair { key, value })
        .collect()
}

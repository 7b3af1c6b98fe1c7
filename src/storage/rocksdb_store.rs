//! RocksDB-backed implementation of the [`KeyValueStore`] trait.
//!
//! A thin adapter: key construction and record encoding live in the typed
//! chain store, so this module only maps byte-level operations onto the
//! RocksDB handle. Batches translate directly to RocksDB write batches,
//! which are atomic.

use crate::storage::kv::{BatchOp, KeyValueStore, StoreError, WriteBatch};
use crate::info;
use rocksdb::{Options, DB};
use std::path::Path;

/// Persistent key-value store backed by a RocksDB database.
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    /// Opens (or creates) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        info!("opened chain database at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .delete(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => inner.put(key, value),
                BatchOp::Delete { key } => inner.delete(key),
            }
        }
        self.db
            .write(inner)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_db_path() -> std::path::PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "chaincore-rocksdb-test-{}-{}",
            std::process::id(),
            seq
        ))
    }

    #[test]
    fn roundtrip_and_batch() {
        let path = temp_db_path();
        {
            let store = RocksDbStore::open(&path).unwrap();

            store.put(b"k", b"v").unwrap();
            assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));

            let mut batch = WriteBatch::new();
            batch.put(b"a".to_vec(), b"1".to_vec());
            batch.delete(b"k".to_vec());
            store.write(batch).unwrap();

            assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(store.get(b"k").unwrap(), None);
        }
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn reopen_preserves_data() {
        let path = temp_db_path();
        {
            let store = RocksDbStore::open(&path).unwrap();
            store.put(b"durable", b"yes").unwrap();
        }
        {
            let store = RocksDbStore::open(&path).unwrap();
            assert_eq!(store.get(b"durable").unwrap(), Some(b"yes".to_vec()));
        }
        let _ = std::fs::remove_dir_all(&path);
    }
}

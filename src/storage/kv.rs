//! Byte-keyed storage abstraction.
//!
//! Defines the [`KeyValueStore`] trait the chain persists through, the
//! atomic [`WriteBatch`] it groups related writes with, and the in-memory
//! reference backend. Durability is best-effort per write; only batch
//! application is atomic.

use chaincore_derive::Error;
use std::collections::HashMap;
use std::sync::Mutex;

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying store failed to serve the request.
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// A persisted record failed to decode.
    #[error("corrupt record under {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// A single operation inside a [`WriteBatch`].
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered group of writes applied atomically.
///
/// Backends must guarantee that either every operation in the batch becomes
/// visible or none do; callers rely on this for multi-record invariants
/// such as "header + body + total difficulty + canonical pointer".
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queues a key/value insertion.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queues a key deletion.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Returns the queued operations in insertion order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no operations are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Byte-keyed storage backend.
///
/// Implementations must be thread-safe (`Send + Sync`); the chain reads
/// from many threads while a single writer applies batches.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes the value stored under `key`, if any.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Returns `true` if a value is stored under `key`.
    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Applies every operation in `batch` atomically.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// In-memory store for development and tests.
///
/// A mutex-guarded hash map; batch application holds the lock for the
/// whole batch, which provides the atomicity the trait demands.
pub struct MemoryStore {
    inner: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().contains_key(key))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    inner.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    inner.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();

        assert_eq!(store.get(b"k").unwrap(), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.has(b"k").unwrap());

        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        assert!(!store.has(b"k").unwrap());
    }

    #[test]
    fn put_overwrites() {
        let store = MemoryStore::new();
        store.put(b"k", b"old").unwrap();
        store.put(b"k", b"new").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        store.put(b"stale", b"x").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"a".to_vec(), b"2".to_vec());
        batch.delete(b"stale".to_vec());
        assert_eq!(batch.len(), 3);

        store.write(batch).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"stale").unwrap(), None);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let store = MemoryStore::new();
        store.write(WriteBatch::new()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let store = Arc::new(MemoryStore::new());

        let writers: Vec<_> = (0..4u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.put(&[i], &[i]).unwrap();
                    assert_eq!(store.get(&[i]).unwrap(), Some(vec![i]));
                })
            })
            .collect();

        for handle in writers {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 4);
    }
}

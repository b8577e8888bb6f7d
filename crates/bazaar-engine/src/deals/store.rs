//! Key-value port behind the deal repository.
//!
//! Production runs on RocksDB; tests use the in-process map. Both adapters
//! guarantee `put_if_absent` is atomic, which is what the memo uniqueness
//! index rides on. Conditional status transitions are serialized one level
//! up, in the repository's striped locks.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Insert only when the key is vacant; returns `false` if it exists.
    /// Must be atomic with respect to concurrent `put_if_absent` calls.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError>;
}

/// In-memory adapter for unit tests and `use_memory_store` development runs.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError> {
        let mut data = self.data.write();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }
}

/// RocksDB adapter. The `insert_guard` makes the check-then-put in
/// `put_if_absent` atomic within this process; the engine is the only
/// writer of its data directory.
pub struct RocksDbStore {
    db: rocksdb::DB,
    insert_guard: Mutex<()>,
}

impl RocksDbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut options = rocksdb::Options::default();
        options.create_if_missing(true);
        let db = rocksdb::DB::open(&options, path)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            db,
            insert_guard: Mutex::new(()),
        })
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

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError> {
        let _guard = self.insert_guard.lock();
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        self.put(key, value)?;
        Ok(true)
    }
}

//! Transactional key/value storage behind the wallet database.
//!
//! A [`KvStore`] is a flat byte-keyed map with atomic multi-record
//! batches; [`SledKv`] is the production backend. Single-record writes
//! auto-commit; multi-record operations build a [`KvBatch`] and apply it
//! in one step. `flush` is the durability checkpoint.

use std::path::Path;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum KvError {
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// An ordered set of writes applied atomically.
#[derive(Default)]
pub struct KvBatch {
    pub(crate) ops: Vec<KvOp>,
}

pub(crate) enum KvOp {
    Put(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
}

impl KvBatch {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(KvOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(KvOp::Del(key));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Trait for the wallet's storage backend.
pub trait KvStore: Send {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn erase(&self, key: &[u8]) -> Result<(), KvError>;
    fn exists(&self, key: &[u8]) -> Result<bool, KvError>;
    /// Every record in the store, in key order.
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
    /// Apply a batch of writes atomically.
    fn apply(&self, batch: KvBatch) -> Result<(), KvError>;
    /// Block until previous writes are durable.
    fn flush(&self) -> Result<(), KvError>;
}

/// Sled-backed storage.
pub struct SledKv {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledKv {
    /// Open or create the wallet database at the given path.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let db = sled::open(path).map_err(|e| KvError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary in-memory database (for testing).
    pub fn open_temporary() -> Result<Self, KvError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| KvError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, KvError> {
        let tree = db
            .open_tree("wallet")
            .map_err(|e| KvError::Io(e.to_string()))?;
        Ok(SledKv { db, tree })
    }
}

impl KvStore for SledKv {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.tree
            .insert(key, value)
            .map_err(|e| KvError::Io(e.to_string()))?;
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self
            .tree
            .get(key)
            .map_err(|e| KvError::Io(e.to_string()))?
            .map(|v| v.to_vec()))
    }

    fn erase(&self, key: &[u8]) -> Result<(), KvError> {
        self.tree
            .remove(key)
            .map_err(|e| KvError::Io(e.to_string()))?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvError> {
        self.tree
            .contains_key(key)
            .map_err(|e| KvError::Io(e.to_string()))
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (k, v) = entry.map_err(|e| KvError::Io(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn apply(&self, batch: KvBatch) -> Result<(), KvError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                KvOp::Put(k, v) => sled_batch.insert(k, v),
                KvOp::Del(k) => sled_batch.remove(k),
            }
        }
        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| KvError::Io(e.to_string()))
    }

    fn flush(&self) -> Result<(), KvError> {
        self.db.flush().map_err(|e| KvError::Io(e.to_string()))?;
        Ok(())
    }
}

impl Drop for SledKv {
    fn drop(&mut self) {
        // last-handle checkpoint; failures here have no recovery path
        let _ = self.db.flush();
    }
}

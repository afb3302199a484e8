//! sled wrapper with JSON serialization helpers.

use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid stored value under {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One operation inside an atomic batch.
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Wrapper around a sled tree with JSON value encoding.
pub struct Store {
    db: Db,
}

impl Store {
    /// Open (or create) a database rooted at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database for tests.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a value as JSON.
    pub fn put_json<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = serde_json::to_vec(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Retrieve and decode a JSON value.
    pub fn get_json<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store raw bytes.
    pub fn put_raw<K: AsRef<[u8]>>(&self, key: K, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Retrieve raw bytes.
    pub fn get_raw<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    /// Retrieve a stored value as a UTF-8 string.
    pub fn get_string<K: AsRef<[u8]> + std::fmt::Debug>(&self, key: K) -> Result<Option<String>> {
        match self.db.get(&key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StorageError::InvalidValue(format!("{:?}", key))),
            None => Ok(None),
        }
    }

    /// Delete a key.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    /// Whether a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Apply several operations in one atomic write.
    ///
    /// Atomicity comes from sled's `apply_batch`, which commits all
    /// operations through the write-ahead log or none at all.
    pub fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key, value),
                BatchOp::Delete { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Iterate all keys under a prefix, yielding `(key, value)` pairs.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (key, value) = entry?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key construction
    // =========================================================================

    pub fn block_key(hash: &str) -> Vec<u8> {
        format!("b:{}", hash).into_bytes()
    }

    pub fn block_height_key(height: u64) -> Vec<u8> {
        format!("bh:{}", height).into_bytes()
    }

    pub fn tx_key(id: &str) -> Vec<u8> {
        format!("tx:{}", id).into_bytes()
    }

    pub fn tx_block_key(id: &str) -> Vec<u8> {
        format!("txb:{}", id).into_bytes()
    }

    pub fn address_tx_key(address: &str, id: &str) -> Vec<u8> {
        format!("atx:{}:{}", address, id).into_bytes()
    }

    pub fn contract_key(id: &str) -> Vec<u8> {
        format!("c:{}", id).into_bytes()
    }

    pub fn address_contract_key(address: &str, id: &str) -> Vec<u8> {
        format!("ac:{}:{}", address, id).into_bytes()
    }

    pub fn balance_key(address: &str) -> Vec<u8> {
        format!("bal:{}", address).into_bytes()
    }

    pub const HEIGHT_KEY: &'static [u8] = b"height";
    pub const MEMPOOL_KEY: &'static [u8] = b"mempool";
}

//! sled database wrapper with serialization helpers.

use slotchain_core::Hash;
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Header {hash} does not extend the stored head {head}")]
    NotExtendingHead { hash: Hash, head: Hash },

    #[error("Coin view unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Wrapper around sled database with serialization helpers.
///
/// Cloning is cheap; clones share the same database.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Retrieve a value, returning error if not found.
    pub fn get_or_err<K, V>(&self, key: K) -> Result<V>
    where
        K: AsRef<[u8]> + std::fmt::Debug + Clone,
        V: serde::de::DeserializeOwned,
    {
        self.get(key.clone())?
            .ok_or_else(|| StorageError::NotFound(format!("{:?}", key)))
    }

    /// Check if a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Iterate raw key/value pairs under a prefix, in key order.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(sled::IVec, sled::IVec)>> + '_ {
        self.db
            .scan_prefix(prefix)
            .map(|item| item.map_err(StorageError::Database))
    }

    /// Apply multiple operations atomically.
    ///
    /// The batch is collected in memory and written with sled's
    /// `apply_batch`: either every operation lands or none does.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Key for the unspent outputs of one transaction.
    /// Format: "coins:" + txid_bytes
    pub fn coins_key(txid: &Hash) -> Vec<u8> {
        let mut key = b"coins:".to_vec();
        key.extend_from_slice(&txid.0);
        key
    }

    /// Key for a header by height.
    /// Format: "header:height:" + big-endian height, so scans run in height order.
    pub fn header_height_key(height: u32) -> Vec<u8> {
        let mut key = b"header:height:".to_vec();
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    /// Key for a header by hash.
    /// Format: "header:hash:" + hash_bytes
    pub fn header_hash_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"header:hash:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }

    /// Key marking a block that failed validation.
    /// Format: "header:invalid:" + hash_bytes
    pub fn invalid_block_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"header:invalid:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }
}

/// Batch operation for atomic updates.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    /// Build an insert of a bincode-encoded value.
    pub fn put<V: serde::Serialize>(key: Vec<u8>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }

    pub fn remove(key: Vec<u8>) -> Self {
        BatchOp::Remove { key }
    }
}

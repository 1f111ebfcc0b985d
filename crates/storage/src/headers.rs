//! Header storage and chain head tracking.

use crate::db::{BatchOp, Result, Storage, StorageError};
use serde::{Deserialize, Serialize};
use slotchain_core::{BlockHeader, Hash};

/// Keys for chain metadata.
const CHAIN_HEAD_KEY: &[u8] = b"chain:head";
const CHAIN_HEIGHT_KEY: &[u8] = b"chain:height";

/// A header with the position it was accepted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub header: BlockHeader,
    pub height: u32,
    pub chain_work: u128,
}

/// Manages header storage and the active chain head.
///
/// Every accepted header is stored by hash. The height index and the head
/// only ever describe the active chain and are moved together with the
/// coin view in [`crate::CoinStore::commit`].
#[derive(Clone)]
pub struct HeaderStore {
    storage: Storage,
}

impl HeaderStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Header Storage
    // =========================================================================

    /// Store a header by hash. Does not move the head.
    pub fn put_header(&self, stored: &StoredHeader) -> Result<()> {
        self.storage
            .put(Storage::header_hash_key(&stored.header.hash()), stored)
    }

    pub fn get_header(&self, hash: &Hash) -> Result<Option<StoredHeader>> {
        self.storage.get(Storage::header_hash_key(hash))
    }

    pub fn has_header(&self, hash: &Hash) -> Result<bool> {
        self.storage.contains(Storage::header_hash_key(hash))
    }

    /// Hash of the active-chain header at `height`.
    pub fn get_hash_at(&self, height: u32) -> Result<Option<Hash>> {
        self.storage.get(Storage::header_height_key(height))
    }

    /// Active-chain header at `height`.
    pub fn get_header_at(&self, height: u32) -> Result<Option<StoredHeader>> {
        match self.get_hash_at(height)? {
            Some(hash) => self.get_header(&hash),
            None => Ok(None),
        }
    }

    /// Every stored header, active or not, in no particular order.
    pub fn all_headers(&self) -> Result<Vec<StoredHeader>> {
        self.storage
            .scan_prefix(b"header:hash:")
            .map(|kv| {
                let (_, value) = kv?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    // =========================================================================
    // Rejected Blocks
    // =========================================================================

    /// Remember that the block with `hash` failed validation.
    pub fn mark_invalid(&self, hash: &Hash) -> Result<()> {
        self.storage.put(Storage::invalid_block_key(hash), hash)
    }

    pub fn is_invalid(&self, hash: &Hash) -> Result<bool> {
        self.storage.contains(Storage::invalid_block_key(hash))
    }

    pub fn invalid_hashes(&self) -> Result<Vec<Hash>> {
        self.storage
            .scan_prefix(b"header:invalid:")
            .map(|kv| {
                let (_, value) = kv?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    // =========================================================================
    // Chain Head Tracking
    // =========================================================================

    pub fn get_head(&self) -> Result<Option<Hash>> {
        self.storage.get(CHAIN_HEAD_KEY)
    }

    /// Get the current chain height.
    /// Returns 0 if the chain is not initialized.
    pub fn get_height(&self) -> Result<u32> {
        Ok(self.storage.get::<_, u32>(CHAIN_HEIGHT_KEY)?.unwrap_or(0))
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.get_head()?.is_some())
    }

    /// Operations that make `stored` the new active head.
    ///
    /// Fails unless `stored` is the genesis header of an empty store or
    /// directly extends the current head.
    pub fn advance_ops(&self, stored: &StoredHeader) -> Result<Vec<BatchOp>> {
        let hash = stored.header.hash();
        match self.get_head()? {
            None if stored.height != 0 => {
                return Err(StorageError::InvalidGenesis(format!(
                    "first header must have height 0, got {}",
                    stored.height
                )))
            }
            Some(head) if stored.header.prev_hash != head => {
                return Err(StorageError::NotExtendingHead { hash, head })
            }
            Some(_) if stored.height != self.get_height()? + 1 => {
                return Err(StorageError::InvalidGenesis(format!(
                    "expected height {}, got {}",
                    self.get_height()? + 1,
                    stored.height
                )))
            }
            _ => {}
        }

        Ok(vec![
            BatchOp::put(Storage::header_hash_key(&hash), stored)?,
            BatchOp::put(Storage::header_height_key(stored.height), &hash)?,
            BatchOp::put(CHAIN_HEAD_KEY.to_vec(), &hash)?,
            BatchOp::put(CHAIN_HEIGHT_KEY.to_vec(), &stored.height)?,
        ])
    }
}

//! Persisted coin view.

use crate::cache::CoinChanges;
use crate::coins::{CoinView, Coins};
use crate::db::{BatchOp, Result, Storage};
use slotchain_core::{hash, merkle_root, Hash};
use tracing::debug;

const BEST_BLOCK_KEY: &[u8] = b"coinview:best";
const COINS_PREFIX: &[u8] = b"coins:";

/// The unspent-output set as stored in sled.
#[derive(Clone)]
pub struct CoinStore {
    storage: Storage,
}

impl CoinStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn get_coins(&self, txid: &Hash) -> Result<Option<Coins>> {
        self.storage.get(Storage::coins_key(txid))
    }

    /// Apply overlay changes together with `extra` operations (header and
    /// head updates) in one atomic batch.
    pub fn commit(&self, changes: CoinChanges, extra: Vec<BatchOp>) -> Result<()> {
        let mut ops = Vec::with_capacity(changes.writes.len() + extra.len() + 1);
        for (txid, coins) in &changes.writes {
            let key = Storage::coins_key(txid);
            match coins {
                Some(coins) => ops.push(BatchOp::put(key, coins)?),
                None => ops.push(BatchOp::remove(key)),
            }
        }
        if let Some(best) = changes.best_block {
            ops.push(BatchOp::put(BEST_BLOCK_KEY.to_vec(), &best)?);
        }
        ops.extend(extra);

        debug!(records = changes.writes.len(), "committing coin view");
        self.storage.batch(ops)
    }

    /// Digest of every coin record in key order.
    ///
    /// This is a naive O(n) scan; it exists to compare whole states, not to
    /// be called per block.
    pub fn state_root(&self) -> Result<Hash> {
        let mut leaves = Vec::new();
        for kv in self.storage.scan_prefix(COINS_PREFIX) {
            let (key, value) = kv?;
            leaves.push(hash(&[key.as_ref(), value.as_ref()].concat()));
        }
        Ok(merkle_root(&leaves))
    }

    /// Number of transactions with at least one unspent output.
    pub fn record_count(&self) -> Result<usize> {
        let mut count = 0;
        for kv in self.storage.scan_prefix(COINS_PREFIX) {
            kv?;
            count += 1;
        }
        Ok(count)
    }
}

impl CoinView for CoinStore {
    fn fetch_coins(&self, txid: &Hash) -> Result<Option<Coins>> {
        self.get_coins(txid)
    }

    fn best_block(&self) -> Result<Hash> {
        Ok(self
            .storage
            .get(BEST_BLOCK_KEY)?
            .unwrap_or(Hash::ZERO))
    }
}

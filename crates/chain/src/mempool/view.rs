//! Coin view including unconfirmed outputs.

use super::pool::TxMempool;
use slotchain_core::Hash;
use slotchain_storage::{CoinView, Coins, Result, MEMPOOL_HEIGHT};

/// Layers the outputs of pool transactions over a confirmed view.
///
/// Outputs already spent by other pool transactions stay visible; conflict
/// detection decides what happens to a second spender.
pub struct MempoolCoinView<'a> {
    base: &'a dyn CoinView,
    pool: &'a TxMempool,
}

impl<'a> MempoolCoinView<'a> {
    pub fn new(base: &'a dyn CoinView, pool: &'a TxMempool) -> Self {
        Self { base, pool }
    }
}

impl CoinView for MempoolCoinView<'_> {
    fn fetch_coins(&self, txid: &Hash) -> Result<Option<Coins>> {
        match self.pool.get(txid) {
            Some(entry) => Ok(Some(Coins::from_transaction(&entry.tx, MEMPOOL_HEIGHT))),
            None => self.base.fetch_coins(txid),
        }
    }

    fn best_block(&self) -> Result<Hash> {
        self.base.best_block()
    }
}

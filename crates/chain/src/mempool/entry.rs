//! Mempool entries and their package aggregates.

use super::fees::FeeRate;
use slotchain_consensus::LockPoints;
use slotchain_core::{Amount, Hash, Transaction};

/// A transaction in the pool.
///
/// The `*_with_ancestors` and `*_with_descendants` aggregates include the
/// entry itself and are kept current by the pool as entries come and go.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash,
    /// Inputs minus outputs.
    pub fee: Amount,
    /// Prioritisation applied on top of `fee`.
    pub fee_delta: i64,
    pub vsize: usize,
    /// Local time of admission.
    pub time: u64,
    /// Tip height at admission.
    pub entry_height: u32,
    /// Coin-age priority at `entry_height`.
    pub entry_priority: f64,
    /// Value of confirmed inputs; mempool inputs do not age.
    pub in_chain_input_value: Amount,
    pub spends_coinbase: bool,
    pub sigop_cost: usize,
    pub lock_points: LockPoints,

    pub count_with_ancestors: usize,
    pub size_with_ancestors: usize,
    pub fees_with_ancestors: Amount,
    pub sigops_with_ancestors: usize,

    pub count_with_descendants: usize,
    pub size_with_descendants: usize,
    pub fees_with_descendants: Amount,
}

impl MempoolEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: Transaction,
        fee: Amount,
        time: u64,
        entry_height: u32,
        entry_priority: f64,
        in_chain_input_value: Amount,
        spends_coinbase: bool,
        sigop_cost: usize,
        lock_points: LockPoints,
    ) -> Self {
        let txid = tx.txid();
        let vsize = tx.vsize();
        Self {
            tx,
            txid,
            fee,
            fee_delta: 0,
            vsize,
            time,
            entry_height,
            entry_priority,
            in_chain_input_value,
            spends_coinbase,
            sigop_cost,
            lock_points,
            count_with_ancestors: 1,
            size_with_ancestors: vsize,
            fees_with_ancestors: fee,
            sigops_with_ancestors: sigop_cost,
            count_with_descendants: 1,
            size_with_descendants: vsize,
            fees_with_descendants: fee,
        }
    }

    /// Fee with the prioritisation delta applied, floored at zero.
    pub fn modified_fee(&self) -> Amount {
        apply_delta(self.fee, self.fee_delta)
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee(self.modified_fee(), self.vsize)
    }

    /// Priority once the chain reaches `height`.
    pub fn priority(&self, height: u32) -> f64 {
        let aged = height.saturating_sub(self.entry_height) as f64;
        self.entry_priority + aged * self.in_chain_input_value as f64 / self.vsize.max(1) as f64
    }

    /// Rate of the entry together with everything it depends on; orders
    /// block template selection.
    pub fn ancestor_score(&self) -> FeeRate {
        FeeRate::from_fee(self.fees_with_ancestors, self.size_with_ancestors)
            .min(self.fee_rate())
    }

    /// Rate of the entry together with everything depending on it; the
    /// lowest is evicted first when the pool is over its limit.
    pub fn descendant_score(&self) -> FeeRate {
        FeeRate::from_fee(self.fees_with_descendants, self.size_with_descendants)
            .max(self.fee_rate())
    }
}

pub(crate) fn apply_delta(fee: Amount, delta: i64) -> Amount {
    if delta >= 0 {
        fee.saturating_add(delta as Amount)
    } else {
        fee.saturating_sub(delta.unsigned_abs())
    }
}

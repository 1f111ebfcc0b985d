//! Absolute and relative lock-time evaluation.

use crate::chain::ChainedHeader;
use serde::{Deserialize, Serialize};
use slotchain_core::transaction::{
    SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_GRANULARITY, SEQUENCE_LOCKTIME_MASK,
    SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use slotchain_core::Transaction;

/// Earliest block a transaction's relative lock-times allow it into.
///
/// Both bounds are the last height/median time at which the transaction is
/// still locked; `-1` means unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPoints {
    pub height: i64,
    pub time: i64,
}

impl Default for LockPoints {
    fn default() -> Self {
        Self { height: -1, time: -1 }
    }
}

/// Compute the relative lock-times of `tx` for inclusion in the block
/// following `previous`.
///
/// `prev_heights[i]` is the confirmation height of the coin spent by
/// input `i`; entries of inputs without a relative lock are zeroed.
pub fn calculate_sequence_locks(
    tx: &Transaction,
    enforce: bool,
    prev_heights: &mut [u32],
    previous: &ChainedHeader,
) -> LockPoints {
    let mut locks = LockPoints::default();
    if !enforce || tx.version < 2 {
        return locks;
    }

    for (input, coin_height) in tx.inputs.iter().zip(prev_heights.iter_mut()) {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            *coin_height = 0;
            continue;
        }
        let value = (input.sequence & SEQUENCE_LOCKTIME_MASK) as i64;

        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            // time locks count from the median time of the block before the coin
            let anchor = coin_height.saturating_sub(1);
            let coin_time = previous
                .get_ancestor(anchor.min(previous.height))
                .map(|h| h.median_time_past())
                .unwrap_or(0) as i64;
            locks.time = locks
                .time
                .max(coin_time + (value << SEQUENCE_LOCKTIME_GRANULARITY) - 1);
        } else {
            locks.height = locks.height.max(*coin_height as i64 + value - 1);
        }
    }
    locks
}

/// Whether `locks` are satisfied by the block following `previous`.
pub fn evaluate_sequence_locks(previous: &ChainedHeader, locks: &LockPoints) -> bool {
    let height = previous.height as i64 + 1;
    let median_time = previous.median_time_past() as i64;
    locks.height < height && locks.time < median_time
}

//! Network consensus parameters.

use serde::{Deserialize, Serialize};
use slotchain_core::{Amount, COIN};

/// Weight units per byte of non-witness data.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Consensus parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    pub max_block_weight: usize,
    pub max_block_sigops_cost: usize,
    /// Confirmations before a coinbase output may be spent.
    pub coinbase_maturity: u32,
    pub initial_subsidy: Amount,
    pub subsidy_halving_interval: u32,
    /// The constant `bits` every header must carry under proof of authority.
    pub poa_bits: u32,
    /// Blocks below this version are rejected.
    pub min_block_version: i32,
    /// Height from which coinbases must start with the block height.
    pub bip34_height: u32,
    /// Height from which `OP_CHECKLOCKTIMEVERIFY` is enforced.
    pub cltv_height: u32,
    /// Height from which relative lock-times, median-time-past lock-time
    /// cutoff and `OP_CHECKSEQUENCEVERIFY` are enforced.
    pub csv_height: u32,
    /// How far ahead of local time a header may be.
    pub max_future_block_time: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_block_weight: 4_000_000,
            max_block_sigops_cost: 80_000,
            coinbase_maturity: 100,
            initial_subsidy: 50 * COIN,
            subsidy_halving_interval: 210_000,
            poa_bits: 0x207f_ffff,
            min_block_version: 1,
            bip34_height: 1,
            cltv_height: 1,
            csv_height: 1,
            max_future_block_time: 2 * 60 * 60,
        }
    }
}

impl ConsensusParams {
    /// Parameters with short maturity for tests and local networks.
    pub fn for_testing() -> Self {
        Self {
            coinbase_maturity: 1,
            subsidy_halving_interval: 150,
            ..Self::default()
        }
    }

    /// Block subsidy at `height`, halving every interval.
    pub fn subsidy(&self, height: u32) -> Amount {
        let halvings = height / self.subsidy_halving_interval.max(1);
        if halvings >= 64 {
            return 0;
        }
        self.initial_subsidy >> halvings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsidy_halves() {
        let params = ConsensusParams::default();
        assert_eq!(params.subsidy(0), 50 * COIN);
        assert_eq!(params.subsidy(209_999), 50 * COIN);
        assert_eq!(params.subsidy(210_000), 25 * COIN);
        assert_eq!(params.subsidy(210_000 * 64), 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: ConsensusParams =
            serde_json::from_str(r#"{ "coinbase_maturity": 5 }"#).unwrap();
        assert_eq!(params.coinbase_maturity, 5);
        assert_eq!(params.max_block_weight, 4_000_000);
    }
}

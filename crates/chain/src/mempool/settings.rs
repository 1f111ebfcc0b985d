//! Mempool relay policy.

use super::fees::FeeRate;
use serde::{Deserialize, Serialize};

/// Relay and admission policy for the mempool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSettings {
    // =========================================================================
    // Capacity
    // =========================================================================
    /// Total virtual size the pool may hold before trimming.
    pub max_size_bytes: usize,

    /// Entries older than this are expired.
    pub expiry_seconds: u64,

    // =========================================================================
    // Fees
    // =========================================================================
    /// Fee rate below which transactions are not relayed.
    pub min_relay_fee: FeeRate,

    /// Fee rate added on top of an evicted package when raising the rolling
    /// minimum fee.
    pub incremental_relay_fee: FeeRate,

    /// Seconds for the rolling minimum fee to halve once blocks arrive.
    pub rolling_fee_half_life: u64,

    /// Reject fees above `min_relay_fee` times this factor. `None` disables
    /// the check.
    pub absurd_fee_multiplier: Option<u64>,

    /// Let transactions with enough coin-age priority in below the relay fee.
    pub relay_priority: bool,

    // =========================================================================
    // Package limits
    // =========================================================================
    pub max_ancestors: usize,
    pub max_ancestor_size: usize,
    pub max_descendants: usize,
    pub max_descendant_size: usize,

    // =========================================================================
    // Replacement
    // =========================================================================
    pub enable_replacement: bool,

    /// Most transactions a single replacement may evict.
    pub max_replacement_candidates: usize,

    // =========================================================================
    // Standardness
    // =========================================================================
    pub require_standard: bool,
    pub max_standard_version: i32,
    pub max_standard_tx_weight: usize,
    pub max_standard_sigops_cost: usize,
    pub max_scriptsig_size: usize,
    pub max_witness_items: usize,
    pub max_witness_item_size: usize,
    /// Largest null-data output script.
    pub max_data_carrier_bytes: usize,
}

impl Default for MempoolSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 300_000_000,
            expiry_seconds: 14 * 24 * 60 * 60,

            min_relay_fee: FeeRate::new(1_000),
            incremental_relay_fee: FeeRate::new(1_000),
            rolling_fee_half_life: 12 * 60 * 60,
            absurd_fee_multiplier: Some(10_000),
            relay_priority: false,

            max_ancestors: 25,
            max_ancestor_size: 101_000,
            max_descendants: 25,
            max_descendant_size: 101_000,

            enable_replacement: true,
            max_replacement_candidates: 100,

            require_standard: true,
            max_standard_version: 2,
            max_standard_tx_weight: 400_000,
            max_standard_sigops_cost: 16_000,
            max_scriptsig_size: 1_650,
            max_witness_items: 100,
            max_witness_item_size: 80,
            max_data_carrier_bytes: 83,
        }
    }
}

impl MempoolSettings {
    /// Create settings for testing (small pool, no absurd fee guard).
    pub fn for_testing() -> Self {
        Self {
            max_size_bytes: 1_000_000,
            expiry_seconds: 60 * 60,
            absurd_fee_multiplier: None,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = MempoolSettings::default();
        assert_eq!(settings.max_ancestors, 25);
        assert_eq!(settings.max_replacement_candidates, 100);
        assert!(settings.enable_replacement);
        assert!(settings.require_standard);
    }

    #[test]
    fn test_partial_json() {
        let settings: MempoolSettings =
            serde_json::from_str(r#"{ "relay_priority": true, "min_relay_fee": 0 }"#).unwrap();
        assert!(settings.relay_priority);
        assert_eq!(settings.min_relay_fee, FeeRate::ZERO);
        assert_eq!(settings.max_descendants, 25);
    }
}

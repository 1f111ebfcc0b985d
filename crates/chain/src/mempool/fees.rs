//! Fee rates, dust and coin-age priority.

use serde::{Deserialize, Serialize};
use slotchain_core::{Amount, ScriptTemplate, TxOut, COIN};
use std::fmt;

/// Bytes an input spending a typical output adds to a transaction.
const SPEND_INPUT_SIZE: usize = 148;

/// Priority above which a transaction relays without fee: one coin a day
/// old in a 250 byte transaction.
pub const FREE_PRIORITY_THRESHOLD: f64 = (COIN * 144) as f64 / 250.0;

/// Fee per 1000 virtual bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeeRate(Amount);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub const fn new(per_kvb: Amount) -> Self {
        Self(per_kvb)
    }

    /// Rate paid by `fee` over `vsize` bytes.
    pub fn from_fee(fee: Amount, vsize: usize) -> Self {
        if vsize == 0 {
            return Self(0);
        }
        Self(fee.saturating_mul(1_000) / vsize as Amount)
    }

    pub fn per_kvb(&self) -> Amount {
        self.0
    }

    /// Fee for `vsize` bytes. A non-zero rate never yields a zero fee.
    pub fn fee(&self, vsize: usize) -> Amount {
        let fee = self.0.saturating_mul(vsize as Amount) / 1_000;
        if fee == 0 && vsize > 0 && self.0 > 0 {
            1
        } else {
            fee
        }
    }

    pub fn saturating_add(self, other: FeeRate) -> FeeRate {
        FeeRate(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kvB", self.0)
    }
}

/// Smallest value worth creating for `output` at `relay_fee`: three times
/// what it costs to spend. Data carriers are never dust.
pub fn dust_threshold(output: &TxOut, relay_fee: FeeRate) -> Amount {
    if matches!(output.script_pubkey.template(), ScriptTemplate::NullData) {
        return 0;
    }
    // bincode layout: value, script length prefix, script bytes
    let output_size = 8 + 8 + output.script_pubkey.len();
    3 * relay_fee.fee(output_size + SPEND_INPUT_SIZE)
}

pub fn is_dust(output: &TxOut, relay_fee: FeeRate) -> bool {
    output.value < dust_threshold(output, relay_fee)
}

/// Whether `priority` is high enough to skip the relay fee.
pub fn allow_free(priority: f64) -> bool {
    priority > FREE_PRIORITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::{Keypair, Script};

    #[test]
    fn test_fee_rounding() {
        let rate = FeeRate::new(1_000);
        assert_eq!(rate.fee(250), 250);
        assert_eq!(FeeRate::new(1).fee(10), 1);
        assert_eq!(FeeRate::ZERO.fee(10), 0);
        assert_eq!(FeeRate::from_fee(500, 250), FeeRate::new(2_000));
        assert_eq!(FeeRate::from_fee(500, 0), FeeRate::ZERO);
    }

    #[test]
    fn test_dust() {
        let key = Keypair::generate();
        let script = Script::pay_to_pubkey(&key.public_key);
        let rate = FeeRate::new(1_000);
        let threshold = dust_threshold(&TxOut::new(0, script.clone()), rate);
        assert!(threshold > 0);
        assert!(is_dust(&TxOut::new(threshold - 1, script.clone()), rate));
        assert!(!is_dust(&TxOut::new(threshold, script), rate));

        let data = TxOut::new(0, Script::null_data(b"hello"));
        assert!(!is_dust(&data, rate));
    }

    #[test]
    fn test_free_threshold() {
        assert!(!allow_free(FREE_PRIORITY_THRESHOLD));
        assert!(allow_free(FREE_PRIORITY_THRESHOLD + 1.0));
    }
}

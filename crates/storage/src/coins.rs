//! Coin view entries and the coin view interface.

use crate::db::Result;
use serde::{Deserialize, Serialize};
use slotchain_core::{Hash, Transaction, TxOut};

/// Height recorded for coins created by unconfirmed mempool transactions.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// Unspent outputs of a single transaction.
///
/// Spent outputs are `None`; trailing spent outputs are trimmed so a fully
/// spent record has no outputs at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coins {
    pub version: i32,
    /// Height of the block that confirmed the transaction.
    pub height: u32,
    pub coinbase: bool,
    pub outputs: Vec<Option<TxOut>>,
}

impl Coins {
    /// Record every spendable output of `tx`. Provably unspendable outputs
    /// are never stored.
    pub fn from_transaction(tx: &Transaction, height: u32) -> Self {
        let outputs = tx
            .outputs
            .iter()
            .map(|out| (!out.script_pubkey.is_unspendable()).then(|| out.clone()))
            .collect();
        let mut coins = Self {
            version: tx.version,
            height,
            coinbase: tx.is_coinbase(),
            outputs,
        };
        coins.cleanup();
        coins
    }

    pub fn output(&self, vout: u32) -> Option<&TxOut> {
        self.outputs.get(vout as usize).and_then(|o| o.as_ref())
    }

    pub fn is_available(&self, vout: u32) -> bool {
        self.output(vout).is_some()
    }

    /// Mark an output spent, returning it.
    pub fn spend(&mut self, vout: u32) -> Option<TxOut> {
        let spent = self.outputs.get_mut(vout as usize)?.take();
        self.cleanup();
        spent
    }

    /// Whether every output has been spent.
    pub fn is_pruned(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    fn cleanup(&mut self) {
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
    }
}

/// Read access to a set of unspent outputs.
pub trait CoinView: Send + Sync {
    /// Coins of `txid`, or `None` when the transaction is unknown or fully spent.
    fn fetch_coins(&self, txid: &Hash) -> Result<Option<Coins>>;

    /// Block the view reflects.
    fn best_block(&self) -> Result<Hash>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::{OutPoint, Script, TxIn, COIN};

    fn tx_with_outputs(values: &[u64]) -> Transaction {
        Transaction::new(
            1,
            vec![TxIn::new(OutPoint::new(Hash([1; 32]), 0), Script::new(), 0)],
            values
                .iter()
                .map(|v| TxOut::new(*v, Script::new().push_int(1)))
                .collect(),
            0,
        )
    }

    #[test]
    fn test_spend_trims_trailing_outputs() {
        let mut coins = Coins::from_transaction(&tx_with_outputs(&[COIN, 2 * COIN, 3 * COIN]), 5);
        assert_eq!(coins.unspent_count(), 3);

        assert_eq!(coins.spend(1).map(|o| o.value), Some(2 * COIN));
        assert_eq!(coins.outputs.len(), 3);
        assert!(coins.spend(1).is_none());

        coins.spend(2);
        assert_eq!(coins.outputs.len(), 1);
        coins.spend(0);
        assert!(coins.is_pruned());
    }

    #[test]
    fn test_unspendable_outputs_are_not_stored() {
        let mut tx = tx_with_outputs(&[COIN]);
        tx.outputs.push(TxOut::new(0, Script::null_data(b"memo")));
        let coins = Coins::from_transaction(&tx, 1);
        assert_eq!(coins.outputs.len(), 1);
        assert!(!coins.is_available(1));
        assert!(!coins.coinbase);
    }
}

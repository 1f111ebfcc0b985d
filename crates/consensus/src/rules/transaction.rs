//! Transaction checks shared by block validation and mempool admission.

use crate::error::{ConsensusError, Result};
use crate::params::{ConsensusParams, WITNESS_SCALE_FACTOR};
use slotchain_core::{Amount, Transaction, MAX_MONEY};
use slotchain_storage::CoinViewCache;
use std::collections::HashSet;

/// Smallest and largest coinbase unlocking script.
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

pub fn money_range(value: Amount) -> bool {
    value <= MAX_MONEY
}

/// Checks that need nothing but the transaction itself.
pub fn check_transaction(tx: &Transaction, params: &ConsensusParams) -> Result<()> {
    if tx.inputs.is_empty() {
        return Err(ConsensusError::EmptyInputs);
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::EmptyOutputs);
    }
    if tx.base_size().saturating_mul(WITNESS_SCALE_FACTOR) > params.max_block_weight {
        return Err(ConsensusError::Oversize);
    }

    let mut total: Amount = 0;
    for output in &tx.outputs {
        if !money_range(output.value) {
            return Err(ConsensusError::OutputTooLarge);
        }
        total = total
            .checked_add(output.value)
            .filter(|t| money_range(*t))
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(ConsensusError::DuplicateInputs);
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
            return Err(ConsensusError::BadCoinbaseLength);
        }
    } else if tx.inputs.iter().any(|i| i.prevout.is_null()) {
        return Err(ConsensusError::NullPrevout);
    }
    Ok(())
}

/// Signature operations in unlocking and locking scripts, unweighted.
pub fn legacy_sigop_count(tx: &Transaction) -> usize {
    let inputs: usize = tx.inputs.iter().map(|i| i.script_sig.sigop_count()).sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|o| o.script_pubkey.sigop_count())
        .sum();
    inputs + outputs
}

/// Weighted sigop cost of `tx`.
pub fn sigop_cost(tx: &Transaction) -> usize {
    legacy_sigop_count(tx) * WITNESS_SCALE_FACTOR
}

/// Check the inputs of `tx` against `view` for a spend at `spend_height`,
/// returning the fee.
pub fn check_tx_inputs(
    tx: &Transaction,
    view: &mut CoinViewCache<'_>,
    spend_height: u32,
    coinbase_maturity: u32,
) -> Result<Amount> {
    let txid = tx.txid();
    let mut value_in: Amount = 0;

    for input in &tx.inputs {
        let coins = view
            .access_coins(&input.prevout.txid)?
            .ok_or(ConsensusError::InputsMissingOrSpent(txid))?;
        let output = coins
            .output(input.prevout.vout)
            .ok_or(ConsensusError::InputsMissingOrSpent(txid))?;

        if coins.coinbase {
            let depth = spend_height.saturating_sub(coins.height);
            if depth < coinbase_maturity {
                return Err(ConsensusError::PrematureCoinbaseSpend { depth });
            }
        }

        if !money_range(output.value) {
            return Err(ConsensusError::InputValuesOutOfRange);
        }
        value_in = value_in
            .checked_add(output.value)
            .filter(|v| money_range(*v))
            .ok_or(ConsensusError::InputValuesOutOfRange)?;
    }

    let value_out = tx.value_out().ok_or(ConsensusError::OutputTotalTooLarge)?;
    if value_in < value_out {
        return Err(ConsensusError::InputsBelowOutputs {
            value_in,
            value_out,
        });
    }
    let fee = value_in - value_out;
    if !money_range(fee) {
        return Err(ConsensusError::FeeOutOfRange);
    }
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::{Hash, OutPoint, Script, TxIn, TxOut, COIN};
    use slotchain_storage::{CoinView, Coins, StorageError};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapView(HashMap<Hash, Coins>);

    impl CoinView for MapView {
        fn fetch_coins(&self, txid: &Hash) -> std::result::Result<Option<Coins>, StorageError> {
            Ok(self.0.get(txid).cloned())
        }

        fn best_block(&self) -> std::result::Result<Hash, StorageError> {
            Ok(Hash::ZERO)
        }
    }

    fn spend(prevout: OutPoint, value: Amount) -> Transaction {
        Transaction::new(
            1,
            vec![TxIn::new(prevout, Script::new(), u32::MAX)],
            vec![TxOut::new(value, Script::new().push_int(1))],
            0,
        )
    }

    fn coinbase_funding() -> Transaction {
        Transaction::coinbase(5, vec![TxOut::new(10 * COIN, Script::new())], b"cb")
    }

    #[test]
    fn test_context_free_rejections() {
        let params = ConsensusParams::default();
        let ok = spend(OutPoint::new(Hash([1; 32]), 0), COIN);
        assert!(check_transaction(&ok, &params).is_ok());

        let mut no_inputs = ok.clone();
        no_inputs.inputs.clear();
        assert_eq!(check_transaction(&no_inputs, &params), Err(ConsensusError::EmptyInputs));

        let mut too_large = ok.clone();
        too_large.outputs[0].value = MAX_MONEY + 1;
        assert_eq!(check_transaction(&too_large, &params), Err(ConsensusError::OutputTooLarge));

        let mut dup = ok.clone();
        dup.inputs.push(dup.inputs[0].clone());
        assert_eq!(check_transaction(&dup, &params), Err(ConsensusError::DuplicateInputs));

        let null = spend(OutPoint::null(), COIN);
        let mut null_second = ok.clone();
        null_second.inputs.push(null.inputs[0].clone());
        assert_eq!(check_transaction(&null_second, &params), Err(ConsensusError::NullPrevout));
    }

    #[test]
    fn test_coinbase_script_length() {
        let params = ConsensusParams::default();
        let short = Transaction::coinbase(1, vec![TxOut::new(COIN, Script::new())], b"");
        assert_eq!(
            check_transaction(&short, &params).map_err(|e| e.code()),
            Err("bad-cb-length")
        );
        let ok = Transaction::coinbase(1, vec![TxOut::new(COIN, Script::new())], b"x");
        assert!(check_transaction(&ok, &params).is_ok());
    }

    #[test]
    fn test_fee_and_maturity() {
        let parent = coinbase_funding();
        let mut base = MapView::default();
        base.0.insert(parent.txid(), Coins::from_transaction(&parent, 5));
        let child = spend(OutPoint::new(parent.txid(), 0), 9 * COIN);

        let mut view = CoinViewCache::new(&base);
        assert_eq!(
            check_tx_inputs(&child, &mut view, 6, 100),
            Err(ConsensusError::PrematureCoinbaseSpend { depth: 1 })
        );
        assert_eq!(check_tx_inputs(&child, &mut view, 105, 100), Ok(COIN));

        let greedy = spend(OutPoint::new(parent.txid(), 0), 11 * COIN);
        assert_eq!(
            check_tx_inputs(&greedy, &mut view, 105, 100).map_err(|e| e.code()),
            Err("bad-txns-in-belowout")
        );

        let missing = spend(OutPoint::new(parent.txid(), 3), COIN);
        assert_eq!(
            check_tx_inputs(&missing, &mut view, 105, 100),
            Err(ConsensusError::InputsMissingOrSpent(missing.txid()))
        );
    }

    #[test]
    fn test_sigop_cost_is_weighted() {
        let key = slotchain_core::Keypair::generate().public_key;
        let tx = Transaction::new(
            1,
            vec![TxIn::new(OutPoint::new(Hash([1; 32]), 0), Script::new(), 0)],
            vec![TxOut::new(COIN, Script::pay_to_pubkey(&key))],
            0,
        );
        assert_eq!(legacy_sigop_count(&tx), 1);
        assert_eq!(sigop_cost(&tx), WITNESS_SCALE_FACTOR);
    }
}

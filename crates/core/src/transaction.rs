//! Transactions in the unspent-output model.

use crate::crypto::Keypair;
use crate::hash::{hash_serialized, Hash};
use crate::script::{Script, ScriptTemplate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while signing a transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("input {0} does not exist")]
    InputIndex(usize),
    #[error("cannot sign for a {0:?} output")]
    UnsupportedScript(ScriptTemplate),
    #[error("key does not match the output being spent")]
    KeyMismatch,
}

/// Amounts are counted in base units.
pub type Amount = u64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;
/// Upper bound on any single amount and on any sum of amounts.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Input sequence that disables lock-time and relative lock-time.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// Highest sequence that signals opt-in replacement.
pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;
/// When set, the sequence carries no relative lock-time.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
/// When set, the relative lock-time is time based (512 second units).
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
/// Relative time locks are expressed in units of `1 << 9` seconds.
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;
/// Lock-times below this are heights, above it unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Reference to one output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The outpoint referenced by a coinbase input.
    pub fn null() -> Self {
        Self {
            txid: Hash::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Witness stack. Not part of the txid.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Script, sequence: u32) -> Self {
        Self {
            prevout,
            script_sig,
            sequence,
            witness: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

/// A transaction: ordered inputs and outputs plus a lock-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

/// Witness-free view used for the txid and the base size.
#[derive(Serialize)]
struct StrippedTransaction<'a> {
    version: i32,
    inputs: Vec<(&'a OutPoint, &'a Script, u32)>,
    outputs: &'a [TxOut],
    lock_time: u32,
}

/// Data committed to by an input signature.
#[derive(Serialize)]
struct SigningPayload<'a> {
    domain: &'static [u8],
    version: i32,
    prevouts: Vec<(&'a OutPoint, u32)>,
    outputs: &'a [TxOut],
    lock_time: u32,
    input_index: u32,
    script_code: &'a Script,
    amount: Amount,
}

impl Transaction {
    pub fn new(version: i32, inputs: Vec<TxIn>, outputs: Vec<TxOut>, lock_time: u32) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Build a coinbase paying `outputs`, with the height pushed first in
    /// its input script.
    pub fn coinbase(height: u32, outputs: Vec<TxOut>, extra: &[u8]) -> Self {
        let mut script_sig = Script::new().push_int(height as i64);
        if !extra.is_empty() {
            script_sig = script_sig.push_slice(extra);
        }
        Self {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::null(), script_sig, SEQUENCE_FINAL)],
            outputs,
            lock_time: 0,
        }
    }

    fn stripped(&self) -> StrippedTransaction<'_> {
        StrippedTransaction {
            version: self.version,
            inputs: self
                .inputs
                .iter()
                .map(|i| (&i.prevout, &i.script_sig, i.sequence))
                .collect(),
            outputs: &self.outputs,
            lock_time: self.lock_time,
        }
    }

    /// Transaction id. Excludes witness data.
    pub fn txid(&self) -> Hash {
        hash_serialized(&self.stripped())
    }

    /// Hash over everything including witness data.
    pub fn wtxid(&self) -> Hash {
        hash_serialized(self)
    }

    pub fn base_size(&self) -> usize {
        encoded_len(&self.stripped())
    }

    pub fn total_size(&self) -> usize {
        encoded_len(self)
    }

    /// Weight: witness bytes count once, everything else four times.
    pub fn weight(&self) -> usize {
        self.base_size() * 3 + self.total_size()
    }

    /// Virtual size used for fee-rate computations.
    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(4)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Sum of output values, `None` on overflow.
    pub fn value_out(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Whether any input opts in to replacement.
    pub fn signals_replacement(&self) -> bool {
        self.inputs
            .iter()
            .any(|i| i.sequence <= MAX_BIP125_RBF_SEQUENCE)
    }

    /// Absolute lock-time finality at `height` and `block_time`.
    pub fn is_final(&self, height: u32, block_time: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height as u64
        } else {
            block_time
        };
        if (self.lock_time as u64) < cutoff {
            return true;
        }
        self.inputs.iter().all(|i| i.sequence == SEQUENCE_FINAL)
    }

    /// Digest signed by input `input_index`, committing to every prevout,
    /// every output and the spent amount.
    pub fn signature_hash(&self, input_index: usize, script_code: &Script, amount: Amount) -> Hash {
        hash_serialized(&SigningPayload {
            domain: b"slotchain/sighash",
            version: self.version,
            prevouts: self
                .inputs
                .iter()
                .map(|i| (&i.prevout, i.sequence))
                .collect(),
            outputs: &self.outputs,
            lock_time: self.lock_time,
            input_index: input_index as u32,
            script_code,
            amount,
        })
    }

    /// Sign input `index`, which spends `prevout`, filling in its unlocking
    /// script. Supports pay-to-pubkey and pay-to-address outputs.
    pub fn sign_input(
        &mut self,
        index: usize,
        prevout: &TxOut,
        keypair: &Keypair,
    ) -> Result<(), TransactionError> {
        if index >= self.inputs.len() {
            return Err(TransactionError::InputIndex(index));
        }
        let digest = self.signature_hash(index, &prevout.script_pubkey, prevout.value);
        let signature = keypair.sign_hash(&digest);
        let script_sig = match prevout.script_pubkey.template() {
            ScriptTemplate::PayToPubKey(key) if key == keypair.public_key => {
                Script::sig_for_pubkey(&signature)
            }
            ScriptTemplate::PayToAddress(addr) if addr == keypair.address() => {
                Script::sig_for_address(&signature, &keypair.public_key)
            }
            ScriptTemplate::PayToPubKey(_) | ScriptTemplate::PayToAddress(_) => {
                return Err(TransactionError::KeyMismatch)
            }
            other => return Err(TransactionError::UnsupportedScript(other)),
        };
        self.inputs[index].script_sig = script_sig;
        Ok(())
    }
}

fn encoded_len<T: Serialize + ?Sized>(value: &T) -> usize {
    bincode::serialized_size(value).map_or(usize::MAX, |n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let kp = Keypair::generate();
        Transaction::new(
            2,
            vec![TxIn::new(
                OutPoint::new(crate::hash::hash(b"prev"), 0),
                Script::new().push_slice(&[1, 2, 3]),
                SEQUENCE_FINAL,
            )],
            vec![TxOut::new(50 * COIN, Script::pay_to_address(&kp.address()))],
            0,
        )
    }

    #[test]
    fn test_txid_ignores_witness() {
        let tx = sample();
        let mut witnessed = tx.clone();
        witnessed.inputs[0].witness.push(vec![9; 10]);
        assert_eq!(tx.txid(), witnessed.txid());
        assert_ne!(tx.wtxid(), witnessed.wtxid());
        assert!(witnessed.weight() > tx.weight());
        assert_eq!(witnessed.base_size(), tx.base_size());
    }

    #[test]
    fn test_vsize_rounds_up_weight() {
        let tx = sample();
        assert_eq!(tx.vsize(), (tx.weight() + 3) / 4);
        assert!(tx.vsize() >= tx.base_size());
    }

    #[test]
    fn test_coinbase_shape() {
        let cb = Transaction::coinbase(7, vec![TxOut::new(COIN, Script::new())], b"");
        assert!(cb.is_coinbase());
        assert_eq!(cb.inputs[0].script_sig.first_push(), Some(vec![7]));
        assert!(!sample().is_coinbase());
    }

    #[test]
    fn test_signals_replacement() {
        let mut tx = sample();
        assert!(!tx.signals_replacement());
        tx.inputs[0].sequence = SEQUENCE_FINAL - 1;
        assert!(!tx.signals_replacement());
        tx.inputs[0].sequence = MAX_BIP125_RBF_SEQUENCE;
        assert!(tx.signals_replacement());
    }

    #[test]
    fn test_is_final() {
        let mut tx = sample();
        assert!(tx.is_final(0, 0));

        tx.lock_time = 100;
        // sequence final overrides the lock-time
        assert!(tx.is_final(50, 0));
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));

        tx.lock_time = LOCKTIME_THRESHOLD + 10;
        assert!(!tx.is_final(1_000_000, (LOCKTIME_THRESHOLD + 10) as u64));
        assert!(tx.is_final(0, (LOCKTIME_THRESHOLD + 11) as u64));
    }

    #[test]
    fn test_value_out_overflow() {
        let mut tx = sample();
        assert_eq!(tx.value_out(), Some(50 * COIN));
        tx.outputs.push(TxOut::new(u64::MAX, Script::new()));
        assert_eq!(tx.value_out(), None);
    }

    #[test]
    fn test_signature_hash_commits_to_input_and_amount() {
        let tx = sample();
        let code = tx.outputs[0].script_pubkey.clone();
        let base = tx.signature_hash(0, &code, COIN);
        assert_ne!(base, tx.signature_hash(0, &code, COIN + 1));
        assert_ne!(base, tx.signature_hash(1, &code, COIN));
        // the input script itself is not signed
        let mut resigned = tx.clone();
        resigned.inputs[0].script_sig = Script::new();
        assert_eq!(base, resigned.signature_hash(0, &code, COIN));
    }

    #[test]
    fn test_sign_input_rejects_foreign_key() {
        let owner = Keypair::generate();
        let other = Keypair::generate();
        let prevout = TxOut::new(COIN, Script::pay_to_address(&owner.address()));
        let mut tx = sample();
        assert_eq!(
            tx.sign_input(0, &prevout, &other),
            Err(TransactionError::KeyMismatch)
        );
        assert_eq!(
            tx.sign_input(3, &prevout, &owner),
            Err(TransactionError::InputIndex(3))
        );
        assert!(tx.sign_input(0, &prevout, &owner).is_ok());
        assert_eq!(tx.inputs[0].script_sig.len(), 1 + 64 + 1 + 32);
    }
}

//! Mempool rejection reasons.

use super::fees::FeeRate;
use slotchain_consensus::ConsensusError;
use slotchain_core::{Amount, Hash, ScriptError};
use slotchain_storage::StorageError;
use thiserror::Error;

/// Why a transaction was not admitted.
///
/// Every variant maps to a stable tag via [`MempoolError::code`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MempoolError {
    #[error("transaction {0} is already known")]
    AlreadyKnown(Hash),
    #[error("inputs of {0} are not available yet")]
    MissingInputs(Hash),
    #[error("inputs of {0} are already spent")]
    BadInputsSpent(Hash),
    #[error("transaction conflicts with {0} in the mempool")]
    Conflict(Hash),
    #[error("too long mempool chain: {0}")]
    TooLongMempoolChain(String),
    #[error("transaction {0} spends a conflicting transaction")]
    SpendsConflictingTx(Hash),
    #[error("relative lock-times are not satisfied")]
    NonBip68Final,
    #[error("input {0} spends a non-standard script")]
    NonStandardInputs(usize),
    #[error("witness of input {0} is non-standard")]
    NonStandardWitness(usize),
    #[error("fee {fee} below minimum {required}")]
    MinFeeNotMet { fee: Amount, required: Amount },
    #[error("fee {fee} below relay fee {required} and priority too low")]
    InsufficientPriority { fee: Amount, required: Amount },
    #[error("fee {fee} above the absurd fee ceiling {max}")]
    AbsurdlyHighFee { fee: Amount, max: Amount },
    #[error("insufficient fee: {0}")]
    InsufficientFee(String),
    #[error("replacement would evict {count} transactions, more than {max}")]
    TooManyPotentialReplacements { count: usize, max: usize },
    #[error("replacement spends new unconfirmed input {0}")]
    ReplacementAddsUnconfirmed(Hash),
    #[error("input {input} fails mandatory script checks: {error}")]
    MandatoryScriptVerifyFlagFailed { input: usize, error: ScriptError },
    #[error("input {input} fails standard script checks: {error}")]
    NonMandatoryScriptVerifyFlagFailed { input: usize, error: ScriptError },
    #[error("output {0} is dust")]
    DustOutputs(usize),

    // Policy checks ahead of the coin view
    #[error("coinbase transactions are not relayed")]
    Coinbase,
    #[error("transaction is not final")]
    NonFinal,
    #[error("non-standard transaction: {0}")]
    NonStandard(&'static str),
    #[error("sigop cost {0} above the standard limit")]
    TooManySigops(usize),
    #[error("mempool is full, minimum fee rate is now {0}")]
    MempoolFull(FeeRate),

    /// Consensus-invalid transaction.
    #[error(transparent)]
    Invalid(#[from] ConsensusError),

    #[error("storage failure: {0}")]
    Storage(String),
    #[error("admission cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl MempoolError {
    /// Stable tag for pattern matching by collaborators.
    pub fn code(&self) -> &'static str {
        use MempoolError::*;
        match self {
            AlreadyKnown(_) => "already-known",
            MissingInputs(_) => "missing-inputs",
            BadInputsSpent(_) => "bad-inputs-spent",
            Conflict(_) => "conflict",
            TooLongMempoolChain(_) => "too-long-mempool-chain",
            SpendsConflictingTx(_) => "bad-txns-spends-conflicting-tx",
            NonBip68Final => "non-bip68-final",
            NonStandardInputs(_) => "nonstandard-inputs",
            NonStandardWitness(_) => "nonstandard-witness",
            MinFeeNotMet { .. } => "min-fee-not-met",
            InsufficientPriority { .. } => "insufficient-priority",
            AbsurdlyHighFee { .. } => "absurdly-high-fee",
            InsufficientFee(_) => "insufficient-fee",
            TooManyPotentialReplacements { .. } => "too-many-potential-replacements",
            ReplacementAddsUnconfirmed(_) => "replacement-adds-unconfirmed",
            MandatoryScriptVerifyFlagFailed { .. } => "mandatory-script-verify-flag-failed",
            NonMandatoryScriptVerifyFlagFailed { .. } => {
                "non-mandatory-script-verify-flag-failed"
            }
            DustOutputs(_) => "transaction-contains-dust-txouts",
            Coinbase => "coinbase",
            NonFinal => "non-final",
            NonStandard(reason) => reason,
            TooManySigops(_) => "bad-txns-too-many-sigops",
            MempoolFull(_) => "mempool-full",
            Invalid(err) => err.code(),
            Storage(_) => "storage-failure",
            Cancelled => "cancelled",
            Internal(_) => "internal-error",
        }
    }

    /// Whether the same transaction may succeed later without changes,
    /// once a missing parent shows up.
    pub fn is_missing_inputs(&self) -> bool {
        matches!(self, MempoolError::MissingInputs(_))
    }
}

impl From<StorageError> for MempoolError {
    fn from(err: StorageError) -> Self {
        MempoolError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MempoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(MempoolError::AlreadyKnown(Hash::ZERO).code(), "already-known");
        assert_eq!(
            MempoolError::DustOutputs(0).code(),
            "transaction-contains-dust-txouts"
        );
        assert_eq!(MempoolError::NonStandard("scriptpubkey").code(), "scriptpubkey");
        assert_eq!(
            MempoolError::from(ConsensusError::EmptyInputs).code(),
            "bad-txns-vin-empty"
        );
    }

    #[test]
    fn test_missing_inputs_is_retryable() {
        assert!(MempoolError::MissingInputs(Hash::ZERO).is_missing_inputs());
        assert!(!MempoolError::BadInputsSpent(Hash::ZERO).is_missing_inputs());
    }
}

//! Consensus error taxonomy.

use slotchain_core::{Hash, ScriptError};
use slotchain_storage::StorageError;
use thiserror::Error;

/// Reasons a header or block is rejected.
///
/// Every variant maps to a stable tag via [`ConsensusError::code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Proof of authority
    #[error("header bits do not match the network constant")]
    InvalidHeaderBits,
    #[error("header timestamp is not on a slot boundary")]
    InvalidHeaderTimestamp,
    #[error("header is not signed by the slot owner")]
    InvalidHeaderSignature,
    #[error("block is not signed by the slot owner")]
    InvalidBlockSignature,

    // Header
    #[error("previous block {0} not found")]
    PrevBlockNotFound(Hash),
    #[error("block does not extend the current tip")]
    NotExtendingTip,
    #[error("block {0} was already rejected")]
    KnownInvalid(Hash),
    #[error("previous block {0} was rejected")]
    BadPrevBlock(Hash),
    #[error("block version {0} is no longer accepted")]
    BadVersion(i32),
    #[error("block timestamp is too early")]
    TimeTooOld,
    #[error("block timestamp is too far in the future")]
    TimeTooNew,

    // Integrity
    #[error("merkle root mismatch")]
    BadMerkleRoot,
    #[error("duplicate transaction")]
    DuplicateTransaction,

    // Partial
    #[error("block size limits failed")]
    BadBlockLength,
    #[error("block weight limit exceeded")]
    BadBlockWeight,
    #[error("block sigop cost limit exceeded")]
    BadBlockSigops,
    #[error("first transaction is not a coinbase")]
    CoinbaseMissing,
    #[error("more than one coinbase")]
    MultipleCoinbase,
    #[error("coinbase does not start with the block height")]
    BadCoinbaseHeight,
    #[error("coinbase script size out of range")]
    BadCoinbaseLength,
    #[error("transaction {0} is not final")]
    NonFinalTransaction(Hash),

    // Context-free transaction checks
    #[error("transaction has no inputs")]
    EmptyInputs,
    #[error("transaction has no outputs")]
    EmptyOutputs,
    #[error("transaction exceeds the size limit")]
    Oversize,
    #[error("output value exceeds the money range")]
    OutputTooLarge,
    #[error("total output value exceeds the money range")]
    OutputTotalTooLarge,
    #[error("transaction spends the same input twice")]
    DuplicateInputs,
    #[error("non-coinbase input references a null outpoint")]
    NullPrevout,

    // Full
    #[error("transaction {0} overwrites an unspent transaction")]
    OverwriteTransaction(Hash),
    #[error("inputs of {0} are missing or spent")]
    InputsMissingOrSpent(Hash),
    #[error("coinbase spent before maturity ({depth} confirmations)")]
    PrematureCoinbaseSpend { depth: u32 },
    #[error("input values out of range")]
    InputValuesOutOfRange,
    #[error("inputs ({value_in}) below outputs ({value_out})")]
    InputsBelowOutputs { value_in: u64, value_out: u64 },
    #[error("fee out of range")]
    FeeOutOfRange,
    #[error("script of input {input} in {txid} failed: {error}")]
    ScriptFailed {
        txid: Hash,
        input: usize,
        error: ScriptError,
    },
    #[error("coinbase pays {actual}, limit is {limit}")]
    BadCoinbaseAmount { actual: u64, limit: u64 },

    // Local failures, not attributable to the block
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("validation cancelled")]
    Cancelled,
}

impl ConsensusError {
    /// Stable tag for pattern matching by collaborators.
    pub fn code(&self) -> &'static str {
        use ConsensusError::*;
        match self {
            InvalidHeaderBits => "invalid-header-bits",
            InvalidHeaderTimestamp => "invalid-header-timestamp",
            InvalidHeaderSignature => "invalid-header-signature",
            InvalidBlockSignature => "invalid-block-signature",
            PrevBlockNotFound(_) => "prevblk-not-found",
            NotExtendingTip => "not-extending-tip",
            KnownInvalid(_) => "block-known-invalid",
            BadPrevBlock(_) => "bad-prevblk",
            BadVersion(_) => "bad-version",
            TimeTooOld => "time-too-old",
            TimeTooNew => "time-too-new",
            BadMerkleRoot => "bad-txnmrklroot",
            DuplicateTransaction => "bad-txns-duplicate",
            BadBlockLength => "bad-blk-length",
            BadBlockWeight => "bad-blk-weight",
            BadBlockSigops => "bad-blk-sigops",
            CoinbaseMissing => "bad-cb-missing",
            MultipleCoinbase => "bad-cb-multiple",
            BadCoinbaseHeight => "bad-cb-height",
            BadCoinbaseLength => "bad-cb-length",
            NonFinalTransaction(_) => "bad-txns-nonfinal",
            EmptyInputs => "bad-txns-vin-empty",
            EmptyOutputs => "bad-txns-vout-empty",
            Oversize => "bad-txns-oversize",
            OutputTooLarge => "bad-txns-vout-toolarge",
            OutputTotalTooLarge => "bad-txns-txouttotal-toolarge",
            DuplicateInputs => "bad-txns-inputs-duplicate",
            NullPrevout => "bad-txns-prevout-null",
            OverwriteTransaction(_) => "bad-txns-BIP30",
            InputsMissingOrSpent(_) => "bad-txns-inputs-missingorspent",
            PrematureCoinbaseSpend { .. } => "bad-txns-premature-spend-of-coinbase",
            InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            InputsBelowOutputs { .. } => "bad-txns-in-belowout",
            FeeOutOfRange => "bad-txns-fee-outofrange",
            ScriptFailed { .. } => "bad-txns-script-failed",
            BadCoinbaseAmount { .. } => "bad-cb-amount",
            Storage(_) => "storage-failure",
            Cancelled => "cancelled",
        }
    }

    /// Whether the peer that sent the offending data may warrant quarantine.
    pub fn should_ban_peer(&self) -> bool {
        !matches!(
            self,
            ConsensusError::Storage(_)
                | ConsensusError::Cancelled
                | ConsensusError::PrevBlockNotFound(_)
                | ConsensusError::NotExtendingTip
                | ConsensusError::TimeTooNew
        )
    }

    /// Whether the failure condemns every block with the same header.
    ///
    /// Merkle and duplicate failures say the body does not match the header,
    /// and the signature is not part of the header hash, so a correct block
    /// may still arrive under the same hash after either.
    pub fn marks_block_invalid(&self) -> bool {
        self.should_ban_peer()
            && !matches!(
                self,
                ConsensusError::KnownInvalid(_)
                    | ConsensusError::BadMerkleRoot
                    | ConsensusError::DuplicateTransaction
                    | ConsensusError::InvalidHeaderSignature
                    | ConsensusError::InvalidBlockSignature
            )
    }
}

impl From<StorageError> for ConsensusError {
    fn from(err: StorageError) -> Self {
        ConsensusError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ConsensusError::InvalidHeaderTimestamp.code(), "invalid-header-timestamp");
        assert_eq!(ConsensusError::InvalidHeaderSignature.code(), "invalid-header-signature");
        assert_eq!(
            ConsensusError::OverwriteTransaction(Hash::ZERO).code(),
            "bad-txns-BIP30"
        );
    }

    #[test]
    fn test_local_failures_do_not_ban() {
        assert!(!ConsensusError::Cancelled.should_ban_peer());
        assert!(!ConsensusError::Storage("io".into()).should_ban_peer());
        assert!(ConsensusError::BadMerkleRoot.should_ban_peer());
    }

    #[test]
    fn test_only_verdicts_mark_blocks_invalid() {
        assert!(ConsensusError::BadCoinbaseAmount { actual: 2, limit: 1 }.marks_block_invalid());
        assert!(ConsensusError::InvalidHeaderTimestamp.marks_block_invalid());
        assert!(ConsensusError::BadPrevBlock(Hash::ZERO).marks_block_invalid());

        assert!(!ConsensusError::Cancelled.marks_block_invalid());
        assert!(!ConsensusError::Storage("io".into()).marks_block_invalid());
        assert!(!ConsensusError::PrevBlockNotFound(Hash::ZERO).marks_block_invalid());
        assert!(!ConsensusError::TimeTooNew.marks_block_invalid());
        assert!(!ConsensusError::BadMerkleRoot.marks_block_invalid());
        assert!(!ConsensusError::InvalidHeaderSignature.marks_block_invalid());
        assert!(!ConsensusError::KnownInvalid(Hash::ZERO).marks_block_invalid());
    }
}

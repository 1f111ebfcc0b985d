//! Block body consistency against its header.

use super::{BlockContext, RuleSet};
use crate::error::{ConsensusError, Result};
use std::collections::HashSet;

/// The header commits to the transaction list, and the list is not a
/// mutation that hashes to the same root.
pub fn check_merkle_root(ctx: &mut BlockContext<'_>) -> Result<()> {
    let (root, mutated) = ctx.block.check_merkle_root();
    if root != ctx.block.header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot);
    }
    if mutated {
        return Err(ConsensusError::DuplicateTransaction);
    }
    Ok(())
}

pub fn check_unique_transactions(ctx: &mut BlockContext<'_>) -> Result<()> {
    let mut seen = HashSet::with_capacity(ctx.block.transactions.len());
    for tx in &ctx.block.transactions {
        if !seen.insert(tx.txid()) {
            return Err(ConsensusError::DuplicateTransaction);
        }
    }
    Ok(())
}

pub fn register(set: RuleSet) -> RuleSet {
    set.integrity("merkle-root", check_merkle_root)
        .integrity("unique-transactions", check_unique_transactions)
}

//! Proof-of-authority rules for the header and integrity phases.

use super::federation::Federation;
use crate::error::{ConsensusError, Result};
use crate::rules::{header, BlockContext, HeaderContext, RuleSet};
use std::sync::Arc;

/// Slot boundary and strictly increasing timestamps. Runs before any
/// signature check.
pub fn check_slot_timestamp(federation: &Federation, ctx: &HeaderContext<'_>) -> Result<()> {
    if !federation.is_valid_timestamp(ctx.header.timestamp) {
        return Err(ConsensusError::InvalidHeaderTimestamp);
    }
    if ctx.header.timestamp <= ctx.previous.header.timestamp {
        return Err(ConsensusError::TimeTooOld);
    }
    Ok(())
}

pub fn check_bits(ctx: &HeaderContext<'_>) -> Result<()> {
    if ctx.header.bits != ctx.params.poa_bits {
        return Err(ConsensusError::InvalidHeaderBits);
    }
    Ok(())
}

/// The slot owner signed the header hash in canonical form.
pub fn check_header_signature(federation: &Federation, ctx: &HeaderContext<'_>) -> Result<()> {
    let owner = federation.slot_owner(ctx.header.timestamp);
    if !ctx.header.is_signed_by(owner) {
        return Err(ConsensusError::InvalidHeaderSignature);
    }
    Ok(())
}

/// The slot owner's signature covers the transactions actually in the
/// block, not just the claimed merkle root.
pub fn check_block_signature(federation: &Federation, ctx: &BlockContext<'_>) -> Result<()> {
    let mut committed = ctx.block.header.clone();
    committed.merkle_root = ctx.block.compute_merkle_root();
    let owner = federation.slot_owner(committed.timestamp);
    if !committed.is_signed_by(owner) {
        return Err(ConsensusError::InvalidBlockSignature);
    }
    Ok(())
}

/// Proof-of-authority header and integrity rules followed by the common
/// body rules.
pub fn rule_set(federation: Arc<Federation>) -> RuleSet {
    let slot = Arc::clone(&federation);
    let signer = Arc::clone(&federation);
    let set = RuleSet::new()
        .header("slot-timestamp", move |ctx| check_slot_timestamp(&slot, ctx))
        .header("version", header::check_version)
        .header("time-too-old", header::check_time_too_old)
        .header("time-too-new", header::check_time_too_new)
        .header("header-bits", check_bits)
        .header("header-signature", move |ctx| check_header_signature(&signer, ctx))
        .integrity("block-signature", move |ctx| check_block_signature(&federation, ctx));
    RuleSet::with_body_rules(set)
}

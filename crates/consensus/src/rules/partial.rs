//! Block-level checks that need chain context but not the coin view.

use super::transaction::{check_transaction, legacy_sigop_count};
use super::{BlockContext, DeploymentFlags, RuleSet};
use crate::error::{ConsensusError, Result};
use crate::params::WITNESS_SCALE_FACTOR;
use slotchain_core::script::encode_num;
use slotchain_core::ScriptFlags;

/// Derive the deployment flags for the block's height.
pub fn derive_deployment_flags(ctx: &mut BlockContext<'_>) -> Result<()> {
    let params = ctx.params;
    let mut script_flags = ScriptFlags::MANDATORY;
    if ctx.height >= params.cltv_height {
        script_flags = script_flags | ScriptFlags::CHECKLOCKTIMEVERIFY;
    }
    let csv = ctx.height >= params.csv_height;
    if csv {
        script_flags = script_flags | ScriptFlags::CHECKSEQUENCEVERIFY;
    }

    ctx.flags = DeploymentFlags {
        script_flags,
        enforce_bip34: ctx.height >= params.bip34_height,
        enforce_bip68: csv,
        lock_time_cutoff: if csv {
            ctx.previous.median_time_past()
        } else {
            ctx.block.header.timestamp
        },
    };
    Ok(())
}

pub fn check_block_size(ctx: &mut BlockContext<'_>) -> Result<()> {
    let block = ctx.block;
    if block.transactions.is_empty()
        || block.base_size().saturating_mul(WITNESS_SCALE_FACTOR) > ctx.params.max_block_weight
    {
        return Err(ConsensusError::BadBlockLength);
    }
    if block.weight() > ctx.params.max_block_weight {
        return Err(ConsensusError::BadBlockWeight);
    }
    Ok(())
}

/// Exactly one coinbase, in first position.
pub fn check_coinbase_position(ctx: &mut BlockContext<'_>) -> Result<()> {
    let txs = &ctx.block.transactions;
    match txs.first() {
        Some(first) if first.is_coinbase() => {}
        _ => return Err(ConsensusError::CoinbaseMissing),
    }
    if txs.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(ConsensusError::MultipleCoinbase);
    }
    Ok(())
}

pub fn check_transactions(ctx: &mut BlockContext<'_>) -> Result<()> {
    for tx in &ctx.block.transactions {
        check_transaction(tx, ctx.params)?;
    }
    Ok(())
}

/// The coinbase unlocking script starts with the block height.
pub fn check_coinbase_height(ctx: &mut BlockContext<'_>) -> Result<()> {
    if !ctx.flags.enforce_bip34 {
        return Ok(());
    }
    let expected = encode_num(ctx.height as i64);
    let first_push = ctx
        .block
        .transactions
        .first()
        .and_then(|cb| cb.inputs.first())
        .and_then(|input| input.script_sig.first_push());
    if first_push.as_deref() != Some(expected.as_slice()) {
        return Err(ConsensusError::BadCoinbaseHeight);
    }
    Ok(())
}

/// Absolute lock-times against the height and the cutoff time.
pub fn check_finality(ctx: &mut BlockContext<'_>) -> Result<()> {
    for tx in &ctx.block.transactions {
        if !tx.is_final(ctx.height, ctx.flags.lock_time_cutoff) {
            return Err(ConsensusError::NonFinalTransaction(tx.txid()));
        }
    }
    Ok(())
}

pub fn check_sigops(ctx: &mut BlockContext<'_>) -> Result<()> {
    let legacy: usize = ctx.block.transactions.iter().map(legacy_sigop_count).sum();
    let cost = legacy * WITNESS_SCALE_FACTOR;
    if cost > ctx.params.max_block_sigops_cost {
        return Err(ConsensusError::BadBlockSigops);
    }
    ctx.sigops_cost = cost;
    Ok(())
}

pub fn register(set: RuleSet) -> RuleSet {
    set.partial("deployment-flags", derive_deployment_flags)
        .partial("block-size", check_block_size)
        .partial("coinbase-position", check_coinbase_position)
        .partial("transactions", check_transactions)
        .partial("coinbase-height", check_coinbase_height)
        .partial("finality", check_finality)
        .partial("sigops", check_sigops)
}

//! Coin view rules. Everything here runs against an overlay that is only
//! committed once the whole phase succeeds.

use super::transaction::check_tx_inputs;
use super::{BlockContext, RuleSet};
use crate::error::{ConsensusError, Result};
use crate::locktime::{calculate_sequence_locks, evaluate_sequence_locks};
use slotchain_core::{Amount, Transaction};
use slotchain_storage::CoinViewCache;
use tracing::trace;

/// No transaction may overwrite one that still has unspent outputs.
pub fn check_overwrite(ctx: &mut BlockContext<'_>, view: &mut CoinViewCache<'_>) -> Result<()> {
    for tx in &ctx.block.transactions {
        let txid = tx.txid();
        if view.have_coins(&txid)? {
            return Err(ConsensusError::OverwriteTransaction(txid));
        }
    }
    Ok(())
}

/// Verify and apply every transaction in block order, collecting fees.
pub fn connect_transactions(
    ctx: &mut BlockContext<'_>,
    view: &mut CoinViewCache<'_>,
) -> Result<()> {
    for tx in &ctx.block.transactions {
        if ctx.cancel.is_cancelled() {
            return Err(ConsensusError::Cancelled);
        }
        if !tx.is_coinbase() {
            let fee = connect_inputs(ctx, view, tx)?;
            ctx.fees = ctx
                .fees
                .checked_add(fee)
                .ok_or(ConsensusError::FeeOutOfRange)?;
        }
        view.add_transaction(tx, ctx.height)?;
    }
    trace!(fees = ctx.fees, "connected block transactions");
    Ok(())
}

fn connect_inputs(
    ctx: &BlockContext<'_>,
    view: &mut CoinViewCache<'_>,
    tx: &Transaction,
) -> Result<Amount> {
    let txid = tx.txid();
    if !view.have_inputs(tx)? {
        return Err(ConsensusError::InputsMissingOrSpent(txid));
    }

    if ctx.flags.enforce_bip68 {
        let mut prev_heights = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let height = view
                .access_coins(&input.prevout.txid)?
                .map(|c| c.height)
                .ok_or(ConsensusError::InputsMissingOrSpent(txid))?;
            prev_heights.push(height);
        }
        let locks = calculate_sequence_locks(tx, true, &mut prev_heights, ctx.previous);
        if !evaluate_sequence_locks(ctx.previous, &locks) {
            return Err(ConsensusError::NonFinalTransaction(txid));
        }
    }

    let fee = check_tx_inputs(tx, view, ctx.height, ctx.params.coinbase_maturity)?;

    for (index, input) in tx.inputs.iter().enumerate() {
        let prevout = view
            .spend(&input.prevout)?
            .ok_or(ConsensusError::InputsMissingOrSpent(txid))?;
        ctx.verifier
            .verify_input(tx, index, &prevout.output, ctx.flags.script_flags)
            .map_err(|error| ConsensusError::ScriptFailed {
                txid,
                input: index,
                error,
            })?;
    }
    Ok(fee)
}

/// The coinbase may claim the subsidy plus the fees of the block.
pub fn check_coinbase_amount(
    ctx: &mut BlockContext<'_>,
    _view: &mut CoinViewCache<'_>,
) -> Result<()> {
    let limit = ctx
        .fees
        .checked_add(ctx.params.subsidy(ctx.height))
        .ok_or(ConsensusError::FeeOutOfRange)?;
    let actual = ctx
        .block
        .transactions
        .first()
        .and_then(|cb| cb.value_out())
        .ok_or(ConsensusError::CoinbaseMissing)?;
    if actual > limit {
        return Err(ConsensusError::BadCoinbaseAmount { actual, limit });
    }
    Ok(())
}

pub fn register(set: RuleSet) -> RuleSet {
    set.full("bip30", check_overwrite)
        .full("connect-transactions", connect_transactions)
        .full("coinbase-amount", check_coinbase_amount)
}

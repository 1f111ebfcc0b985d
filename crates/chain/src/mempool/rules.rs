//! The admission pipeline.
//!
//! Rules run in a fixed order over one [`MempoolValidationContext`]; later
//! rules read what earlier ones filled in. The first failure rejects the
//! transaction and nothing in the pool changes.

use super::entry::{apply_delta, MempoolEntry};
use super::error::{MempoolError, Result};
use super::fees::{allow_free, is_dust, FeeRate};
use super::pool::{AncestorLimits, TxMempool};
use super::settings::MempoolSettings;
use slotchain_consensus::rules::transaction::{check_transaction, check_tx_inputs, sigop_cost};
use slotchain_consensus::{
    calculate_sequence_locks, evaluate_sequence_locks, ChainedHeader, ConsensusParams, LockPoints,
};
use slotchain_core::{Amount, Hash, ScriptFlags, ScriptTemplate, ScriptVerifier, Transaction};
use slotchain_storage::{CoinViewCache, MEMPOOL_HEIGHT};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Read-only inputs shared by every rule.
pub struct AdmissionEnv<'a> {
    pub settings: &'a MempoolSettings,
    pub params: &'a ConsensusParams,
    pub verifier: &'a dyn ScriptVerifier,
    pub pool: &'a TxMempool,
    pub tip: &'a ChainedHeader,
    pub now: u64,
    /// Pool minimum fee rate under current memory pressure.
    pub min_fee: FeeRate,
    pub cancel: &'a CancellationToken,
}

impl AdmissionEnv<'_> {
    /// Height of the block the transaction could first appear in.
    pub fn next_height(&self) -> u32 {
        self.tip.height + 1
    }

    /// Script flags the next block will enforce.
    pub fn consensus_flags(&self) -> ScriptFlags {
        let height = self.next_height();
        let mut flags = ScriptFlags::MANDATORY;
        if height >= self.params.cltv_height {
            flags = flags | ScriptFlags::CHECKLOCKTIMEVERIFY;
        }
        if height >= self.params.csv_height {
            flags = flags | ScriptFlags::CHECKSEQUENCEVERIFY;
        }
        flags
    }
}

/// State of one admission attempt.
pub struct MempoolValidationContext<'a> {
    pub tx: Transaction,
    pub txid: Hash,
    pub vsize: usize,
    /// Confirmed coins plus pool outputs.
    pub view: CoinViewCache<'a>,

    /// Confirmation height of each spent coin, `MEMPOOL_HEIGHT` for pool
    /// outputs.
    pub coin_heights: Vec<u32>,
    pub spends_coinbase: bool,

    /// Pool transactions spending the same outpoints.
    pub conflicts: HashSet<Hash>,
    /// `conflicts` and all their descendants.
    pub all_conflicting: HashSet<Hash>,
    pub conflicting_fees: Amount,
    pub conflicting_size: usize,

    pub ancestors: HashSet<Hash>,

    pub fee: Amount,
    pub modified_fee: Amount,
    /// Priority the transaction would have in the next block.
    pub priority: f64,
    pub sigop_cost: usize,
    pub lock_points: LockPoints,
    pub entry: Option<MempoolEntry>,
}

impl<'a> MempoolValidationContext<'a> {
    pub fn new(tx: Transaction, view: CoinViewCache<'a>) -> Self {
        Self {
            txid: tx.txid(),
            vsize: tx.vsize(),
            tx,
            view,
            coin_heights: Vec::new(),
            spends_coinbase: false,
            conflicts: HashSet::new(),
            all_conflicting: HashSet::new(),
            conflicting_fees: 0,
            conflicting_size: 0,
            ancestors: HashSet::new(),
            fee: 0,
            modified_fee: 0,
            priority: 0.0,
            sigop_cost: 0,
            lock_points: LockPoints::default(),
            entry: None,
        }
    }
}

pub type MempoolRule = fn(&mut MempoolValidationContext<'_>, &AdmissionEnv<'_>) -> Result<()>;

/// Named admission rules in execution order.
pub struct AdmissionPipeline {
    rules: Vec<(&'static str, MempoolRule)>,
}

impl AdmissionPipeline {
    pub fn standard() -> Self {
        Self {
            rules: vec![
                ("policy", check_policy as MempoolRule),
                ("coin-view", check_coin_view),
                ("conflicts", check_conflicts),
                ("ancestor-limits", check_ancestors),
                ("entry", build_entry),
                ("fee-rate", check_fee_rate),
                ("replacement", check_replacement),
                ("scripts", check_scripts),
                ("dust", check_dust),
            ],
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|(name, _)| *name)
    }

    pub fn run(&self, ctx: &mut MempoolValidationContext<'_>, env: &AdmissionEnv<'_>) -> Result<()> {
        for (name, rule) in &self.rules {
            if env.cancel.is_cancelled() {
                return Err(MempoolError::Cancelled);
            }
            if let Err(err) = rule(ctx, env) {
                debug!(rule = *name, txid = %ctx.txid, code = err.code(), "transaction rejected");
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Default for AdmissionPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Policy checks needing neither the coin view nor the pool
// =============================================================================

pub fn check_policy(ctx: &mut MempoolValidationContext<'_>, env: &AdmissionEnv<'_>) -> Result<()> {
    check_transaction(&ctx.tx, env.params)?;
    if ctx.tx.is_coinbase() {
        return Err(MempoolError::Coinbase);
    }
    if env.settings.require_standard {
        check_standard(&ctx.tx, env.settings)?;
    }

    let height = env.next_height();
    let cutoff = if height >= env.params.csv_height {
        env.tip.median_time_past()
    } else {
        env.now
    };
    if !ctx.tx.is_final(height, cutoff) {
        return Err(MempoolError::NonFinal);
    }
    Ok(())
}

/// Shape checks for relay.
pub fn check_standard(tx: &Transaction, settings: &MempoolSettings) -> Result<()> {
    if tx.version < 1 || tx.version > settings.max_standard_version {
        return Err(MempoolError::NonStandard("version"));
    }
    if tx.weight() > settings.max_standard_tx_weight {
        return Err(MempoolError::NonStandard("tx-size"));
    }
    for input in &tx.inputs {
        if input.script_sig.len() > settings.max_scriptsig_size {
            return Err(MempoolError::NonStandard("scriptsig-size"));
        }
        if !input.script_sig.is_push_only() {
            return Err(MempoolError::NonStandard("scriptsig-not-pushonly"));
        }
    }

    let mut data_outputs = 0;
    for output in &tx.outputs {
        match output.script_pubkey.template() {
            ScriptTemplate::NonStandard => return Err(MempoolError::NonStandard("scriptpubkey")),
            ScriptTemplate::NullData => {
                if output.script_pubkey.len() > settings.max_data_carrier_bytes {
                    return Err(MempoolError::NonStandard("scriptpubkey"));
                }
                data_outputs += 1;
            }
            ScriptTemplate::PayToPubKey(_) | ScriptTemplate::PayToAddress(_) => {}
        }
    }
    if data_outputs > 1 {
        return Err(MempoolError::NonStandard("multi-op-return"));
    }
    Ok(())
}

// =============================================================================
// 1. Coin view
// =============================================================================

pub fn check_coin_view(
    ctx: &mut MempoolValidationContext<'_>,
    env: &AdmissionEnv<'_>,
) -> Result<()> {
    if env.pool.contains(&ctx.txid) || ctx.view.have_coins(&ctx.txid)? {
        return Err(MempoolError::AlreadyKnown(ctx.txid));
    }

    for input in &ctx.tx.inputs {
        if !ctx.view.have_coins(&input.prevout.txid)? {
            return Err(MempoolError::MissingInputs(ctx.txid));
        }
    }
    if !ctx.view.have_inputs(&ctx.tx)? {
        return Err(MempoolError::BadInputsSpent(ctx.txid));
    }

    ctx.coin_heights.clear();
    for input in &ctx.tx.inputs {
        let coins = ctx
            .view
            .access_coins(&input.prevout.txid)?
            .ok_or(MempoolError::BadInputsSpent(ctx.txid))?;
        ctx.coin_heights.push(coins.height);
        ctx.spends_coinbase |= coins.coinbase;
    }
    Ok(())
}

// =============================================================================
// 2. Conflicts
// =============================================================================

pub fn check_conflicts(
    ctx: &mut MempoolValidationContext<'_>,
    env: &AdmissionEnv<'_>,
) -> Result<()> {
    for input in &ctx.tx.inputs {
        let Some(conflict) = env.pool.spender_of(&input.prevout) else {
            continue;
        };
        if ctx.conflicts.contains(&conflict) {
            continue;
        }
        let replaceable = env
            .pool
            .get(&conflict)
            .is_some_and(|entry| entry.tx.signals_replacement());
        if !env.settings.enable_replacement || !replaceable {
            return Err(MempoolError::Conflict(conflict));
        }
        ctx.conflicts.insert(conflict);
    }
    Ok(())
}

// =============================================================================
// 3. Ancestor limits
// =============================================================================

pub fn check_ancestors(
    ctx: &mut MempoolValidationContext<'_>,
    env: &AdmissionEnv<'_>,
) -> Result<()> {
    let parents = env.pool.parents_of_tx(&ctx.tx);
    ctx.ancestors = env.pool.calculate_ancestors(
        &parents,
        ctx.vsize,
        &AncestorLimits::from(env.settings),
        env.cancel,
    )?;
    if let Some(spent) = ctx.ancestors.intersection(&ctx.conflicts).next() {
        return Err(MempoolError::SpendsConflictingTx(*spent));
    }
    Ok(())
}

// =============================================================================
// 4. Entry
// =============================================================================

pub fn build_entry(ctx: &mut MempoolValidationContext<'_>, env: &AdmissionEnv<'_>) -> Result<()> {
    let next_height = env.next_height();

    // pool coins are assumed to confirm in the next block
    let mut prev_heights: Vec<u32> = ctx
        .coin_heights
        .iter()
        .map(|h| if *h == MEMPOOL_HEIGHT { next_height } else { *h })
        .collect();
    let enforce = next_height >= env.params.csv_height;
    let lock_points = calculate_sequence_locks(&ctx.tx, enforce, &mut prev_heights, env.tip);
    if !evaluate_sequence_locks(env.tip, &lock_points) {
        return Err(MempoolError::NonBip68Final);
    }

    if env.settings.require_standard {
        check_standard_inputs(ctx, env.settings)?;
    }

    let fee = check_tx_inputs(
        &ctx.tx,
        &mut ctx.view,
        next_height,
        env.params.coinbase_maturity,
    )?;

    let sigops = sigop_cost(&ctx.tx);
    if sigops > env.settings.max_standard_sigops_cost {
        return Err(MempoolError::TooManySigops(sigops));
    }

    let mut in_chain_value: Amount = 0;
    let mut coin_age = 0.0;
    for (input, height) in ctx.tx.inputs.iter().zip(&ctx.coin_heights) {
        if *height == MEMPOOL_HEIGHT {
            continue;
        }
        let value = ctx
            .view
            .output(&input.prevout)?
            .map_or(0, |out| out.value);
        in_chain_value = in_chain_value.saturating_add(value);
        coin_age += value as f64 * env.tip.height.saturating_sub(*height) as f64;
    }
    let entry_priority = coin_age / ctx.vsize.max(1) as f64;

    ctx.fee = fee;
    ctx.modified_fee = apply_delta(fee, env.pool.fee_delta(&ctx.txid));
    ctx.sigop_cost = sigops;
    ctx.lock_points = lock_points;

    let entry = MempoolEntry::new(
        ctx.tx.clone(),
        fee,
        env.now,
        env.tip.height,
        entry_priority,
        in_chain_value,
        ctx.spends_coinbase,
        sigops,
        lock_points,
    );
    ctx.priority = entry.priority(next_height);
    ctx.entry = Some(entry);
    Ok(())
}

/// Inputs must spend standard templates and carry a bounded witness.
fn check_standard_inputs(
    ctx: &mut MempoolValidationContext<'_>,
    settings: &MempoolSettings,
) -> Result<()> {
    for (index, input) in ctx.tx.inputs.iter().enumerate() {
        let spent = ctx
            .view
            .output(&input.prevout)?
            .ok_or(MempoolError::BadInputsSpent(ctx.txid))?;
        if !matches!(
            spent.script_pubkey.template(),
            ScriptTemplate::PayToPubKey(_) | ScriptTemplate::PayToAddress(_)
        ) {
            return Err(MempoolError::NonStandardInputs(index));
        }
        if input.witness.len() > settings.max_witness_items
            || input
                .witness
                .iter()
                .any(|item| item.len() > settings.max_witness_item_size)
        {
            return Err(MempoolError::NonStandardWitness(index));
        }
    }
    Ok(())
}

// =============================================================================
// 5. Fee rate
// =============================================================================

pub fn check_fee_rate(
    ctx: &mut MempoolValidationContext<'_>,
    env: &AdmissionEnv<'_>,
) -> Result<()> {
    let fee = ctx.modified_fee;

    let pressure_fee = env.min_fee.fee(ctx.vsize);
    if pressure_fee > 0 && fee < pressure_fee {
        return Err(MempoolError::MinFeeNotMet {
            fee,
            required: pressure_fee,
        });
    }

    let relay_fee = env.settings.min_relay_fee.fee(ctx.vsize);
    if fee < relay_fee {
        if !env.settings.relay_priority {
            return Err(MempoolError::MinFeeNotMet {
                fee,
                required: relay_fee,
            });
        }
        if !allow_free(ctx.priority) {
            return Err(MempoolError::InsufficientPriority {
                fee,
                required: relay_fee,
            });
        }
    }

    if let Some(multiplier) = env.settings.absurd_fee_multiplier {
        let max = relay_fee.saturating_mul(multiplier);
        if max > 0 && ctx.fee > max {
            return Err(MempoolError::AbsurdlyHighFee { fee: ctx.fee, max });
        }
    }
    Ok(())
}

// =============================================================================
// 6. Replacement
// =============================================================================

pub fn check_replacement(
    ctx: &mut MempoolValidationContext<'_>,
    env: &AdmissionEnv<'_>,
) -> Result<()> {
    if ctx.conflicts.is_empty() {
        return Ok(());
    }
    let new_rate = FeeRate::from_fee(ctx.modified_fee, ctx.vsize);

    let mut conflict_parents = HashSet::new();
    let mut candidates = 0;
    for txid in &ctx.conflicts {
        let Some(conflict) = env.pool.get(txid) else {
            continue;
        };
        let old_rate = conflict.fee_rate();
        if new_rate <= old_rate {
            return Err(MempoolError::InsufficientFee(format!(
                "rejecting replacement {}; new feerate {new_rate} <= old feerate {old_rate}",
                ctx.txid
            )));
        }
        conflict_parents.extend(conflict.tx.inputs.iter().map(|i| i.prevout.txid));
        // shared descendants are counted once per conflict
        candidates += conflict.count_with_descendants;
    }
    if candidates > env.settings.max_replacement_candidates {
        return Err(MempoolError::TooManyPotentialReplacements {
            count: candidates,
            max: env.settings.max_replacement_candidates,
        });
    }

    for txid in &ctx.conflicts {
        if env.cancel.is_cancelled() {
            return Err(MempoolError::Cancelled);
        }
        ctx.all_conflicting.insert(*txid);
        ctx.all_conflicting.extend(env.pool.descendants(txid));
    }
    if let Some(spent) = ctx.ancestors.intersection(&ctx.all_conflicting).next() {
        return Err(MempoolError::SpendsConflictingTx(*spent));
    }

    for input in &ctx.tx.inputs {
        let parent = input.prevout.txid;
        if !conflict_parents.contains(&parent) && env.pool.contains(&parent) {
            return Err(MempoolError::ReplacementAddsUnconfirmed(parent));
        }
    }

    ctx.conflicting_fees = 0;
    ctx.conflicting_size = 0;
    for entry in ctx.all_conflicting.iter().filter_map(|txid| env.pool.get(txid)) {
        ctx.conflicting_fees = ctx.conflicting_fees.saturating_add(entry.modified_fee());
        ctx.conflicting_size += entry.vsize;
    }

    if ctx.modified_fee < ctx.conflicting_fees {
        return Err(MempoolError::InsufficientFee(format!(
            "rejecting replacement {}, less fees than conflicting txs; {} < {}",
            ctx.txid, ctx.modified_fee, ctx.conflicting_fees
        )));
    }
    let additional = ctx.modified_fee - ctx.conflicting_fees;
    let relay_fee = env.settings.min_relay_fee.fee(ctx.vsize);
    if additional < relay_fee {
        return Err(MempoolError::InsufficientFee(format!(
            "rejecting replacement {}, not enough additional fees to relay; {additional} < {relay_fee}",
            ctx.txid
        )));
    }
    Ok(())
}

// =============================================================================
// 7. Scripts
// =============================================================================

pub fn check_scripts(ctx: &mut MempoolValidationContext<'_>, env: &AdmissionEnv<'_>) -> Result<()> {
    let mut spent = Vec::with_capacity(ctx.tx.inputs.len());
    for input in &ctx.tx.inputs {
        let output = ctx
            .view
            .output(&input.prevout)?
            .ok_or(MempoolError::BadInputsSpent(ctx.txid))?;
        spent.push(output);
    }

    for (index, output) in spent.iter().enumerate() {
        if env.cancel.is_cancelled() {
            return Err(MempoolError::Cancelled);
        }
        let Err(err) = env
            .verifier
            .verify_input(&ctx.tx, index, output, ScriptFlags::STANDARD)
        else {
            continue;
        };
        // tell policy failures apart from invalid spends
        let strict = env
            .verifier
            .verify_input(&ctx.tx, index, output, ScriptFlags::MANDATORY);
        return Err(match strict {
            Ok(()) => MempoolError::NonMandatoryScriptVerifyFlagFailed {
                input: index,
                error: err,
            },
            Err(error) => MempoolError::MandatoryScriptVerifyFlagFailed {
                input: index,
                error,
            },
        });
    }

    let flags = env.consensus_flags();
    for (index, output) in spent.iter().enumerate() {
        if env.cancel.is_cancelled() {
            return Err(MempoolError::Cancelled);
        }
        if let Err(err) = env.verifier.verify_input(&ctx.tx, index, output, flags) {
            error!(
                txid = %ctx.txid,
                input = index,
                ?flags,
                error = %err,
                "standard script checks passed but consensus checks failed, probable bug"
            );
            return Err(MempoolError::MandatoryScriptVerifyFlagFailed { input: index, error: err });
        }
    }
    Ok(())
}

// =============================================================================
// 8. Dust
// =============================================================================

pub fn check_dust(ctx: &mut MempoolValidationContext<'_>, env: &AdmissionEnv<'_>) -> Result<()> {
    match ctx
        .tx
        .outputs
        .iter()
        .position(|out| is_dust(out, env.settings.min_relay_fee))
    {
        Some(index) => Err(MempoolError::DustOutputs(index)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::{Keypair, OutPoint, Script, TxIn, TxOut, COIN};

    fn tx(outputs: Vec<TxOut>) -> Transaction {
        Transaction::new(
            1,
            vec![TxIn::new(OutPoint::new(Hash([1; 32]), 0), Script::new(), u32::MAX)],
            outputs,
            0,
        )
    }

    #[test]
    fn test_pipeline_order() {
        let names: Vec<_> = AdmissionPipeline::standard().names().collect();
        assert_eq!(
            names,
            vec![
                "policy",
                "coin-view",
                "conflicts",
                "ancestor-limits",
                "entry",
                "fee-rate",
                "replacement",
                "scripts",
                "dust"
            ]
        );
    }

    #[test]
    fn test_standard_outputs() {
        let settings = MempoolSettings::default();
        let key = Keypair::generate();
        let p2pk = TxOut::new(COIN, Script::pay_to_pubkey(&key.public_key));
        let data = TxOut::new(0, Script::null_data(b"memo"));

        assert!(check_standard(&tx(vec![p2pk.clone(), data.clone()]), &settings).is_ok());
        assert_eq!(
            check_standard(&tx(vec![p2pk.clone(), data.clone(), data]), &settings),
            Err(MempoolError::NonStandard("multi-op-return"))
        );
        let odd = TxOut::new(COIN, Script::new().push_int(1));
        assert_eq!(
            check_standard(&tx(vec![odd]), &settings).unwrap_err().code(),
            "scriptpubkey"
        );
        let big = TxOut::new(0, Script::null_data(&[0u8; 100]));
        assert_eq!(
            check_standard(&tx(vec![big]), &settings).unwrap_err().code(),
            "scriptpubkey"
        );

        let mut v3 = tx(vec![p2pk.clone()]);
        v3.version = 3;
        assert_eq!(check_standard(&v3, &settings).unwrap_err().code(), "version");

        let mut not_push = tx(vec![p2pk]);
        not_push.inputs[0].script_sig = Script::new().push_opcode(0x76);
        assert_eq!(
            check_standard(&not_push, &settings).unwrap_err().code(),
            "scriptsig-not-pushonly"
        );
    }
}

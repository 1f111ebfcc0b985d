//! Admission orchestration: run the pipeline, then apply the result.

use super::entry::MempoolEntry;
use super::error::{MempoolError, Result};
use super::pool::TxMempool;
use super::rules::{AdmissionEnv, AdmissionPipeline, MempoolValidationContext};
use super::settings::MempoolSettings;
use super::view::MempoolCoinView;
use slotchain_consensus::{ChainedHeader, ConsensusParams};
use slotchain_core::{ScriptVerifier, Transaction};
use slotchain_storage::{CoinView, CoinViewCache};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A transaction that made it into the pool.
#[derive(Debug, Clone)]
pub struct Admission {
    pub entry: MempoolEntry,
    /// Entries evicted by the replacement.
    pub replaced: Vec<MempoolEntry>,
}

pub struct MempoolValidator {
    settings: MempoolSettings,
    params: ConsensusParams,
    verifier: Arc<dyn ScriptVerifier>,
    pipeline: AdmissionPipeline,
}

impl MempoolValidator {
    pub fn new(
        settings: MempoolSettings,
        params: ConsensusParams,
        verifier: Arc<dyn ScriptVerifier>,
    ) -> Self {
        Self {
            settings,
            params,
            verifier,
            pipeline: AdmissionPipeline::standard(),
        }
    }

    pub fn settings(&self) -> &MempoolSettings {
        &self.settings
    }

    /// Validate `tx` against the pool and the confirmed coins in `base` as
    /// of `tip`, and insert it on success.
    ///
    /// The pool is only modified once every rule has passed.
    pub fn admit(
        &self,
        pool: &mut TxMempool,
        base: &dyn CoinView,
        tip: &ChainedHeader,
        now: u64,
        tx: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Admission> {
        let min_fee = pool.min_fee(&self.settings, now);

        let (entry, ancestors, all_conflicting) = {
            let view = MempoolCoinView::new(base, pool);
            let env = AdmissionEnv {
                settings: &self.settings,
                params: &self.params,
                verifier: self.verifier.as_ref(),
                pool,
                tip,
                now,
                min_fee,
                cancel,
            };
            let mut ctx = MempoolValidationContext::new(tx, CoinViewCache::new(&view));
            self.pipeline.run(&mut ctx, &env)?;
            let entry = ctx
                .entry
                .take()
                .ok_or(MempoolError::Internal("admission finished without an entry"))?;
            (entry, ctx.ancestors, ctx.all_conflicting)
        };
        if cancel.is_cancelled() {
            return Err(MempoolError::Cancelled);
        }

        let txid = entry.txid;
        let (fee, vsize) = (entry.fee, entry.vsize);
        let replaced = pool.remove_staged(&all_conflicting);
        for old in &replaced {
            debug!(replaced = %old.txid, by = %txid, "replaced transaction");
        }
        pool.add_unchecked(entry, &ancestors);

        let expired = pool.expire(now.saturating_sub(self.settings.expiry_seconds));
        if expired > 0 {
            debug!(expired, "expired old transactions");
        }
        pool.trim_to_size(
            self.settings.max_size_bytes,
            self.settings.incremental_relay_fee,
            now,
        );
        let Some(entry) = pool.get(&txid).cloned() else {
            return Err(MempoolError::MempoolFull(pool.min_fee(&self.settings, now)));
        };

        info!(%txid, fee, vsize, replaced = replaced.len(), pool_size = pool.len(), "accepted transaction");
        Ok(Admission { entry, replaced })
    }
}

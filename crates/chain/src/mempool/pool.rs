//! The mempool index.
//!
//! Entries are keyed by txid. Parent/child links and the outpoint spender
//! map are kept alongside so ancestor and descendant sets can be walked
//! without touching the coin view.

use super::entry::{apply_delta, MempoolEntry};
use super::error::{MempoolError, Result};
use super::fees::FeeRate;
use super::settings::MempoolSettings;
use slotchain_core::{Amount, Hash, OutPoint, Transaction};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Package ceilings applied when a transaction joins the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorLimits {
    pub max_ancestors: usize,
    pub max_ancestor_size: usize,
    pub max_descendants: usize,
    pub max_descendant_size: usize,
}

impl From<&MempoolSettings> for AncestorLimits {
    fn from(settings: &MempoolSettings) -> Self {
        Self {
            max_ancestors: settings.max_ancestors,
            max_ancestor_size: settings.max_ancestor_size,
            max_descendants: settings.max_descendants,
            max_descendant_size: settings.max_descendant_size,
        }
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolStats {
    pub count: usize,
    /// Sum of entry virtual sizes.
    pub total_size: usize,
    pub total_fees: Amount,
    pub rolling_min_fee: FeeRate,
}

/// Transactions selected for the next block.
#[derive(Debug, Clone, Default)]
pub struct BlockTemplate {
    /// In dependency order.
    pub transactions: Vec<Transaction>,
    /// Unmodified fees of `transactions`.
    pub fees: Amount,
    pub weight: usize,
    pub sigops_cost: usize,
}

#[derive(Debug, Default, Clone)]
struct TxLinks {
    parents: HashSet<Hash>,
    children: HashSet<Hash>,
}

/// Unconfirmed transactions.
#[derive(Debug, Default)]
pub struct TxMempool {
    entries: HashMap<Hash, MempoolEntry>,
    links: HashMap<Hash, TxLinks>,
    /// Outpoint to the pool transaction spending it.
    spenders: HashMap<OutPoint, Hash>,
    /// Prioritisation deltas, kept for transactions not in the pool yet.
    deltas: HashMap<Hash, i64>,
    total_size: usize,
    total_fees: Amount,
    /// Fee rate per kvB, decays once blocks arrive.
    rolling_min_fee: f64,
    last_rolling_update: u64,
    block_since_bump: bool,
}

impl TxMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// The pool transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.spenders.get(outpoint).copied()
    }

    pub fn fee_delta(&self, txid: &Hash) -> i64 {
        self.deltas.get(txid).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            count: self.entries.len(),
            total_size: self.total_size,
            total_fees: self.total_fees,
            rolling_min_fee: FeeRate::new(self.rolling_min_fee.round() as Amount),
        }
    }

    /// Pool transactions `tx` spends outputs of.
    pub fn parents_of_tx(&self, tx: &Transaction) -> HashSet<Hash> {
        tx.inputs
            .iter()
            .map(|i| i.prevout.txid)
            .filter(|txid| self.entries.contains_key(txid))
            .collect()
    }

    /// Every in-pool ancestor of `txid`, excluding itself.
    pub fn ancestors(&self, txid: &Hash) -> HashSet<Hash> {
        self.walk(txid, |links| &links.parents)
    }

    /// Every in-pool descendant of `txid`, excluding itself.
    pub fn descendants(&self, txid: &Hash) -> HashSet<Hash> {
        self.walk(txid, |links| &links.children)
    }

    fn walk(&self, start: &Hash, next: impl Fn(&TxLinks) -> &HashSet<Hash>) -> HashSet<Hash> {
        let mut seen = HashSet::new();
        let mut stack = vec![*start];
        while let Some(txid) = stack.pop() {
            let Some(links) = self.links.get(&txid) else {
                continue;
            };
            for other in next(links) {
                if seen.insert(*other) {
                    stack.push(*other);
                }
            }
        }
        seen
    }

    /// Ancestors a transaction of `vsize` with in-pool `parents` would have,
    /// failing if it or any ancestor would break `limits`.
    pub fn calculate_ancestors(
        &self,
        parents: &HashSet<Hash>,
        vsize: usize,
        limits: &AncestorLimits,
        cancel: &CancellationToken,
    ) -> Result<HashSet<Hash>> {
        if parents.len() + 1 > limits.max_ancestors {
            return Err(MempoolError::TooLongMempoolChain(format!(
                "too many unconfirmed parents [limit: {}]",
                limits.max_ancestors
            )));
        }

        let mut ancestors = HashSet::new();
        let mut staged: Vec<Hash> = parents.iter().copied().collect();
        let mut total_size = vsize;

        while let Some(txid) = staged.pop() {
            if cancel.is_cancelled() {
                return Err(MempoolError::Cancelled);
            }
            if !ancestors.insert(txid) {
                continue;
            }
            let Some(stage) = self.entries.get(&txid) else {
                continue;
            };
            total_size += stage.vsize;

            if stage.size_with_descendants + vsize > limits.max_descendant_size {
                return Err(MempoolError::TooLongMempoolChain(format!(
                    "exceeds descendant size limit for tx {txid} [limit: {}]",
                    limits.max_descendant_size
                )));
            }
            if stage.count_with_descendants + 1 > limits.max_descendants {
                return Err(MempoolError::TooLongMempoolChain(format!(
                    "too many descendants for tx {txid} [limit: {}]",
                    limits.max_descendants
                )));
            }
            if total_size > limits.max_ancestor_size {
                return Err(MempoolError::TooLongMempoolChain(format!(
                    "exceeds ancestor size limit [limit: {}]",
                    limits.max_ancestor_size
                )));
            }

            if let Some(links) = self.links.get(&txid) {
                for parent in &links.parents {
                    if !ancestors.contains(parent) && !staged.contains(parent) {
                        staged.push(*parent);
                    }
                }
            }
            if staged.len() + ancestors.len() + 1 > limits.max_ancestors {
                return Err(MempoolError::TooLongMempoolChain(format!(
                    "too many unconfirmed ancestors [limit: {}]",
                    limits.max_ancestors
                )));
            }
        }
        Ok(ancestors)
    }

    /// Insert `entry` whose in-pool ancestors are `ancestors`. Admission
    /// checks must already have passed.
    pub fn add_unchecked(&mut self, mut entry: MempoolEntry, ancestors: &HashSet<Hash>) {
        let txid = entry.txid;
        entry.fee_delta = self.fee_delta(&txid);
        let modified = entry.modified_fee();
        entry.fees_with_ancestors = modified;
        entry.fees_with_descendants = modified;

        for ancestor in ancestors {
            if let Some(a) = self.entries.get_mut(ancestor) {
                entry.count_with_ancestors += 1;
                entry.size_with_ancestors += a.vsize;
                entry.fees_with_ancestors += a.modified_fee();
                entry.sigops_with_ancestors += a.sigop_cost;

                a.count_with_descendants += 1;
                a.size_with_descendants += entry.vsize;
                a.fees_with_descendants += modified;
            }
        }

        let parents = self.parents_of_tx(&entry.tx);
        for parent in &parents {
            self.links.entry(*parent).or_default().children.insert(txid);
        }
        self.links.insert(
            txid,
            TxLinks {
                parents,
                children: HashSet::new(),
            },
        );
        for input in &entry.tx.inputs {
            self.spenders.insert(input.prevout, txid);
        }

        self.total_size += entry.vsize;
        self.total_fees += entry.fee;
        self.entries.insert(txid, entry);
    }

    /// Remove every transaction in `set`, fixing up the aggregates of the
    /// entries that stay.
    pub fn remove_staged(&mut self, set: &HashSet<Hash>) -> Vec<MempoolEntry> {
        for txid in set {
            let Some(entry) = self.entries.get(txid) else {
                continue;
            };
            let (vsize, fee, sigops) = (entry.vsize, entry.modified_fee(), entry.sigop_cost);

            for ancestor in self.ancestors(txid).difference(set) {
                if let Some(a) = self.entries.get_mut(ancestor) {
                    a.count_with_descendants -= 1;
                    a.size_with_descendants -= vsize;
                    a.fees_with_descendants = a.fees_with_descendants.saturating_sub(fee);
                }
            }
            for descendant in self.descendants(txid).difference(set) {
                if let Some(d) = self.entries.get_mut(descendant) {
                    d.count_with_ancestors -= 1;
                    d.size_with_ancestors -= vsize;
                    d.fees_with_ancestors = d.fees_with_ancestors.saturating_sub(fee);
                    d.sigops_with_ancestors -= sigops;
                }
            }
        }

        let mut removed = Vec::with_capacity(set.len());
        for txid in set {
            let Some(entry) = self.entries.remove(txid) else {
                continue;
            };
            for input in &entry.tx.inputs {
                if self.spenders.get(&input.prevout) == Some(txid) {
                    self.spenders.remove(&input.prevout);
                }
            }
            if let Some(links) = self.links.remove(txid) {
                for parent in &links.parents {
                    if let Some(p) = self.links.get_mut(parent) {
                        p.children.remove(txid);
                    }
                }
                for child in &links.children {
                    if let Some(c) = self.links.get_mut(child) {
                        c.parents.remove(txid);
                    }
                }
            }
            self.total_size -= entry.vsize;
            self.total_fees -= entry.fee;
            removed.push(entry);
        }
        removed
    }

    /// Remove `txid` and everything depending on it.
    pub fn remove_recursive(&mut self, txid: &Hash) -> Vec<MempoolEntry> {
        if !self.entries.contains_key(txid) {
            return Vec::new();
        }
        let mut set = self.descendants(txid);
        set.insert(*txid);
        self.remove_staged(&set)
    }

    /// Drop transactions confirmed by a block and anything conflicting with
    /// them. Returns the number of entries removed.
    pub fn remove_for_block(&mut self, transactions: &[Transaction]) -> usize {
        let mut removed = 0;
        for tx in transactions {
            let txid = tx.txid();
            if self.entries.contains_key(&txid) {
                removed += self.remove_staged(&HashSet::from([txid])).len();
            }
            for input in &tx.inputs {
                if let Some(spender) = self.spender_of(&input.prevout) {
                    if spender != txid {
                        debug!(txid = %spender, "removing transaction conflicting with block");
                        removed += self.remove_recursive(&spender).len();
                    }
                }
            }
            self.deltas.remove(&txid);
        }
        self.block_since_bump = true;
        removed
    }

    /// Remove entries admitted before `cutoff` together with their
    /// descendants.
    pub fn expire(&mut self, cutoff: u64) -> usize {
        let old: Vec<Hash> = self
            .entries
            .values()
            .filter(|e| e.time < cutoff)
            .map(|e| e.txid)
            .collect();
        old.iter().map(|txid| self.remove_recursive(txid).len()).sum()
    }

    /// Evict the lowest descendant-score packages until the pool fits in
    /// `limit` bytes, raising the rolling minimum fee past each evicted
    /// package.
    pub fn trim_to_size(&mut self, limit: usize, incremental: FeeRate, now: u64) -> Vec<Hash> {
        let mut removed = Vec::new();
        while self.total_size > limit {
            let Some(worst) = self
                .entries
                .values()
                .min_by(|a, b| {
                    a.descendant_score()
                        .cmp(&b.descendant_score())
                        .then_with(|| a.txid.cmp(&b.txid))
                })
                .map(|e| (e.txid, e.fees_with_descendants, e.size_with_descendants))
            else {
                break;
            };
            let (txid, fees, size) = worst;
            let rate = FeeRate::from_fee(fees, size).saturating_add(incremental);
            self.track_package_removed(rate, now);
            removed.extend(self.remove_recursive(&txid).into_iter().map(|e| e.txid));
        }
        if !removed.is_empty() {
            debug!(evicted = removed.len(), min_fee = %self.stats().rolling_min_fee, "trimmed mempool");
        }
        removed
    }

    fn track_package_removed(&mut self, rate: FeeRate, now: u64) {
        let rate = rate.per_kvb() as f64;
        if rate > self.rolling_min_fee {
            self.rolling_min_fee = rate;
            self.last_rolling_update = now;
            self.block_since_bump = false;
        }
    }

    /// Minimum fee rate for admission under current memory pressure.
    ///
    /// The rate set by trimming only starts decaying after a block has been
    /// connected, halving every `rolling_fee_half_life` (faster when the
    /// pool is mostly empty).
    pub fn min_fee(&mut self, settings: &MempoolSettings, now: u64) -> FeeRate {
        if !self.block_since_bump || self.rolling_min_fee == 0.0 {
            return FeeRate::new(self.rolling_min_fee.round() as Amount);
        }
        if now > self.last_rolling_update + 10 {
            let mut half_life = settings.rolling_fee_half_life.max(1) as f64;
            if self.total_size < settings.max_size_bytes / 4 {
                half_life /= 4.0;
            } else if self.total_size < settings.max_size_bytes / 2 {
                half_life /= 2.0;
            }
            let elapsed = (now - self.last_rolling_update) as f64;
            self.rolling_min_fee /= 2f64.powf(elapsed / half_life);
            self.last_rolling_update = now;

            if self.rolling_min_fee < settings.incremental_relay_fee.per_kvb() as f64 / 2.0 {
                self.rolling_min_fee = 0.0;
                return FeeRate::ZERO;
            }
        }
        FeeRate::new(self.rolling_min_fee.round() as Amount).max(settings.incremental_relay_fee)
    }

    /// Add `delta` to the fee the pool credits `txid` with, whether or not
    /// it is in the pool yet.
    pub fn prioritise_transaction(&mut self, txid: Hash, delta: i64) {
        let total = {
            let slot = self.deltas.entry(txid).or_insert(0);
            *slot = slot.saturating_add(delta);
            *slot
        };

        let Some(entry) = self.entries.get_mut(&txid) else {
            return;
        };
        let before = entry.modified_fee();
        entry.fee_delta = total;
        let after = entry.modified_fee();
        let diff = after as i64 - before as i64;
        entry.fees_with_ancestors = apply_delta(entry.fees_with_ancestors, diff);
        entry.fees_with_descendants = apply_delta(entry.fees_with_descendants, diff);

        for ancestor in self.ancestors(&txid) {
            if let Some(a) = self.entries.get_mut(&ancestor) {
                a.fees_with_descendants = apply_delta(a.fees_with_descendants, diff);
            }
        }
        for descendant in self.descendants(&txid) {
            if let Some(d) = self.entries.get_mut(&descendant) {
                d.fees_with_ancestors = apply_delta(d.fees_with_ancestors, diff);
            }
        }
        debug!(%txid, delta, "prioritised transaction");
    }

    /// Select packages by ancestor score until `max_weight` is reached.
    pub fn block_template(&self, max_weight: usize, max_sigops_cost: usize) -> BlockTemplate {
        let mut candidates: Vec<&MempoolEntry> = self.entries.values().collect();
        candidates.sort_by(|a, b| {
            b.ancestor_score()
                .cmp(&a.ancestor_score())
                .then_with(|| a.txid.cmp(&b.txid))
        });

        let mut included = HashSet::new();
        let mut template = BlockTemplate::default();
        for candidate in candidates {
            if included.contains(&candidate.txid) {
                continue;
            }
            let mut package: Vec<&MempoolEntry> = self
                .ancestors(&candidate.txid)
                .iter()
                .filter(|txid| !included.contains(*txid))
                .filter_map(|txid| self.entries.get(txid))
                .collect();
            package.push(candidate);
            package.sort_by_key(|e| e.count_with_ancestors);

            let weight: usize = package.iter().map(|e| e.tx.weight()).sum();
            let sigops: usize = package.iter().map(|e| e.sigop_cost).sum();
            if template.weight + weight > max_weight
                || template.sigops_cost + sigops > max_sigops_cost
            {
                continue;
            }
            for entry in package {
                included.insert(entry.txid);
                template.transactions.push(entry.tx.clone());
                template.fees += entry.fee;
            }
            template.weight += weight;
            template.sigops_cost += sigops;
        }
        template
    }
}

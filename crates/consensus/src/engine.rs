//! The consensus rule engine.
//!
//! Header, integrity and partial validation are pure functions of the
//! candidate and its parent and run without holding the chain state lock.
//! Full validation runs under the write lock against an overlay of the coin
//! view; the overlay, the new header and the head move are committed in one
//! batch or not at all.
//!
//! A block rejected on its own merits is remembered by hash, along with
//! anything built on it, and never validated again.

use crate::chain::{ChainIndex, ChainedHeader};
use crate::error::{ConsensusError, Result};
use crate::params::ConsensusParams;
use crate::rules::{BlockContext, DeploymentFlags, HeaderContext, Phase, Rule, RuleSet};
use crate::time::TimeSource;
use slotchain_core::{Amount, Block, BlockHeader, Hash, ScriptVerifier};
use slotchain_storage::{CoinChanges, CoinStore, CoinViewCache, HeaderStore, Storage, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The active chain as seen by validation.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub tip: Arc<ChainedHeader>,
}

impl ChainState {
    pub fn height(&self) -> u32 {
        self.tip.height
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip.hash
    }
}

/// Result of connecting a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStateUpdate {
    pub hash: Hash,
    pub height: u32,
    pub chain_work: u128,
    pub fees: Amount,
    pub transactions: usize,
    /// Coin records written or deleted.
    pub coin_writes: usize,
}

/// A block that passed header, integrity and partial validation.
#[derive(Debug, Clone)]
pub struct CheckedBlock {
    pub block: Block,
    pub hash: Hash,
    pub previous: Arc<ChainedHeader>,
    pub height: u32,
    pub flags: DeploymentFlags,
    pub sigops_cost: usize,
}

pub struct ConsensusRuleEngine {
    params: ConsensusParams,
    rules: RuleSet,
    verifier: Arc<dyn ScriptVerifier>,
    time: Arc<dyn TimeSource>,
    coins: CoinStore,
    headers: HeaderStore,
    index: RwLock<ChainIndex>,
    /// Blocks that failed validation, persisted under `header:invalid:`.
    invalid: RwLock<HashSet<Hash>>,
    state: RwLock<ChainState>,
    cancel: CancellationToken,
}

impl ConsensusRuleEngine {
    /// Open the chain in `storage`, writing `genesis` and its coinbase
    /// outputs if the store is empty.
    pub fn open(
        storage: Storage,
        params: ConsensusParams,
        rules: RuleSet,
        verifier: Arc<dyn ScriptVerifier>,
        time: Arc<dyn TimeSource>,
        genesis: &Block,
    ) -> Result<Self> {
        let headers = HeaderStore::new(storage.clone());
        let coins = CoinStore::new(storage);

        let (index, tip) = if headers.is_initialized()? {
            let genesis_hash = genesis.hash();
            if headers.get_hash_at(0)? != Some(genesis_hash) {
                return Err(StorageError::InvalidGenesis(format!(
                    "store was created for a different genesis than {genesis_hash}"
                ))
                .into());
            }
            let head = headers
                .get_head()?
                .ok_or_else(|| StorageError::NotFound("chain head".into()))?;
            let index = ChainIndex::from_stored(headers.all_headers()?);
            let tip = index
                .get(&head)
                .ok_or_else(|| StorageError::NotFound(format!("head header {head}")))?;
            (index, tip)
        } else {
            let tip = ChainedHeader::genesis(genesis.header.clone());
            let mut overlay = CoinViewCache::new(&coins);
            for tx in &genesis.transactions {
                overlay.add_transaction(tx, 0)?;
            }
            overlay.set_best_block(tip.hash);
            let ops = headers.advance_ops(&tip.to_stored())?;
            coins.commit(overlay.into_changes(), ops)?;
            info!(hash = %tip.hash, "initialized chain from genesis");
            (ChainIndex::new(Arc::clone(&tip)), tip)
        };

        let invalid: HashSet<Hash> = headers.invalid_hashes()?.into_iter().collect();
        info!(
            height = tip.height,
            hash = %tip.hash,
            rules = rules.len(),
            rejected = invalid.len(),
            "consensus engine ready"
        );
        Ok(Self {
            params,
            rules,
            verifier,
            time,
            coins,
            headers,
            index: RwLock::new(index),
            invalid: RwLock::new(invalid),
            state: RwLock::new(ChainState { tip }),
            cancel: CancellationToken::new(),
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn verifier(&self) -> Arc<dyn ScriptVerifier> {
        Arc::clone(&self.verifier)
    }

    pub fn now(&self) -> u64 {
        self.time.now()
    }

    pub fn coin_store(&self) -> &CoinStore {
        &self.coins
    }

    pub fn header_store(&self) -> &HeaderStore {
        &self.headers
    }

    pub async fn tip(&self) -> Arc<ChainedHeader> {
        Arc::clone(&self.state.read().await.tip)
    }

    /// Hold the chain state for reading. Blocks cannot be connected while
    /// the guard is alive, so coin view reads stay consistent.
    pub async fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().await
    }

    pub async fn get_header(&self, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        self.index.read().await.get(hash)
    }

    pub async fn is_known_invalid(&self, hash: &Hash) -> bool {
        self.invalid.read().await.contains(hash)
    }

    /// Fail fast on a block, or a child of a block, that was rejected before.
    async fn ensure_not_invalid(&self, hash: Hash, prev_hash: Hash) -> Result<()> {
        let invalid = self.invalid.read().await;
        if invalid.contains(&hash) {
            return Err(ConsensusError::KnownInvalid(hash));
        }
        if invalid.contains(&prev_hash) {
            return Err(ConsensusError::BadPrevBlock(prev_hash));
        }
        Ok(())
    }

    async fn remember_failure(&self, hash: Hash, err: &ConsensusError) {
        if !err.marks_block_invalid() || !self.invalid.write().await.insert(hash) {
            return;
        }
        if let Err(store_err) = self.headers.mark_invalid(&hash) {
            warn!(%hash, "could not persist rejected block: {store_err}");
        }
        debug!(%hash, code = err.code(), "marked block invalid");
    }

    async fn previous_of(&self, header: &BlockHeader) -> Result<Arc<ChainedHeader>> {
        self.index
            .read()
            .await
            .get(&header.prev_hash)
            .ok_or(ConsensusError::PrevBlockNotFound(header.prev_hash))
    }

    /// Validate a header on its own and add it to the header tree.
    pub async fn accept_header(&self, header: BlockHeader) -> Result<Arc<ChainedHeader>> {
        let hash = header.hash();
        let result = self.accept_new_header(header, hash).await;
        if let Err(err) = &result {
            self.remember_failure(hash, err).await;
        }
        result
    }

    async fn accept_new_header(&self, header: BlockHeader, hash: Hash) -> Result<Arc<ChainedHeader>> {
        self.ensure_not_invalid(hash, header.prev_hash).await?;
        if let Some(known) = self.index.read().await.get(&hash) {
            return Ok(known);
        }
        let previous = self.previous_of(&header).await?;
        let ctx = HeaderContext {
            params: &self.params,
            header: &header,
            hash,
            previous: &previous,
            height: previous.height + 1,
            now: self.time.now(),
        };
        self.run_header_rules(&ctx)?;

        let chained = ChainedHeader::extend(&previous, header);
        self.headers.put_header(&chained.to_stored())?;
        self.index.write().await.insert(Arc::clone(&chained));
        debug!(height = chained.height, hash = %hash, "accepted header");
        Ok(chained)
    }

    /// Run header, integrity and partial validation.
    pub async fn check_block(&self, block: Block) -> Result<CheckedBlock> {
        let hash = block.hash();
        let result = self.check_new_block(block, hash).await;
        if let Err(err) = &result {
            self.remember_failure(hash, err).await;
        }
        result
    }

    async fn check_new_block(&self, block: Block, hash: Hash) -> Result<CheckedBlock> {
        self.ensure_not_invalid(hash, block.header.prev_hash).await?;
        let previous = self.previous_of(&block.header).await?;
        self.check_block_against(block, hash, previous)
    }

    fn check_block_against(
        &self,
        block: Block,
        hash: Hash,
        previous: Arc<ChainedHeader>,
    ) -> Result<CheckedBlock> {
        let height = previous.height + 1;
        let (flags, sigops_cost) = {
            let mut ctx = self.block_context(&block, hash, &previous, DeploymentFlags::default());
            self.run_header_rules(&ctx.header_context())?;
            self.run_block_rules(Phase::Integrity, &mut ctx)?;
            self.run_block_rules(Phase::Partial, &mut ctx)?;
            (ctx.flags, ctx.sigops_cost)
        };
        Ok(CheckedBlock {
            block,
            hash,
            previous,
            height,
            flags,
            sigops_cost,
        })
    }

    /// Run full validation and commit. The block must extend the tip.
    pub async fn connect_block(&self, checked: &CheckedBlock) -> Result<ChainStateUpdate> {
        let result = self.connect_checked(checked).await;
        if let Err(err) = &result {
            self.remember_failure(checked.hash, err).await;
        }
        result
    }

    async fn connect_checked(&self, checked: &CheckedBlock) -> Result<ChainStateUpdate> {
        self.ensure_not_invalid(checked.hash, checked.previous.hash).await?;
        let mut state = self.state.write().await;
        if checked.previous.hash != state.tip.hash {
            return Err(ConsensusError::NotExtendingTip);
        }

        let (changes, fees) = self.apply_full(checked)?;
        let coin_writes = changes.writes.len();
        let chained = ChainedHeader::extend(&checked.previous, checked.block.header.clone());
        let ops = self.headers.advance_ops(&chained.to_stored())?;

        let coins = self.coins.clone();
        tokio::task::spawn_blocking(move || coins.commit(changes, ops))
            .await
            .map_err(|e| ConsensusError::Storage(e.to_string()))??;

        state.tip = Arc::clone(&chained);
        self.index.write().await.insert(Arc::clone(&chained));

        info!(
            height = chained.height,
            hash = %chained.hash,
            txs = checked.block.transactions.len(),
            fees,
            "connected block"
        );
        Ok(ChainStateUpdate {
            hash: chained.hash,
            height: chained.height,
            chain_work: chained.chain_work,
            fees,
            transactions: checked.block.transactions.len(),
            coin_writes,
        })
    }

    /// Full validation over a fresh overlay. Nothing is written; a failure
    /// simply drops the overlay.
    fn apply_full(&self, checked: &CheckedBlock) -> Result<(CoinChanges, Amount)> {
        let mut overlay = CoinViewCache::new(&self.coins);
        let mut ctx = self.block_context(&checked.block, checked.hash, &checked.previous, checked.flags);
        ctx.sigops_cost = checked.sigops_cost;

        for registered in self.rules.phase(Phase::Full) {
            if self.cancel.is_cancelled() {
                return Err(ConsensusError::Cancelled);
            }
            if let Rule::Full(rule) = &registered.rule {
                if let Err(err) = rule(&mut ctx, &mut overlay) {
                    debug!(rule = registered.name, code = err.code(), "full validation failed");
                    return Err(err);
                }
            }
        }
        overlay.set_best_block(checked.hash);
        Ok((overlay.into_changes(), ctx.fees))
    }

    /// Validate a block through every phase and connect it.
    pub async fn validate_block(&self, block: Block) -> Result<ChainStateUpdate> {
        let hash = block.hash();
        let result = match self.check_block(block).await {
            Ok(checked) => self.connect_block(&checked).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!(hash = %hash, code = err.code(), ban = err.should_ban_peer(), "block rejected: {err}");
        }
        result
    }

    fn block_context<'a>(
        &'a self,
        block: &'a Block,
        hash: Hash,
        previous: &'a ChainedHeader,
        flags: DeploymentFlags,
    ) -> BlockContext<'a> {
        BlockContext {
            params: &self.params,
            block,
            hash,
            previous,
            height: previous.height + 1,
            now: self.time.now(),
            flags,
            fees: 0,
            sigops_cost: 0,
            verifier: self.verifier.as_ref(),
            cancel: &self.cancel,
        }
    }

    fn run_header_rules(&self, ctx: &HeaderContext<'_>) -> Result<()> {
        for registered in self.rules.phase(Phase::Header) {
            if let Rule::Header(rule) = &registered.rule {
                if let Err(err) = rule(ctx) {
                    debug!(rule = registered.name, code = err.code(), "header rejected");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn run_block_rules(&self, phase: Phase, ctx: &mut BlockContext<'_>) -> Result<()> {
        for registered in self.rules.phase(phase) {
            if self.cancel.is_cancelled() {
                return Err(ConsensusError::Cancelled);
            }
            let outcome = match &registered.rule {
                Rule::Integrity(rule) | Rule::Partial(rule) => rule(ctx),
                Rule::Header(_) | Rule::Full(_) => continue,
            };
            if let Err(err) = outcome {
                debug!(rule = registered.name, %phase, code = err.code(), "block rejected");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Token observed by every validation loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop in-flight validation. Nothing is committed by a cancelled pass.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

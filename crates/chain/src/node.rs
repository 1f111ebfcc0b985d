//! Node orchestration.
//!
//! This module ties the consensus engine and the mempool together: blocks
//! are validated by the engine and then clear the pool, transactions are
//! admitted against the engine's confirmed coins.

use crate::mempool::{
    Admission, BlockTemplate, MempoolError, MempoolSettings, MempoolStats, MempoolValidator,
    TxMempool,
};
use serde::{Deserialize, Serialize};
use slotchain_consensus::poa::{self, BlockProposer, FederationConfig, FederationError, ProposerError};
use slotchain_consensus::{
    ChainStateUpdate, ChainedHeader, ConsensusError, ConsensusParams, ConsensusRuleEngine,
    TimeSource,
};
use slotchain_core::{Block, BlockHeader, Hash, Interpreter, PublicKey, Script, Transaction, TxOut};
use slotchain_storage::{Storage, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Weight and sigop cost kept free in templates for the coinbase.
const COINBASE_WEIGHT_RESERVE: usize = 4_000;
const COINBASE_SIGOPS_RESERVE: usize = 400;

/// Errors that can occur while setting up or driving a node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("federation error: {0}")]
    Federation(#[from] FederationError),

    #[error("proposer error: {0}")]
    Proposer(#[from] ProposerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// The genesis block as written in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub timestamp: u64,
    /// Hex public key paid by the genesis coinbase. Defaults to the first
    /// federation member.
    pub recipient: Option<String>,
    pub message: String,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            timestamp: 1_700_000_000,
            recipient: None,
            message: "slotchain genesis".into(),
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Database directory. A temporary database is used when unset.
    pub data_dir: Option<PathBuf>,
    pub consensus: ConsensusParams,
    pub mempool: MempoolSettings,
    pub federation: FederationConfig,
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// The genesis block described by this configuration.
    pub fn genesis_block(&self) -> Result<Block> {
        let recipient = match &self.genesis.recipient {
            Some(hex) => PublicKey::from_hex(hex)
                .map_err(|e| NodeError::Config(format!("genesis recipient: {e}")))?,
            None => *self
                .federation
                .to_federation()?
                .members()
                .first()
                .ok_or(FederationError::Empty)?,
        };
        let coinbase = Transaction::coinbase(
            0,
            vec![TxOut::new(
                self.consensus.subsidy(0),
                Script::pay_to_pubkey(&recipient),
            )],
            self.genesis.message.as_bytes(),
        );
        Ok(Block::genesis(
            self.genesis.timestamp,
            self.consensus.poa_bits,
            coinbase,
        ))
    }
}

/// A validating node: the consensus engine plus its mempool.
///
/// Locks are always taken mempool first, chain state second.
pub struct Node {
    engine: ConsensusRuleEngine,
    mempool: RwLock<TxMempool>,
    validator: MempoolValidator,
}

impl Node {
    pub fn new(engine: ConsensusRuleEngine, settings: MempoolSettings) -> Self {
        let validator = MempoolValidator::new(settings, engine.params().clone(), engine.verifier());
        Self {
            engine,
            mempool: RwLock::new(TxMempool::new()),
            validator,
        }
    }

    /// Open a proof-of-authority node from `config`.
    pub fn open(config: &NodeConfig, time: Arc<dyn TimeSource>) -> Result<Self> {
        let federation = Arc::new(config.federation.to_federation()?);
        let storage = match &config.data_dir {
            Some(dir) => Storage::open(dir)?,
            None => Storage::open_temporary()?,
        };
        let genesis = config.genesis_block()?;
        let engine = ConsensusRuleEngine::open(
            storage,
            config.consensus.clone(),
            poa::rule_set(Arc::clone(&federation)),
            Arc::new(Interpreter),
            time,
            &genesis,
        )?;
        info!(members = federation.len(), "node opened");
        Ok(Self::new(engine, config.mempool.clone()))
    }

    pub fn engine(&self) -> &ConsensusRuleEngine {
        &self.engine
    }

    pub fn mempool_settings(&self) -> &MempoolSettings {
        self.validator.settings()
    }

    pub async fn tip(&self) -> Arc<ChainedHeader> {
        self.engine.tip().await
    }

    /// Validate a transaction against the mempool and the current tip and
    /// insert it on success.
    pub async fn try_admit_transaction(
        &self,
        tx: Transaction,
    ) -> std::result::Result<Admission, MempoolError> {
        let txid = tx.txid();
        let mut pool = self.mempool.write().await;
        let state = self.engine.read_state().await;
        let result = self.validator.admit(
            &mut pool,
            self.engine.coin_store(),
            &state.tip,
            self.engine.now(),
            tx,
            &self.engine.cancellation_token(),
        );
        if let Err(err) = &result {
            debug!(%txid, code = err.code(), "transaction rejected: {err}");
        }
        result
    }

    /// Validate a block through every phase, connect it and drop its
    /// transactions and their conflicts from the mempool.
    pub async fn try_validate_block(
        &self,
        block: Block,
    ) -> std::result::Result<ChainStateUpdate, ConsensusError> {
        let hash = block.hash();
        let result = self.connect_and_clear(block).await;
        if let Err(err) = &result {
            warn!(hash = %hash, code = err.code(), ban = err.should_ban_peer(), "block rejected: {err}");
        }
        result
    }

    async fn connect_and_clear(
        &self,
        block: Block,
    ) -> std::result::Result<ChainStateUpdate, ConsensusError> {
        let checked = self.engine.check_block(block).await?;
        let mut pool = self.mempool.write().await;
        let update = self.engine.connect_block(&checked).await?;
        let removed = pool.remove_for_block(&checked.block.transactions);
        debug!(height = update.height, removed, pool_size = pool.len(), "mempool updated for block");
        Ok(update)
    }

    pub async fn accept_header(
        &self,
        header: BlockHeader,
    ) -> std::result::Result<Arc<ChainedHeader>, ConsensusError> {
        self.engine.accept_header(header).await
    }

    /// Select pool transactions for the next block.
    pub async fn block_template(&self) -> BlockTemplate {
        let params = self.engine.params();
        let max_weight = params.max_block_weight.saturating_sub(COINBASE_WEIGHT_RESERVE);
        let max_sigops = params
            .max_block_sigops_cost
            .saturating_sub(COINBASE_SIGOPS_RESERVE);
        self.mempool
            .read()
            .await
            .block_template(max_weight, max_sigops)
    }

    /// Build and sign the next block on the current tip from the mempool.
    pub async fn propose_block(&self, proposer: &BlockProposer, timestamp: u64) -> Result<Block> {
        let template = self.block_template().await;
        let tip = self.tip().await;
        Ok(proposer.propose_block(&tip, timestamp, template.transactions, template.fees)?)
    }

    /// Adjust the fee used to rank `txid`, whether or not it is in the pool.
    pub async fn prioritise_transaction(&self, txid: Hash, delta: i64) {
        self.mempool.write().await.prioritise_transaction(txid, delta);
    }

    pub async fn mempool_contains(&self, txid: &Hash) -> bool {
        self.mempool.read().await.contains(txid)
    }

    pub async fn mempool_stats(&self) -> MempoolStats {
        self.mempool.read().await.stats()
    }

    /// Cancel in-flight validation and admission.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::Keypair;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: NodeConfig = serde_json::from_str(r#"{"genesis": {"timestamp": 42}}"#).unwrap();
        assert_eq!(config.genesis.timestamp, 42);
        assert_eq!(config.genesis.message, "slotchain genesis");
        assert_eq!(config.mempool, MempoolSettings::default());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_genesis_pays_first_member() {
        let member = Keypair::generate();
        let config = NodeConfig {
            federation: FederationConfig {
                members: vec![member.public_key.to_hex()],
                slot_spacing_seconds: 16,
            },
            ..NodeConfig::default()
        };
        let genesis = config.genesis_block().unwrap();
        assert!(genesis.is_genesis());
        let coinbase = &genesis.transactions[0];
        assert_eq!(coinbase.outputs[0].value, config.consensus.subsidy(0));
        assert_eq!(
            coinbase.outputs[0].script_pubkey,
            Script::pay_to_pubkey(&member.public_key)
        );
    }

    #[test]
    fn test_genesis_needs_a_recipient() {
        let err = NodeConfig::default().genesis_block().unwrap_err();
        assert!(matches!(err, NodeError::Federation(FederationError::Empty)));
    }
}

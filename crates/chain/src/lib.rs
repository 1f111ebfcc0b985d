//! Node orchestration for slotchain.
//!
//! This crate puts the validating pieces together:
//! - **Mempool**: the unconfirmed transaction pool and its ordered admission
//!   pipeline (replacement, package limits, fee floors, script checks, dust)
//! - **Node**: the consensus engine and the mempool behind one lock order,
//!   with block templates for the local signer
//!
//! # Example
//!
//! ```rust,no_run
//! use slotchain_chain::{Node, NodeConfig};
//! use slotchain_consensus::poa::{BlockProposer, FederationConfig};
//! use slotchain_consensus::SystemTimeSource;
//! use slotchain_core::Keypair;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Keypair::generate();
//! let config = NodeConfig {
//!     federation: FederationConfig {
//!         members: vec![signer.public_key.to_hex()],
//!         slot_spacing_seconds: 16,
//!     },
//!     ..NodeConfig::default()
//! };
//!
//! let node = Node::open(&config, Arc::new(SystemTimeSource))?;
//! let federation = Arc::new(config.federation.to_federation()?);
//! let proposer = BlockProposer::new(signer, federation, config.consensus.clone());
//!
//! // Submit transactions, then sign the next block in our slot
//! let timestamp = node.tip().await.header.timestamp + 16;
//! let block = node.propose_block(&proposer, timestamp).await?;
//! node.try_validate_block(block).await?;
//! # Ok(())
//! # }
//! ```

pub mod mempool;
pub mod node;

// Re-export commonly used types
pub use mempool::{
    Admission, BlockTemplate, FeeRate, MempoolEntry, MempoolError, MempoolSettings, MempoolStats,
    MempoolValidator, TxMempool,
};
pub use node::{GenesisConfig, Node, NodeConfig, NodeError};

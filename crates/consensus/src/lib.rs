//! Consensus for slotchain.
//!
//! This crate provides:
//! - A phased rule engine (header, integrity, partial, full validation)
//!   with atomic coin view updates
//! - The header tree and median-time-past
//! - Absolute and relative lock-time evaluation
//! - The proof-of-authority slot and signature protocol
//!
//! # Example
//!
//! ```rust,no_run
//! use slotchain_consensus::poa::{self, Federation};
//! use slotchain_consensus::{ConsensusParams, ConsensusRuleEngine, SystemTimeSource};
//! use slotchain_core::{Block, Interpreter, Keypair, Script, Transaction, TxOut, COIN};
//! use slotchain_storage::Storage;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Keypair::generate();
//! let federation = Arc::new(Federation::new(vec![signer.public_key], 16)?);
//! let params = ConsensusParams::default();
//!
//! let coinbase = Transaction::coinbase(
//!     0,
//!     vec![TxOut::new(50 * COIN, Script::pay_to_pubkey(&signer.public_key))],
//!     b"genesis",
//! );
//! let genesis = Block::genesis(1_700_000_000, params.poa_bits, coinbase);
//!
//! let engine = ConsensusRuleEngine::open(
//!     Storage::open("./slotchain_data")?,
//!     params,
//!     poa::rule_set(federation),
//!     Arc::new(Interpreter),
//!     Arc::new(SystemTimeSource),
//!     &genesis,
//! )?;
//! println!("tip at height {}", engine.tip().await.height);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod engine;
pub mod error;
pub mod locktime;
pub mod params;
pub mod poa;
pub mod rules;
pub mod time;

// Re-export commonly used types
pub use chain::{ChainIndex, ChainedHeader};
pub use engine::{ChainState, ChainStateUpdate, CheckedBlock, ConsensusRuleEngine};
pub use error::{ConsensusError, Result};
pub use locktime::{calculate_sequence_locks, evaluate_sequence_locks, LockPoints};
pub use params::ConsensusParams;
pub use rules::{DeploymentFlags, Phase, RuleSet};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};

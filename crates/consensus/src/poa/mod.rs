//! Proof-of-authority slot and signature protocol.
//!
//! A fixed federation takes turns signing blocks. The protocol is just a
//! rule set for the engine: slot and signature checks run in the header
//! phase, the body signature check in the integrity phase, and every other
//! rule is shared with any other chain built on the engine.

pub mod federation;
pub mod miner;
pub mod rules;

pub use federation::{Federation, FederationConfig, FederationError};
pub use miner::{BlockProposer, MinerState, ProposerError, SlotMiner};
pub use rules::rule_set;

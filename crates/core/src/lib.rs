//! Core blockchain primitives for slotchain.
//!
//! This crate provides the fundamental types used throughout the node:
//! - Cryptographic primitives (hashing, canonical signatures, addresses)
//! - Scripts and the reference script interpreter
//! - Transactions in the unspent-output model
//! - Blocks and block headers
//! - Merkle roots

pub mod block;
pub mod crypto;
pub mod hash;
pub mod interpreter;
pub mod merkle;
pub mod script;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockHeader};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, hash_serialized, Hash, H256};
pub use interpreter::{Interpreter, ScriptError, ScriptFlags, ScriptVerifier};
pub use merkle::{merkle_root, merkle_root_checked};
pub use script::{Script, ScriptTemplate};
pub use transaction::{
    Amount, OutPoint, Transaction, TransactionError, TxIn, TxOut, COIN, MAX_MONEY,
};

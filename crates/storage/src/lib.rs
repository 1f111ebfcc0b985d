//! Persistent storage layer for slotchain.
//!
//! This crate provides the storage backend for the node:
//! - The unspent-output set (coin view), persisted in sled
//! - A layered in-memory overlay used while validating
//! - Header storage and chain head tracking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Validation Layer                       │
//! │          (Consensus Rule Engine, Mempool)                │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                   Storage Layer                          │
//! │  ┌──────────────┐  ┌─────────────┐  ┌────────────────┐  │
//! │  │CoinViewCache │  │ HeaderStore │  │ Storage (DB)   │  │
//! │  │  - overlay   │  │  - by hash  │  │  - sled wrapper│  │
//! │  │  - dirty set │  │  - by height│  │  - atomic batch│  │
//! │  ├──────────────┤  │  - head     │  │  - key helpers │  │
//! │  │ CoinStore    │  │             │  │                │  │
//! │  └──────────────┘  └─────────────┘  └────────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use slotchain_storage::{CoinStore, CoinViewCache, Storage};
//! use slotchain_core::{Script, Transaction, TxOut, COIN};
//!
//! let storage = Storage::open("./slotchain_data").unwrap();
//! let coins = CoinStore::new(storage);
//!
//! let coinbase = Transaction::coinbase(0, vec![TxOut::new(50 * COIN, Script::new())], b"");
//! let mut overlay = CoinViewCache::new(&coins);
//! overlay.add_transaction(&coinbase, 0).unwrap();
//! coins.commit(overlay.into_changes(), vec![]).unwrap();
//! ```

pub mod cache;
pub mod coins;
pub mod db;
pub mod headers;
pub mod store;

// Re-export commonly used types
pub use cache::{CoinChanges, CoinViewCache, SpentCoin};
pub use coins::{CoinView, Coins, MEMPOOL_HEIGHT};
pub use db::{BatchOp, Result, Storage, StorageError};
pub use headers::{HeaderStore, StoredHeader};
pub use store::CoinStore;

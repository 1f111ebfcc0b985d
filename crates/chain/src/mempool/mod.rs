//! Transaction mempool.
//!
//! The pool stores unconfirmed transactions waiting to be included in a
//! block, together with the package aggregates used for fee-rate ordering,
//! replacement and eviction. Admission runs the ordered rule pipeline in
//! [`rules`] and only touches the pool once every rule has passed.

pub mod entry;
pub mod error;
pub mod fees;
pub mod pool;
pub mod rules;
pub mod settings;
pub mod validator;
pub mod view;

pub use entry::MempoolEntry;
pub use error::{MempoolError, Result};
pub use fees::FeeRate;
pub use pool::{AncestorLimits, BlockTemplate, MempoolStats, TxMempool};
pub use rules::{AdmissionEnv, AdmissionPipeline, MempoolValidationContext};
pub use settings::MempoolSettings;
pub use validator::{Admission, MempoolValidator};
pub use view::MempoolCoinView;

//! # txbridge Engine
//!
//! Store engine call table and error registry for txbridge.
//!
//! This crate is the boundary between the binding layer and a transactional
//! key-value store. Engines are **opaque collaborators**: they own native
//! transactions and pending results and expose them through integer-like
//! handles ([`TransactionId`], [`FutureId`]).
//!
//! ## Design Principles
//!
//! - Every failure is an integer [`ErrorCode`]; the engine owns the
//!   code-to-message registry and the retry category of each code
//! - Asynchronous calls return a [`FutureId`]; results are read back with
//!   typed getters once the future is ready
//! - Completion callbacks may run on any thread
//! - Engines must be `Send + Sync`
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - In-memory MVCC engine for tests, demos and the CLI
//!
//! ## Example
//!
//! ```rust
//! use txbridge_engine::{EngineConfig, MemoryEngine, StoreEngine};
//!
//! let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
//! let tr = engine.transaction_create().unwrap();
//! engine.transaction_set(tr, b"hello", b"world");
//! let commit = engine.transaction_commit(tr);
//! while !engine.future_is_ready(commit) {
//!     std::thread::yield_now();
//! }
//! assert!(engine.future_get_error(commit).is_ok());
//! engine.future_destroy(commit);
//! engine.transaction_destroy(tr);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod config;
mod engine;
mod error;
mod memory;
mod stats;
mod types;

pub use atomic::apply_mutation;
pub use config::EngineConfig;
pub use engine::{FutureCallback, StoreEngine};
pub use error::{
    codes, error_category, error_message, EngineError, EngineResult, ErrorCategory, ErrorCode,
};
pub use memory::{options, MemoryEngine};
pub use stats::{EngineStats, StatsSnapshot};
pub use types::{
    ConflictRangeType, FutureId, KeyValue, MutationType, RangeArgs, ResultKind, SelectorArgs,
    StreamingMode, TransactionId,
};

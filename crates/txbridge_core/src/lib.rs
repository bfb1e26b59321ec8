//! # txbridge Core
//!
//! Client-side transaction API over a [`StoreEngine`].
//!
//! This crate provides:
//! - Transaction handles with an explicit lifecycle
//! - An async operation bridge that delivers each result exactly once on
//!   the caller's thread
//! - Key selectors and paged range requests
//! - Watches that outlive their transaction
//!
//! ## Delivery model
//!
//! Engine completions may arrive on any thread. They are queued into the
//! [`CallerContext`] that issued the operation and only run caller code
//! when the owner dispatches that context.
//!
//! ```rust,ignore
//! use txbridge_core::{CallerContext, Client};
//! use txbridge_engine::MemoryEngine;
//!
//! let client = Client::new(Arc::new(MemoryEngine::with_defaults()?));
//! let ctx = CallerContext::new();
//! let tr = client.create_transaction(&ctx)?;
//!
//! tr.get("counter", false)?.on_ready(|value| {
//!     println!("counter = {value:?}");
//! })?;
//! while ctx.pending_operations() > 0 {
//!     ctx.dispatch_next(Duration::from_millis(50));
//! }
//! ```
//!
//! [`StoreEngine`]: txbridge_engine::StoreEngine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod context;
mod error;
mod operation;
mod param;
mod selector;
mod transaction;
mod watch;

pub use client::Client;
pub use config::ClientConfig;
pub use context::CallerContext;
pub use error::{CoreError, CoreResult};
pub use operation::{AsyncOperation, OperationState};
pub use param::ByteParam;
pub use selector::{strinc, KeySelector, RangeRequest, RangeResult};
pub use transaction::{TransactionHandle, TransactionState};
pub use watch::{WatchHandle, WatchState};

pub use txbridge_engine::{codes, ErrorCode, KeyValue, MutationType, StreamingMode};

//! # txbridge Testkit
//!
//! Test utilities for txbridge.
//!
//! This crate provides:
//! - A test bed wiring a client, a caller context and an in-memory engine
//! - Property-based test generators using proptest
//! - Interleaving stress runs for cancellation races and contended retries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txbridge_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_bed() {
//!     with_test_bed(|bed| {
//!         bed.write(&[("k", "v")]);
//!         assert_eq!(bed.read("k"), Some(b"v".to_vec()));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

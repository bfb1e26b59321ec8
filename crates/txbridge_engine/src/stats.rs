//! Engine statistics.
//!
//! Counters for the handles an engine hands out. Tests use them to check
//! that a binding releases every native future and transaction exactly once.
//!
//! # Usage
//!
//! ```rust,ignore
//! use txbridge_engine::{EngineConfig, MemoryEngine};
//!
//! let engine = MemoryEngine::new(EngineConfig::default())?;
//! // ... run transactions ...
//! let stats = engine.stats();
//! assert_eq!(stats.live_futures, 0);
//! assert_eq!(stats.double_releases, 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineStats {
    futures_created: AtomicU64,
    futures_destroyed: AtomicU64,
    /// `future_destroy` calls on ids that were already released.
    double_releases: AtomicU64,
    transactions_created: AtomicU64,
    transactions_destroyed: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    watches_fired: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_future_created(&self) {
        self.futures_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_future_destroyed(&self) {
        self.futures_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_double_release(&self) {
        self.double_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_created(&self) {
        self.transactions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_destroyed(&self) {
        self.transactions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_watch_fired(&self) {
        self.watches_fired.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    ///
    /// `live_futures` and `live_transactions` are derived from the
    /// created/destroyed counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let futures_created = self.futures_created.load(Ordering::Relaxed);
        let futures_destroyed = self.futures_destroyed.load(Ordering::Relaxed);
        let transactions_created = self.transactions_created.load(Ordering::Relaxed);
        let transactions_destroyed = self.transactions_destroyed.load(Ordering::Relaxed);
        StatsSnapshot {
            futures_created,
            futures_destroyed,
            live_futures: futures_created.saturating_sub(futures_destroyed),
            double_releases: self.double_releases.load(Ordering::Relaxed),
            transactions_created,
            transactions_destroyed,
            live_transactions: transactions_created.saturating_sub(transactions_destroyed),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            watches_fired: self.watches_fired.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Native futures handed out.
    pub futures_created: u64,
    /// Native futures released.
    pub futures_destroyed: u64,
    /// Native futures not yet released.
    pub live_futures: u64,
    /// Releases of futures that no longer existed.
    pub double_releases: u64,
    /// Native transactions created.
    pub transactions_created: u64,
    /// Native transactions released.
    pub transactions_destroyed: u64,
    /// Native transactions not yet released.
    pub live_transactions: u64,
    /// Successful commits that wrote data.
    pub commits: u64,
    /// Commits rejected with a conflict.
    pub conflicts: u64,
    /// Watches that fired.
    pub watches_fired: u64,
}

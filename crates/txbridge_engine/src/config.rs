//! Engine configuration.

use std::time::Duration;

/// Configuration for the in-memory engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the worker thread that completes futures.
    pub worker_name: String,

    /// Backoff applied by the first `on_error` retry.
    pub retry_backoff_initial: Duration,

    /// Upper bound of the `on_error` backoff.
    pub retry_backoff_max: Duration,

    /// Maximum key size in bytes.
    pub max_key_size: usize,

    /// Maximum value size in bytes.
    pub max_value_size: usize,

    /// Maximum number of outstanding watches.
    pub max_watches: usize,

    /// Number of committed versions kept readable behind the latest one.
    pub version_window: u64,

    /// Storage addresses reported by `get_addresses_for_key`.
    pub storage_addresses: Vec<String>,

    /// Number of addresses reported per key.
    pub replication_factor: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_name: "txbridge-engine".into(),
            retry_backoff_initial: Duration::from_millis(10),
            retry_backoff_max: Duration::from_secs(1),
            max_key_size: 10_000,
            max_value_size: 100_000,
            max_watches: 10_000,
            version_window: 5_000_000,
            storage_addresses: vec![
                "127.0.0.1:4500".into(),
                "127.0.0.1:4501".into(),
                "127.0.0.1:4502".into(),
            ],
            replication_factor: 2,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the `on_error` backoff bounds.
    #[must_use]
    pub const fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff_initial = initial;
        self.retry_backoff_max = max;
        self
    }

    /// Disables `on_error` backoff. Useful in tests.
    #[must_use]
    pub const fn no_backoff(self) -> Self {
        self.retry_backoff(Duration::ZERO, Duration::ZERO)
    }

    /// Sets the maximum key size.
    #[must_use]
    pub const fn max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the maximum value size.
    #[must_use]
    pub const fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Sets the maximum number of outstanding watches.
    #[must_use]
    pub const fn max_watches(mut self, count: usize) -> Self {
        self.max_watches = count;
        self
    }

    /// Sets the number of readable versions behind the latest commit.
    #[must_use]
    pub const fn version_window(mut self, versions: u64) -> Self {
        self.version_window = versions;
        self
    }

    /// Sets the reported storage addresses and replication factor.
    #[must_use]
    pub fn storage_addresses(mut self, addresses: Vec<String>, replication: usize) -> Self {
        self.storage_addresses = addresses;
        self.replication_factor = replication;
        self
    }

    /// Backoff for the given retry attempt (0-indexed), doubling each time.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.retry_backoff_initial
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

//! Client configuration.

use txbridge_engine::StreamingMode;

/// Configuration applied to every transaction a [`crate::Client`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Streaming mode of range requests built with
    /// [`crate::TransactionHandle::range`].
    pub default_streaming_mode: StreamingMode,

    /// Log every issued operation at debug level instead of trace.
    pub trace_operations: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_streaming_mode: StreamingMode::Iterator,
            trace_operations: false,
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default streaming mode.
    #[must_use]
    pub const fn default_streaming_mode(mut self, mode: StreamingMode) -> Self {
        self.default_streaming_mode = mode;
        self
    }

    /// Enables or disables debug-level operation logging.
    #[must_use]
    pub const fn trace_operations(mut self, enabled: bool) -> Self {
        self.trace_operations = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.default_streaming_mode, StreamingMode::Iterator);
        assert!(!config.trace_operations);
    }

    #[test]
    fn builder_pattern() {
        let config = ClientConfig::new()
            .default_streaming_mode(StreamingMode::WantAll)
            .trace_operations(true);
        assert_eq!(config.default_streaming_mode, StreamingMode::WantAll);
        assert!(config.trace_operations);
    }
}

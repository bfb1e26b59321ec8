//! Property-based test generators using proptest.
//!
//! Provides strategies for datasets, keys and range request shapes that
//! the engine accepts.

use proptest::prelude::*;
use std::collections::BTreeMap;
use txbridge_core::{KeySelector, RangeRequest, StreamingMode};

/// Strategy for user-keyspace keys (never starting with `0xff`).
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..12).prop_filter("user keyspace only", |key| key[0] != 0xff)
}

/// Strategy for values, including empty ones.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..300)
}

/// Strategy for a sorted dataset of distinct keys.
pub fn dataset_strategy(max_keys: usize) -> impl Strategy<Value = BTreeMap<Vec<u8>, Vec<u8>>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..max_keys)
}

/// Strategy for every streaming mode.
pub fn streaming_mode_strategy() -> impl Strategy<Value = StreamingMode> {
    prop_oneof![
        Just(StreamingMode::WantAll),
        Just(StreamingMode::Iterator),
        Just(StreamingMode::Exact),
        Just(StreamingMode::Small),
        Just(StreamingMode::Medium),
        Just(StreamingMode::Large),
        Just(StreamingMode::Serial),
    ]
}

/// Paging parameters for a range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageShape {
    /// Row limit per batch; zero means unlimited.
    pub limit: i32,
    /// Byte target per batch; zero means the mode decides.
    pub target_bytes: i32,
    /// Streaming mode.
    pub mode: StreamingMode,
    /// Scan direction.
    pub reverse: bool,
}

impl PageShape {
    /// Builds a request over the whole user keyspace.
    pub fn full_range(&self) -> RangeRequest {
        self.apply(RangeRequest::new(
            KeySelector::first_greater_or_equal(b"".as_slice()),
            KeySelector::first_greater_or_equal(b"\xff".as_slice()),
        ))
    }

    /// Applies the shape to `request`.
    pub fn apply(&self, request: RangeRequest) -> RangeRequest {
        request
            .with_limit(self.limit)
            .with_target_bytes(self.target_bytes)
            .with_mode(self.mode)
            .reverse(self.reverse)
    }
}

/// Strategy for paging parameters the engine accepts.
///
/// `Exact` always carries a limit.
pub fn page_shape_strategy() -> impl Strategy<Value = PageShape> {
    (
        0..8i32,
        prop_oneof![Just(0), 1..2_000i32],
        streaming_mode_strategy(),
        any::<bool>(),
    )
        .prop_map(|(limit, target_bytes, mode, reverse)| {
            let limit = if mode == StreamingMode::Exact { limit.max(1) } else { limit };
            PageShape {
                limit,
                target_bytes,
                mode,
                reverse,
            }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

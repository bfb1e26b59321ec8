//! Key selectors, range requests and the pagination protocol.
//!
//! A [`KeySelector`] names a position in the ordered keyspace relative to a
//! reference key, without requiring that key to exist. A [`RangeRequest`]
//! describes one batch of a range scan; [`RangeRequest::continuation`]
//! derives the request for the next batch from a [`RangeResult`].
//!
//! # Pagination
//!
//! ```rust,ignore
//! let mut request = RangeRequest::new(
//!     KeySelector::first_greater_or_equal(b"a"),
//!     KeySelector::first_greater_or_equal(b"b"),
//! )
//! .with_limit(100);
//!
//! loop {
//!     let page = read(&request)?;
//!     consume(&page.key_values);
//!     match request.continuation(&page) {
//!         Some(next) => request = next,
//!         None => break,
//!     }
//! }
//! ```

use crate::param::ByteParam;
use std::ops::Add;
use txbridge_engine::{KeyValue, RangeArgs, SelectorArgs, StreamingMode};

/// A logical key position: `offset` positions from the first key greater
/// than `key`, or greater than or equal to it when `or_equal` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySelector {
    key: Vec<u8>,
    or_equal: bool,
    offset: i32,
}

impl KeySelector {
    /// Creates a selector from its raw parts.
    pub fn new<'a>(key: impl Into<ByteParam<'a>>, or_equal: bool, offset: i32) -> Self {
        Self {
            key: ByteParam::into_bytes(key.into()),
            or_equal,
            offset,
        }
    }

    /// The first key greater than or equal to `key`.
    pub fn first_greater_or_equal<'a>(key: impl Into<ByteParam<'a>>) -> Self {
        Self::new(key, true, 0)
    }

    /// The first key strictly greater than `key`.
    pub fn first_greater_than<'a>(key: impl Into<ByteParam<'a>>) -> Self {
        Self::new(key, false, 0)
    }

    /// The last key strictly less than `key`.
    pub fn last_less_than<'a>(key: impl Into<ByteParam<'a>>) -> Self {
        Self::new(key, true, -1)
    }

    /// The last key less than or equal to `key`.
    pub fn last_less_or_equal<'a>(key: impl Into<ByteParam<'a>>) -> Self {
        Self::new(key, false, -1)
    }

    /// Reference key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether the base position includes the reference key.
    pub fn or_equal(&self) -> bool {
        self.or_equal
    }

    /// Position offset from the base position.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub(crate) fn as_args(&self) -> SelectorArgs<'_> {
        SelectorArgs {
            key: &self.key,
            or_equal: self.or_equal,
            offset: self.offset,
        }
    }
}

impl Add<i32> for KeySelector {
    type Output = KeySelector;

    fn add(mut self, offset: i32) -> KeySelector {
        self.offset = self.offset.saturating_add(offset);
        self
    }
}

/// One batch request of a range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    /// Inclusive begin position.
    pub begin: KeySelector,
    /// Exclusive end position.
    pub end: KeySelector,
    /// Maximum rows in the batch; 0 means unbounded.
    pub limit: i32,
    /// Byte target of the batch; 0 means unbounded.
    pub target_bytes: i32,
    /// Batching hint.
    pub mode: StreamingMode,
    /// Batch counter of the scan, starting at 0.
    pub iteration: i32,
    /// Read without adding a read conflict range.
    pub snapshot: bool,
    /// Return rows in descending key order.
    pub reverse: bool,
}

impl RangeRequest {
    /// Creates a request for `[begin, end)` with default settings.
    pub fn new(begin: KeySelector, end: KeySelector) -> Self {
        Self {
            begin,
            end,
            limit: 0,
            target_bytes: 0,
            mode: StreamingMode::default(),
            iteration: 0,
            snapshot: false,
            reverse: false,
        }
    }

    /// Creates a request for every key starting with `prefix`.
    pub fn prefix<'a>(prefix: impl Into<ByteParam<'a>>) -> Self {
        let begin = ByteParam::into_bytes(prefix.into());
        let end = strinc(&begin);
        Self::new(
            KeySelector::first_greater_or_equal(begin),
            KeySelector::first_greater_or_equal(end),
        )
    }

    /// Sets the row limit.
    #[must_use]
    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the byte target.
    #[must_use]
    pub fn with_target_bytes(mut self, target_bytes: i32) -> Self {
        self.target_bytes = target_bytes;
        self
    }

    /// Sets the streaming mode.
    #[must_use]
    pub fn with_mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the iteration counter.
    #[must_use]
    pub fn with_iteration(mut self, iteration: i32) -> Self {
        self.iteration = iteration;
        self
    }

    /// Makes the read a snapshot read.
    #[must_use]
    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Reverses the scan order.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Derives the request for the batch after `page`.
    ///
    /// Returns `None` when `page` was the last batch. Forward scans resume
    /// after the last key returned; reverse scans end before it. Every other
    /// setting is carried over and `iteration` is incremented.
    pub fn continuation(&self, page: &RangeResult) -> Option<RangeRequest> {
        if !page.more {
            return None;
        }
        let last = page.key_values.last()?;
        let mut next = self.clone();
        if self.reverse {
            next.end = KeySelector::first_greater_or_equal(last.key.as_slice());
        } else {
            next.begin = KeySelector::first_greater_than(last.key.as_slice());
        }
        next.iteration = self.iteration.saturating_add(1);
        Some(next)
    }

    pub(crate) fn as_args(&self) -> RangeArgs<'_> {
        RangeArgs {
            begin: self.begin.as_args(),
            end: self.end.as_args(),
            limit: self.limit,
            target_bytes: self.target_bytes,
            mode: self.mode,
            iteration: self.iteration,
            snapshot: self.snapshot,
            reverse: self.reverse,
        }
    }
}

/// One batch of a range read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeResult {
    /// Pairs in scan order.
    pub key_values: Vec<KeyValue>,
    /// Whether more matching pairs remain after this batch.
    pub more: bool,
}

impl RangeResult {
    /// Number of pairs in the batch.
    pub fn len(&self) -> usize {
        self.key_values.len()
    }

    /// Returns true if the batch holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.key_values.is_empty()
    }

    /// Key of the last pair in the batch.
    pub fn last_key(&self) -> Option<&[u8]> {
        self.key_values.last().map(|kv| kv.key.as_slice())
    }
}

/// First key that does not start with `prefix`.
///
/// Trailing `0xff` bytes are dropped before incrementing. A prefix made
/// only of `0xff` bytes maps to the end of the user keyspace.
pub fn strinc(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xff {
            end.pop();
        } else {
            if let Some(byte) = end.last_mut() {
                *byte += 1;
            }
            return end;
        }
    }
    b"\xff".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(keys: &[&[u8]], more: bool) -> RangeResult {
        RangeResult {
            key_values: keys.iter().map(|k| KeyValue::new(*k, Vec::new())).collect(),
            more,
        }
    }

    #[test]
    fn selector_helpers() {
        let sel = KeySelector::first_greater_or_equal("k");
        assert_eq!((sel.key(), sel.or_equal(), sel.offset()), (&b"k"[..], true, 0));
        let sel = KeySelector::first_greater_than("k");
        assert_eq!((sel.or_equal(), sel.offset()), (false, 0));
        let sel = KeySelector::last_less_than("k");
        assert_eq!((sel.or_equal(), sel.offset()), (true, -1));
        let sel = KeySelector::last_less_or_equal("k");
        assert_eq!((sel.or_equal(), sel.offset()), (false, -1));
    }

    #[test]
    fn selector_offset_adjustment() {
        let sel = KeySelector::first_greater_or_equal(b"k") + 3;
        assert_eq!(sel.offset(), 3);
        let sel = KeySelector::last_less_than(b"k") + -2;
        assert_eq!(sel.offset(), -3);
    }

    #[test]
    fn continuation_resumes_after_last_key() {
        let request = RangeRequest::new(
            KeySelector::first_greater_or_equal(b"a"),
            KeySelector::first_greater_or_equal(b"z"),
        )
        .with_limit(2)
        .with_mode(StreamingMode::Small);

        let next = request.continuation(&page(&[b"a", b"b"], true)).unwrap();
        assert_eq!(next.begin, KeySelector::first_greater_than(b"b"));
        assert_eq!(next.end, request.end);
        assert_eq!(next.iteration, 1);
        assert_eq!(next.limit, 2);
        assert_eq!(next.mode, StreamingMode::Small);
    }

    #[test]
    fn reverse_continuation_moves_the_end() {
        let request = RangeRequest::new(
            KeySelector::first_greater_or_equal(b"a"),
            KeySelector::first_greater_or_equal(b"z"),
        )
        .reverse(true);

        let next = request.continuation(&page(&[b"y", b"x"], true)).unwrap();
        assert_eq!(next.begin, request.begin);
        assert_eq!(next.end, KeySelector::first_greater_or_equal(b"x"));
    }

    #[test]
    fn no_continuation_after_last_page() {
        let request = RangeRequest::prefix("p");
        assert!(request.continuation(&page(&[b"p1"], false)).is_none());
        assert!(request.continuation(&page(&[], true)).is_none());
    }

    #[test]
    fn prefix_range_bounds() {
        let request = RangeRequest::prefix(b"ab");
        assert_eq!(request.begin.key(), b"ab");
        assert_eq!(request.end.key(), b"ac");

        assert_eq!(strinc(b"a\xff\xff"), b"b".to_vec());
        assert_eq!(strinc(b"\xff"), b"\xff".to_vec());
    }

    #[test]
    fn range_result_accessors() {
        let result = page(&[b"a", b"b"], false);
        assert_eq!(result.len(), 2);
        assert_eq!(result.last_key(), Some(&b"b"[..]));
        assert!(RangeResult::default().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn strinc_bounds_every_extension(
            prefix in proptest::collection::vec(0u8..0xff, 1..6),
            suffix in proptest::collection::vec(proptest::num::u8::ANY, 0..6),
        ) {
            let end = strinc(&prefix);
            let mut key = prefix.clone();
            key.extend_from_slice(&suffix);
            proptest::prop_assert!(key < end);
            proptest::prop_assert!(prefix < end);
        }
    }
}

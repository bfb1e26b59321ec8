//! Multi-version key-value map with a commit log for conflict detection.

use crate::atomic::apply_mutation;
use crate::types::{KeyValue, MutationType, RangeArgs, SelectorArgs, StreamingMode};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

/// First key of the system keyspace; user keys sort strictly below it.
pub(crate) const SYSTEM_PREFIX: &[u8] = b"\xff";

/// A half-open key range `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyRange {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// The range holding exactly `key`.
    pub fn single(key: &[u8]) -> Self {
        Self::new(key, key_after(key))
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Smallest key strictly greater than `key`.
pub(crate) fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// A staged mutation, applied in staging order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Clear { key: Vec<u8> },
    ClearRange { begin: Vec<u8>, end: Vec<u8> },
    Atomic {
        key: Vec<u8>,
        operand: Vec<u8>,
        mutation: MutationType,
    },
}

impl Mutation {
    /// The key range this mutation writes.
    pub fn write_range(&self) -> KeyRange {
        match self {
            Mutation::Set { key, .. } | Mutation::Clear { key } | Mutation::Atomic { key, .. } => {
                KeyRange::single(key)
            }
            Mutation::ClearRange { begin, end } => KeyRange::new(begin.clone(), end.clone()),
        }
    }
}

/// Keys written by one commit.
#[derive(Debug)]
struct CommitRecord {
    version: i64,
    writes: Vec<KeyRange>,
}

/// Changes produced by folding staged mutations over a base version:
/// `Some(value)` for written keys, `None` for cleared ones.
pub(crate) type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// The committed state of the store.
#[derive(Debug, Default)]
pub(crate) struct VersionedStore {
    /// Per-key version chains, ascending by version.
    data: BTreeMap<Vec<u8>, Vec<(i64, Option<Vec<u8>>)>>,
    version: i64,
    commits: VecDeque<CommitRecord>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed version.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Value of `key` as of `version`.
    pub fn get_at(&self, key: &[u8], version: i64) -> Option<&[u8]> {
        self.data.get(key).and_then(|chain| {
            chain
                .iter()
                .rev()
                .find(|(v, _)| *v <= version)
                .and_then(|(_, value)| value.as_deref())
        })
    }

    /// Latest committed value of `key`.
    pub fn get_latest(&self, key: &[u8]) -> Option<&[u8]> {
        self.get_at(key, self.version)
    }

    /// Keys in `[begin, end)` that hold a value at `version`.
    fn keys_in(&self, begin: &[u8], end: &[u8], version: i64) -> Vec<Vec<u8>> {
        if begin >= end {
            return Vec::new();
        }
        self.data
            .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            .filter(|(key, _)| self.get_at(key, version).is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Folds `mutations` in order over the state at `version`.
    pub fn fold(&self, version: i64, mutations: &[Mutation], max_value_size: usize) -> Overlay {
        let mut overlay = Overlay::new();
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    overlay.insert(key.clone(), Some(value.clone()));
                }
                Mutation::Clear { key } => {
                    overlay.insert(key.clone(), None);
                }
                Mutation::ClearRange { begin, end } => {
                    if begin >= end {
                        continue;
                    }
                    let mut cleared = self.keys_in(begin, end, version);
                    cleared.extend(
                        overlay
                            .range::<[u8], _>((
                                Bound::Included(begin.as_slice()),
                                Bound::Excluded(end.as_slice()),
                            ))
                            .map(|(key, _)| key.clone()),
                    );
                    for key in cleared {
                        overlay.insert(key, None);
                    }
                }
                Mutation::Atomic {
                    key,
                    operand,
                    mutation,
                } => {
                    let current = match overlay.get(key) {
                        Some(staged) => staged.clone(),
                        None => self.get_at(key, version).map(<[u8]>::to_vec),
                    };
                    let next = apply_mutation(current.as_deref(), operand, *mutation, max_value_size);
                    overlay.insert(key.clone(), next);
                }
            }
        }
        overlay
    }

    /// Sorted user-keyspace pairs at `version` with `overlay` applied on top.
    pub fn view(&self, version: i64, overlay: &Overlay) -> Vec<KeyValue> {
        let mut merged: BTreeMap<&[u8], &[u8]> = BTreeMap::new();
        for (key, _) in self.data.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(SYSTEM_PREFIX))) {
            if let Some(value) = self.get_at(key, version) {
                merged.insert(key, value);
            }
        }
        for (key, value) in overlay {
            if key.as_slice() >= SYSTEM_PREFIX {
                continue;
            }
            match value {
                Some(value) => merged.insert(key, value),
                None => merged.remove(key.as_slice()),
            };
        }
        merged
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect()
    }

    /// True if a commit after `read_version` wrote into any of `reads`.
    pub fn conflicts(&self, read_version: i64, reads: &[KeyRange]) -> bool {
        self.commits
            .iter()
            .filter(|commit| commit.version > read_version)
            .any(|commit| {
                commit
                    .writes
                    .iter()
                    .any(|write| reads.iter().any(|read| read.intersects(write)))
            })
    }

    /// Writes `overlay` at a new version and records `writes` in the commit
    /// log. Returns the new version.
    pub fn apply(&mut self, overlay: Overlay, writes: Vec<KeyRange>, version_window: u64) -> i64 {
        let version = self.version + 1;
        for (key, value) in overlay {
            self.data.entry(key).or_default().push((version, value));
        }
        self.version = version;
        self.commits.push_back(CommitRecord { version, writes });

        let oldest = self.oldest_readable(version_window);
        while self
            .commits
            .front()
            .is_some_and(|commit| commit.version < oldest)
        {
            self.commits.pop_front();
        }
        version
    }

    /// Oldest version still readable given the retention window.
    pub fn oldest_readable(&self, version_window: u64) -> i64 {
        let window = i64::try_from(version_window).unwrap_or(i64::MAX);
        self.version.saturating_sub(window).max(0)
    }
}

/// Resolves a selector to a position in `view`, clamped to `[0, len]`.
pub(crate) fn resolve_position(view: &[KeyValue], selector: &SelectorArgs<'_>) -> usize {
    let base = if selector.or_equal {
        view.partition_point(|kv| kv.key.as_slice() < selector.key)
    } else {
        view.partition_point(|kv| kv.key.as_slice() <= selector.key)
    };
    let position = base as i64 + i64::from(selector.offset);
    position.clamp(0, view.len() as i64) as usize
}

/// Resolves a selector to a key: `b""` before the first key and `b"\xff"`
/// past the last one.
pub(crate) fn resolve_key(view: &[KeyValue], selector: &SelectorArgs<'_>) -> Vec<u8> {
    let base = if selector.or_equal {
        view.partition_point(|kv| kv.key.as_slice() < selector.key)
    } else {
        view.partition_point(|kv| kv.key.as_slice() <= selector.key)
    };
    let position = base as i64 + i64::from(selector.offset);
    if position < 0 {
        Vec::new()
    } else if position >= view.len() as i64 {
        SYSTEM_PREFIX.to_vec()
    } else {
        view[position as usize].key.clone()
    }
}

const SERIAL_BYTES: usize = 80_000;

/// Per-batch byte target implied by a streaming mode.
pub(crate) fn mode_byte_target(mode: StreamingMode, iteration: i32) -> Option<usize> {
    match mode {
        StreamingMode::WantAll | StreamingMode::Exact => None,
        StreamingMode::Small => Some(256),
        StreamingMode::Medium => Some(1_000),
        StreamingMode::Large => Some(4_096),
        StreamingMode::Serial => Some(SERIAL_BYTES),
        StreamingMode::Iterator => {
            let step = iteration.max(1).min(16) as u32 - 1;
            Some(4_096usize.saturating_mul(1 << step).min(SERIAL_BYTES))
        }
    }
}

/// Reads one batch of the range described by `args` from `view`.
///
/// Returns the batch and whether more matching pairs remain.
pub(crate) fn read_batch(view: &[KeyValue], args: &RangeArgs<'_>) -> (Vec<KeyValue>, bool) {
    let begin = resolve_position(view, &args.begin);
    let end = resolve_position(view, &args.end);
    if begin >= end {
        return (Vec::new(), false);
    }

    let matching = &view[begin..end];
    let row_limit = usize::try_from(args.limit).ok().filter(|limit| *limit > 0);
    let byte_target = match (
        usize::try_from(args.target_bytes).ok().filter(|target| *target > 0),
        mode_byte_target(args.mode, args.iteration),
    ) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    let ordered: Box<dyn Iterator<Item = &KeyValue>> = if args.reverse {
        Box::new(matching.iter().rev())
    } else {
        Box::new(matching.iter())
    };

    let mut batch = Vec::new();
    let mut bytes = 0usize;
    for kv in ordered {
        if row_limit.is_some_and(|limit| batch.len() >= limit) {
            break;
        }
        if !batch.is_empty() && byte_target.is_some_and(|target| bytes >= target) {
            break;
        }
        bytes += kv.byte_size();
        batch.push(kv.clone());
    }

    let more = batch.len() < matching.len();
    (batch, more)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(key: &[u8], or_equal: bool, offset: i32) -> SelectorArgs<'_> {
        SelectorArgs {
            key,
            or_equal,
            offset,
        }
    }

    fn view_of(keys: &[&[u8]]) -> Vec<KeyValue> {
        keys.iter().map(|k| KeyValue::new(*k, b"v".to_vec())).collect()
    }

    fn range<'a>(begin: SelectorArgs<'a>, end: SelectorArgs<'a>, limit: i32) -> RangeArgs<'a> {
        RangeArgs {
            begin,
            end,
            limit,
            target_bytes: 0,
            mode: StreamingMode::WantAll,
            iteration: 0,
            snapshot: false,
            reverse: false,
        }
    }

    #[test]
    fn versions_are_isolated() {
        let mut store = VersionedStore::new();
        let overlay = store.fold(0, &[Mutation::Set { key: b"a".to_vec(), value: b"1".to_vec() }], 100);
        let v1 = store.apply(overlay, vec![KeyRange::single(b"a")], 100);
        let overlay = store.fold(v1, &[Mutation::Set { key: b"a".to_vec(), value: b"2".to_vec() }], 100);
        let v2 = store.apply(overlay, vec![KeyRange::single(b"a")], 100);

        assert_eq!(store.get_at(b"a", 0), None);
        assert_eq!(store.get_at(b"a", v1), Some(&b"1"[..]));
        assert_eq!(store.get_at(b"a", v2), Some(&b"2"[..]));
    }

    #[test]
    fn fold_preserves_staging_order() {
        let store = VersionedStore::new();
        let mutations = vec![
            Mutation::Set { key: b"n".to_vec(), value: vec![1, 0] },
            Mutation::Atomic { key: b"n".to_vec(), operand: vec![2, 0], mutation: MutationType::Add },
            Mutation::Atomic { key: b"n".to_vec(), operand: vec![1, 0], mutation: MutationType::Add },
        ];
        let overlay = store.fold(0, &mutations, 100);
        assert_eq!(overlay.get(&b"n".to_vec()), Some(&Some(vec![4, 0])));
    }

    #[test]
    fn fold_clear_range_covers_staged_and_committed_keys() {
        let mut store = VersionedStore::new();
        let overlay = store.fold(0, &[Mutation::Set { key: b"b".to_vec(), value: b"x".to_vec() }], 100);
        let v = store.apply(overlay, vec![], 100);

        let mutations = vec![
            Mutation::Set { key: b"c".to_vec(), value: b"y".to_vec() },
            Mutation::ClearRange { begin: b"a".to_vec(), end: b"d".to_vec() },
            Mutation::Set { key: b"a".to_vec(), value: b"z".to_vec() },
        ];
        let overlay = store.fold(v, &mutations, 100);
        let view = store.view(v, &overlay);
        assert_eq!(view, vec![KeyValue::new(b"a".to_vec(), b"z".to_vec())]);
    }

    #[test]
    fn selector_resolution() {
        let view = view_of(&[b"b", b"d", b"f"]);
        // first_greater_or_equal
        assert_eq!(resolve_key(&view, &selector(b"d", true, 0)), b"d");
        // first_greater_than
        assert_eq!(resolve_key(&view, &selector(b"d", false, 0)), b"f");
        // last_less_than
        assert_eq!(resolve_key(&view, &selector(b"d", true, -1)), b"b");
        // last_less_or_equal
        assert_eq!(resolve_key(&view, &selector(b"c", false, -1)), b"b");
        // offsets
        assert_eq!(resolve_key(&view, &selector(b"a", true, 2)), b"f");
        assert_eq!(resolve_key(&view, &selector(b"a", true, -1)), b"");
        assert_eq!(resolve_key(&view, &selector(b"f", false, 0)), b"\xff");
    }

    #[test]
    fn batch_respects_limit_and_reports_more() {
        let view = view_of(&[b"a", b"b", b"c", b"d", b"e"]);
        let args = range(selector(b"a", true, 0), selector(b"z", true, 0), 2);
        let (batch, more) = read_batch(&view, &args);
        assert_eq!(batch.len(), 2);
        assert!(more);

        let args = range(selector(b"b", false, 0), selector(b"z", true, 0), 0);
        let (batch, more) = read_batch(&view, &args);
        assert_eq!(batch.len(), 3);
        assert!(!more);
    }

    #[test]
    fn reverse_batch_starts_at_the_end() {
        let view = view_of(&[b"a", b"b", b"c"]);
        let mut args = range(selector(b"a", true, 0), selector(b"c", true, 0), 1);
        args.reverse = true;
        let (batch, more) = read_batch(&view, &args);
        assert_eq!(batch[0].key, b"b");
        assert!(more);
    }

    #[test]
    fn byte_target_returns_at_least_one_row() {
        let view = vec![KeyValue::new(b"a".to_vec(), vec![0u8; 500]), KeyValue::new(b"b".to_vec(), vec![0u8; 500])];
        let mut args = range(selector(b"", true, 0), selector(b"\xff", true, 0), 0);
        args.target_bytes = 1;
        let (batch, more) = read_batch(&view, &args);
        assert_eq!(batch.len(), 1);
        assert!(more);
    }

    #[test]
    fn iterator_mode_grows_with_iteration() {
        let first = mode_byte_target(StreamingMode::Iterator, 0).unwrap();
        assert_eq!(first, mode_byte_target(StreamingMode::Iterator, 1).unwrap());
        assert!(mode_byte_target(StreamingMode::Iterator, 3).unwrap() > first);
        assert_eq!(mode_byte_target(StreamingMode::Iterator, 100), Some(80_000));
    }

    #[test]
    fn conflict_detection() {
        let mut store = VersionedStore::new();
        let overlay = store.fold(0, &[Mutation::Set { key: b"k".to_vec(), value: vec![] }], 100);
        store.apply(overlay, vec![KeyRange::single(b"k")], 100);

        assert!(store.conflicts(0, &[KeyRange::new(b"a".to_vec(), b"z".to_vec())]));
        assert!(!store.conflicts(1, &[KeyRange::new(b"a".to_vec(), b"z".to_vec())]));
        assert!(!store.conflicts(0, &[KeyRange::single(b"j")]));
    }
}

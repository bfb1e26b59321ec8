//! Native transaction state.

use super::store::{key_after, KeyRange, Mutation, Overlay, VersionedStore, SYSTEM_PREFIX};
use crate::config::EngineConfig;
use crate::error::{codes, EngineError, EngineResult, ErrorCode};
use crate::types::{FutureId, KeyValue};

/// Transaction option codes understood by the in-memory engine.
pub mod options {
    /// Reads stop observing the transaction's own staged writes. No value.
    pub const READ_YOUR_WRITES_DISABLE: i32 = 51;
    /// Caps the number of `on_error` retries. Value: 8-byte little-endian
    /// signed integer; `-1` removes the cap.
    pub const RETRY_LIMIT: i32 = 501;
}

/// Options that survive `on_error` but not `reset`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TxnOptions {
    pub read_your_writes_disabled: bool,
    pub retry_limit: Option<u32>,
}

/// Staged state of one native transaction.
#[derive(Debug, Default)]
pub(crate) struct NativeTransaction {
    pub read_version: Option<i64>,
    pub mutations: Vec<Mutation>,
    pub read_ranges: Vec<KeyRange>,
    pub write_ranges: Vec<KeyRange>,
    /// First size or key-range violation, reported by commit.
    pub deferred_error: Option<ErrorCode>,
    pub committed_version: Option<i64>,
    pub canceled: bool,
    pub retries: u32,
    pub options: TxnOptions,
    /// Versionstamp futures resolved by the next commit.
    pub versionstamp_waiters: Vec<FutureId>,
}

impl NativeTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything, options and retry count included.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resets for the next attempt of a retry loop.
    pub fn reset_for_retry(&mut self) {
        let options = self.options;
        let retries = self.retries + 1;
        *self = Self {
            options,
            retries,
            ..Self::default()
        };
    }

    /// True if another `on_error` retry is allowed.
    pub fn may_retry(&self) -> bool {
        self.options
            .retry_limit
            .is_none_or(|limit| self.retries < limit)
    }

    pub fn set_option(&mut self, option: i32, value: Option<&[u8]>) -> EngineResult<()> {
        match option {
            options::READ_YOUR_WRITES_DISABLE => {
                self.options.read_your_writes_disabled = true;
                Ok(())
            }
            options::RETRY_LIMIT => {
                let bytes: [u8; 8] = value
                    .and_then(|v| v.try_into().ok())
                    .ok_or_else(|| EngineError::new(codes::INVALID_OPTION_VALUE))?;
                let limit = i64::from_le_bytes(bytes);
                self.options.retry_limit = match limit {
                    -1 => None,
                    0.. => Some(u32::try_from(limit).unwrap_or(u32::MAX)),
                    _ => return Err(EngineError::new(codes::INVALID_OPTION_VALUE)),
                };
                Ok(())
            }
            _ => Err(EngineError::new(codes::INVALID_OPTION)),
        }
    }

    /// Returns the read version, acquiring the latest one on first use.
    pub fn read_version(&mut self, store: &VersionedStore, config: &EngineConfig) -> EngineResult<i64> {
        let version = *self.read_version.get_or_insert_with(|| store.version());
        if version > store.version() {
            return Err(EngineError::new(codes::FUTURE_VERSION));
        }
        if version < store.oldest_readable(config.version_window) {
            return Err(EngineError::new(codes::TRANSACTION_TOO_OLD));
        }
        Ok(version)
    }

    /// Fails with `TRANSACTION_CANCELLED` once the transaction is canceled.
    pub fn ensure_usable(&self) -> EngineResult<()> {
        if self.canceled {
            Err(EngineError::new(codes::TRANSACTION_CANCELLED))
        } else {
            Ok(())
        }
    }

    /// Sorted user-keyspace view at `version` as this transaction sees it.
    pub fn view(&self, store: &VersionedStore, version: i64, max_value_size: usize) -> Vec<KeyValue> {
        store.view(version, &self.overlay(store, version, max_value_size))
    }

    /// Value of `key` as this transaction sees it.
    pub fn value_of(
        &self,
        store: &VersionedStore,
        version: i64,
        key: &[u8],
        max_value_size: usize,
    ) -> Option<Vec<u8>> {
        match self.overlay(store, version, max_value_size).remove(key) {
            Some(staged) => staged,
            None => store.get_at(key, version).map(<[u8]>::to_vec),
        }
    }

    fn overlay(&self, store: &VersionedStore, version: i64, max_value_size: usize) -> Overlay {
        if self.options.read_your_writes_disabled {
            Overlay::new()
        } else {
            store.fold(version, &self.mutations, max_value_size)
        }
    }

    pub fn add_read_range(&mut self, range: KeyRange) {
        if range.begin < range.end {
            self.read_ranges.push(range);
        }
    }

    /// Stages a mutation, recording a deferred error if it is invalid.
    pub fn stage(&mut self, mutation: Mutation, config: &EngineConfig) {
        if let Some(code) = validate(&mutation, config) {
            self.deferred_error.get_or_insert(code);
            return;
        }
        self.mutations.push(mutation);
    }

    /// True if committing would write anything.
    pub fn has_writes(&self) -> bool {
        !self.mutations.is_empty() || !self.write_ranges.is_empty()
    }

    /// Every range written by this transaction.
    pub fn all_write_ranges(&self) -> Vec<KeyRange> {
        self.mutations
            .iter()
            .map(Mutation::write_range)
            .chain(self.write_ranges.iter().cloned())
            .collect()
    }
}

fn validate(mutation: &Mutation, config: &EngineConfig) -> Option<ErrorCode> {
    let check_key = |key: &[u8]| {
        if key.len() > config.max_key_size {
            Some(codes::KEY_TOO_LARGE)
        } else if key >= SYSTEM_PREFIX {
            Some(codes::KEY_OUTSIDE_LEGAL_RANGE)
        } else {
            None
        }
    };
    match mutation {
        Mutation::Set { key, value } => check_key(key).or_else(|| {
            (value.len() > config.max_value_size).then_some(codes::VALUE_TOO_LARGE)
        }),
        Mutation::Atomic { key, operand, .. } => check_key(key).or_else(|| {
            (operand.len() > config.max_value_size).then_some(codes::VALUE_TOO_LARGE)
        }),
        Mutation::Clear { key } => check_key(key),
        Mutation::ClearRange { begin, end } => {
            if begin > end {
                Some(codes::INVERTED_RANGE)
            } else if end.as_slice() > SYSTEM_PREFIX {
                Some(codes::KEY_OUTSIDE_LEGAL_RANGE)
            } else {
                None
            }
        }
    }
}

/// Conflict range covering a resolved selector and the key it resolved to.
pub(crate) fn covering_range(a: &[u8], b: &[u8]) -> KeyRange {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    KeyRange::new(low, key_after(high))
}

//! In-memory MVCC engine.
//!
//! [`MemoryEngine`] implements [`StoreEngine`] over a multi-version map with
//! optimistic conflict detection. Read results are computed when the read is
//! issued; their futures are completed by a dedicated worker thread, so
//! completion callbacks always run off the caller's thread unless the caller
//! registers on an already-ready future.
//!
//! Commits run on the worker thread. A commit fails with `NOT_COMMITTED` if
//! a transaction committed after the read version wrote into any of its read
//! conflict ranges.

mod futures;
mod store;
mod txn;

pub use txn::options;

use crate::config::EngineConfig;
use crate::engine::{FutureCallback, StoreEngine};
use crate::error::{codes, error_category, EngineError, EngineResult, ErrorCode};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::types::{
    ConflictRangeType, FutureId, KeyValue, MutationType, RangeArgs, ResultKind, SelectorArgs,
    StreamingMode, TransactionId,
};
use futures::{Completion, FutureTable, NativeValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use store::{KeyRange, Mutation, VersionedStore, SYSTEM_PREFIX};
use txn::{covering_range, NativeTransaction};

/// Owner recorded for watch futures, which outlive their transaction.
const NO_OWNER: TransactionId = TransactionId(0);

type Task = Box<dyn FnOnce(&Shared) + Send + 'static>;

#[derive(Debug)]
struct WatchEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

/// State shared with the worker and backoff threads.
struct Shared {
    config: EngineConfig,
    store: Mutex<VersionedStore>,
    txns: Mutex<HashMap<TransactionId, NativeTransaction>>,
    futures: FutureTable,
    watches: Mutex<HashMap<FutureId, WatchEntry>>,
    stats: EngineStats,
    next_txn: AtomicU64,
}

impl Shared {
    fn allocate(&self, kind: ResultKind, owner: TransactionId) -> FutureId {
        self.stats.record_future_created();
        self.futures.allocate(kind, owner)
    }

    fn complete(&self, id: FutureId, result: Result<NativeValue, ErrorCode>) {
        if self.futures.complete(id, result) == Completion::Missing {
            tracing::trace!(future = %id, "completion for released future dropped");
        }
    }

    fn fail_all(&self, ids: Vec<FutureId>, code: ErrorCode) {
        for id in ids {
            self.complete(id, Err(code));
        }
    }

    /// Runs the commit of `tr`. Returns the commit version, or `-1` for a
    /// transaction with nothing to write.
    fn commit(&self, tr: TransactionId) -> Result<i64, ErrorCode> {
        let mut store = self.store.lock();
        let mut txns = self.txns.lock();
        let Some(txn) = txns.get_mut(&tr) else {
            return Err(codes::INVALID_TRANSACTION);
        };
        let waiters = std::mem::take(&mut txn.versionstamp_waiters);

        let outcome = self.try_commit(txn, &mut store);
        drop(txns);

        let fired = match outcome {
            Ok(version) if version >= 0 => self.fired_watches(&store),
            _ => Vec::new(),
        };
        drop(store);

        let stamp = match outcome {
            Ok(version) if version >= 0 => Ok(NativeValue::Version(version)),
            Ok(_) => Err(codes::NO_COMMIT_VERSION),
            Err(code) => Err(code),
        };
        for id in waiters {
            self.complete(id, stamp.clone());
        }
        for id in fired {
            self.stats.record_watch_fired();
            tracing::debug!(future = %id, "watch fired");
            self.complete(id, Ok(NativeValue::Void));
        }
        outcome
    }

    fn try_commit(&self, txn: &mut NativeTransaction, store: &mut VersionedStore) -> Result<i64, ErrorCode> {
        txn.ensure_usable().map_err(|e| e.code())?;
        if let Some(code) = txn.deferred_error {
            return Err(code);
        }
        if !txn.has_writes() {
            txn.committed_version = Some(-1);
            return Ok(-1);
        }
        let read_version = txn.read_version(store, &self.config).map_err(|e| e.code())?;
        if store.conflicts(read_version, &txn.read_ranges) {
            self.stats.record_conflict();
            return Err(codes::NOT_COMMITTED);
        }
        let overlay = store.fold(store.version(), &txn.mutations, self.config.max_value_size);
        let version = store.apply(overlay, txn.all_write_ranges(), self.config.version_window);
        txn.committed_version = Some(version);
        self.stats.record_commit();
        Ok(version)
    }

    /// Removes and returns watches whose key changed.
    fn fired_watches(&self, store: &VersionedStore) -> Vec<FutureId> {
        let mut watches = self.watches.lock();
        let fired: Vec<FutureId> = watches
            .iter()
            .filter(|(_, watch)| store.get_latest(&watch.key) != watch.value.as_deref())
            .map(|(id, _)| *id)
            .collect();
        for id in &fired {
            watches.remove(id);
        }
        fired
    }

    /// Second half of `on_error`: resets `tr` for its next attempt.
    fn finish_retry(&self, tr: TransactionId) -> Result<NativeValue, ErrorCode> {
        let waiters = {
            let mut txns = self.txns.lock();
            let txn = txns.get_mut(&tr).ok_or(codes::INVALID_TRANSACTION)?;
            txn.ensure_usable().map_err(|e| e.code())?;
            let waiters = std::mem::take(&mut txn.versionstamp_waiters);
            txn.reset_for_retry();
            waiters
        };
        self.fail_all(waiters, codes::TRANSACTION_CANCELLED);
        Ok(NativeValue::Void)
    }
}

/// In-memory engine with a worker thread that completes futures.
pub struct MemoryEngine {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl MemoryEngine {
    /// Starts an engine and its worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new(config: EngineConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            store: Mutex::new(VersionedStore::new()),
            txns: Mutex::new(HashMap::new()),
            futures: FutureTable::new(),
            watches: Mutex::new(HashMap::new()),
            stats: EngineStats::new(),
            next_txn: AtomicU64::new(1),
            config,
        });

        let (sender, receiver) = mpsc::channel::<Task>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(shared.config.worker_name.clone())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task(&worker_shared);
                }
                tracing::debug!("engine worker stopped");
            })?;

        tracing::debug!(worker = %shared.config.worker_name, "engine started");
        Ok(Self {
            worker_id: worker.thread().id(),
            shared,
            tasks: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Starts an engine with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn with_defaults() -> io::Result<Self> {
        Self::new(EngineConfig::default())
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of futures currently held by the engine.
    pub fn live_futures(&self) -> usize {
        self.shared.futures.len()
    }

    /// Number of registered watches that have not fired.
    pub fn live_watches(&self) -> usize {
        self.shared.watches.lock().len()
    }

    /// Latest committed version.
    pub fn current_version(&self) -> i64 {
        self.shared.store.lock().version()
    }

    fn submit(&self, task: Task) {
        let task = match self.tasks.lock().as_ref() {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                Err(mpsc::SendError(task)) => task,
            },
            None => task,
        };
        tracing::warn!("engine worker unavailable; completing inline");
        task(&self.shared);
    }

    /// Allocates a future and queues its completion with `result`.
    fn deliver(
        &self,
        tr: TransactionId,
        kind: ResultKind,
        result: EngineResult<NativeValue>,
    ) -> FutureId {
        let id = self.shared.allocate(kind, tr);
        let result = result.map_err(|e| e.code());
        self.submit(Box::new(move |shared| shared.complete(id, result)));
        id
    }

    fn with_txn<T>(
        &self,
        tr: TransactionId,
        op: impl FnOnce(&mut NativeTransaction, &VersionedStore) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let store = self.shared.store.lock();
        let mut txns = self.shared.txns.lock();
        let txn = txns.get_mut(&tr).ok_or_else(|| {
            tracing::warn!(tr = %tr, "call on unknown transaction");
            EngineError::new(codes::INVALID_TRANSACTION)
        })?;
        op(txn, &store)
    }

    /// Computes a read now and delivers it through a future.
    fn read(
        &self,
        tr: TransactionId,
        kind: ResultKind,
        op: impl FnOnce(&mut NativeTransaction, &VersionedStore, &EngineConfig) -> EngineResult<NativeValue>,
    ) -> FutureId {
        let config = &self.shared.config;
        let result = self.with_txn(tr, |txn, store| {
            txn.ensure_usable()?;
            op(txn, store, config)
        });
        self.deliver(tr, kind, result)
    }

    fn stage(&self, tr: TransactionId, mutation: Mutation) {
        let config = &self.shared.config;
        // Unknown transactions are already logged by `with_txn`.
        let _ = self.with_txn(tr, |txn, _| {
            txn.stage(mutation, config);
            Ok(())
        });
    }

    fn check_read_key(key: &[u8], config: &EngineConfig) -> EngineResult<()> {
        if key.len() > config.max_key_size {
            Err(EngineError::new(codes::KEY_TOO_LARGE))
        } else if key > SYSTEM_PREFIX {
            Err(EngineError::new(codes::KEY_OUTSIDE_LEGAL_RANGE))
        } else {
            Ok(())
        }
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.tasks.lock().take();
        let worker = self.worker.lock().take();
        // The last handle may be released by a callback on the worker itself.
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("engine worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl StoreEngine for MemoryEngine {
    fn transaction_create(&self) -> EngineResult<TransactionId> {
        let tr = TransactionId::new(self.shared.next_txn.fetch_add(1, Ordering::Relaxed));
        self.shared.txns.lock().insert(tr, NativeTransaction::new());
        self.shared.stats.record_transaction_created();
        tracing::trace!(tr = %tr, "transaction created");
        Ok(tr)
    }

    fn transaction_destroy(&self, tr: TransactionId) {
        self.shared.stats.record_transaction_destroyed();
        tracing::trace!(tr = %tr, "transaction destroyed");
        // Queued behind any in-flight commit of the same transaction.
        self.submit(Box::new(move |shared| {
            let waiters = shared
                .txns
                .lock()
                .remove(&tr)
                .map(|txn| txn.versionstamp_waiters)
                .unwrap_or_default();
            shared.fail_all(waiters, codes::TRANSACTION_CANCELLED);
        }));
    }

    fn transaction_reset(&self, tr: TransactionId) {
        let waiters = self
            .with_txn(tr, |txn, _| {
                let waiters = std::mem::take(&mut txn.versionstamp_waiters);
                txn.reset();
                Ok(waiters)
            })
            .unwrap_or_default();
        self.shared.fail_all(waiters, codes::TRANSACTION_CANCELLED);
    }

    fn transaction_cancel(&self, tr: TransactionId) {
        let marked = self.with_txn(tr, |txn, _| {
            txn.canceled = true;
            Ok(())
        });
        if marked.is_ok() {
            tracing::debug!(tr = %tr, "transaction canceled");
            let pending = self.shared.futures.pending_of(tr);
            self.shared.fail_all(pending, codes::TRANSACTION_CANCELLED);
        }
    }

    fn transaction_set_option(
        &self,
        tr: TransactionId,
        option: i32,
        value: Option<&[u8]>,
    ) -> EngineResult<()> {
        self.with_txn(tr, |txn, _| txn.set_option(option, value))
    }

    fn transaction_get(&self, tr: TransactionId, key: &[u8], snapshot: bool) -> FutureId {
        self.read(tr, ResultKind::Value, |txn, store, config| {
            Self::check_read_key(key, config)?;
            let version = txn.read_version(store, config)?;
            let value = txn.value_of(store, version, key, config.max_value_size);
            if !snapshot {
                txn.add_read_range(KeyRange::single(key));
            }
            Ok(NativeValue::Value(value))
        })
    }

    fn transaction_get_key(
        &self,
        tr: TransactionId,
        selector: SelectorArgs<'_>,
        snapshot: bool,
    ) -> FutureId {
        self.read(tr, ResultKind::Key, |txn, store, config| {
            Self::check_read_key(selector.key, config)?;
            let version = txn.read_version(store, config)?;
            let view = txn.view(store, version, config.max_value_size);
            let key = store::resolve_key(&view, &selector);
            if !snapshot {
                txn.add_read_range(covering_range(selector.key, &key));
            }
            Ok(NativeValue::Key(key))
        })
    }

    fn transaction_get_range(&self, tr: TransactionId, args: &RangeArgs<'_>) -> FutureId {
        self.read(tr, ResultKind::KeyValues, |txn, store, config| {
            if args.mode == StreamingMode::Exact && args.limit <= 0 {
                return Err(EngineError::new(codes::EXACT_MODE_WITHOUT_LIMITS));
            }
            let version = txn.read_version(store, config)?;
            let view = txn.view(store, version, config.max_value_size);
            let (batch, more) = store::read_batch(&view, args);
            if !args.snapshot {
                txn.add_read_range(range_read_conflict(args, &batch, more));
            }
            tracing::trace!(tr = %tr, rows = batch.len(), more, "range batch read");
            Ok(NativeValue::KeyValues(batch, more))
        })
    }

    fn transaction_get_read_version(&self, tr: TransactionId) -> FutureId {
        self.read(tr, ResultKind::Version, |txn, store, config| {
            txn.read_version(store, config).map(NativeValue::Version)
        })
    }

    fn transaction_set_read_version(&self, tr: TransactionId, version: i64) {
        let _ = self.with_txn(tr, |txn, _| {
            txn.read_version = Some(version);
            Ok(())
        });
    }

    fn transaction_get_committed_version(&self, tr: TransactionId) -> EngineResult<i64> {
        self.with_txn(tr, |txn, _| {
            txn.committed_version
                .ok_or_else(|| EngineError::new(codes::CLIENT_INVALID_OPERATION))
        })
    }

    fn transaction_get_versionstamp(&self, tr: TransactionId) -> FutureId {
        let id = self.shared.allocate(ResultKind::Version, tr);
        let registered = self.with_txn(tr, |txn, _| {
            txn.ensure_usable()?;
            match txn.committed_version {
                None => {
                    txn.versionstamp_waiters.push(id);
                    Ok(None)
                }
                Some(version) if version >= 0 => Ok(Some(version)),
                Some(_) => Err(EngineError::new(codes::NO_COMMIT_VERSION)),
            }
        });
        match registered {
            Ok(None) => {}
            Ok(Some(version)) => {
                self.submit(Box::new(move |shared| {
                    shared.complete(id, Ok(NativeValue::Version(version)));
                }));
            }
            Err(err) => {
                let code = err.code();
                self.submit(Box::new(move |shared| shared.complete(id, Err(code))));
            }
        }
        id
    }

    fn transaction_get_addresses_for_key(&self, tr: TransactionId, key: &[u8]) -> FutureId {
        self.read(tr, ResultKind::StringArray, |_, _, config| {
            Self::check_read_key(key, config)?;
            Ok(NativeValue::Strings(addresses_for_key(config, key)))
        })
    }

    fn transaction_watch(&self, tr: TransactionId, key: &[u8]) -> FutureId {
        let config = &self.shared.config;
        let id = self.shared.allocate(ResultKind::Void, NO_OWNER);
        // The entry goes in while the store is locked, so every later commit sees it.
        let registered = self.with_txn(tr, |txn, store| {
            txn.ensure_usable()?;
            Self::check_read_key(key, config)?;
            let version = txn.read_version(store, config)?;
            let value = txn.value_of(store, version, key, config.max_value_size);
            let mut watches = self.shared.watches.lock();
            if watches.len() >= config.max_watches {
                return Err(EngineError::new(codes::TOO_MANY_WATCHES));
            }
            watches.insert(
                id,
                WatchEntry {
                    key: key.to_vec(),
                    value,
                },
            );
            Ok(())
        });
        match registered {
            Ok(()) => tracing::debug!(future = %id, tr = %tr, "watch registered"),
            Err(err) => {
                let code = err.code();
                self.submit(Box::new(move |shared| shared.complete(id, Err(code))));
            }
        }
        id
    }

    fn transaction_set(&self, tr: TransactionId, key: &[u8], value: &[u8]) {
        self.stage(
            tr,
            Mutation::Set {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        );
    }

    fn transaction_clear(&self, tr: TransactionId, key: &[u8]) {
        self.stage(tr, Mutation::Clear { key: key.to_vec() });
    }

    fn transaction_clear_range(&self, tr: TransactionId, begin: &[u8], end: &[u8]) {
        self.stage(
            tr,
            Mutation::ClearRange {
                begin: begin.to_vec(),
                end: end.to_vec(),
            },
        );
    }

    fn transaction_atomic_op(
        &self,
        tr: TransactionId,
        key: &[u8],
        operand: &[u8],
        mutation: MutationType,
    ) {
        self.stage(
            tr,
            Mutation::Atomic {
                key: key.to_vec(),
                operand: operand.to_vec(),
                mutation,
            },
        );
    }

    fn transaction_add_conflict_range(
        &self,
        tr: TransactionId,
        begin: &[u8],
        end: &[u8],
        kind: ConflictRangeType,
    ) -> EngineResult<()> {
        if begin > end {
            return Err(EngineError::new(codes::INVERTED_RANGE));
        }
        self.with_txn(tr, |txn, _| {
            let range = KeyRange::new(begin, end);
            match kind {
                ConflictRangeType::Read => txn.add_read_range(range),
                ConflictRangeType::Write if begin < end => txn.write_ranges.push(range),
                ConflictRangeType::Write => {}
            }
            Ok(())
        })
    }

    fn transaction_commit(&self, tr: TransactionId) -> FutureId {
        let id = self.shared.allocate(ResultKind::Void, tr);
        self.submit(Box::new(move |shared| {
            let result = shared.commit(tr);
            match result {
                Ok(version) => tracing::debug!(tr = %tr, version, "commit applied"),
                Err(code) => tracing::debug!(tr = %tr, code, "commit failed"),
            }
            shared.complete(id, result.map(|_| NativeValue::Void));
        }));
        id
    }

    fn transaction_on_error(&self, tr: TransactionId, code: ErrorCode) -> FutureId {
        let config = &self.shared.config;
        let decision = self.with_txn(tr, |txn, _| {
            txn.ensure_usable()?;
            if !error_category(code).is_retryable() || !txn.may_retry() {
                return Err(EngineError::new(code));
            }
            Ok(config.backoff_for_attempt(txn.retries))
        });

        let backoff = match decision {
            Ok(backoff) => backoff,
            Err(err) => return self.deliver(tr, ResultKind::Void, Err(err)),
        };

        let id = self.shared.allocate(ResultKind::Void, tr);
        tracing::debug!(tr = %tr, code, backoff_ms = backoff.as_millis() as u64, "retrying transaction");
        if backoff.is_zero() {
            self.submit(Box::new(move |shared| {
                let result = shared.finish_retry(tr);
                shared.complete(id, result);
            }));
        } else {
            self.spawn_backoff(id, tr, backoff);
        }
        id
    }

    fn future_set_callback(&self, future: FutureId, callback: FutureCallback) -> EngineResult<()> {
        self.shared.futures.set_callback(future, callback)
    }

    fn future_is_ready(&self, future: FutureId) -> bool {
        self.shared.futures.is_ready(future)
    }

    fn future_get_error(&self, future: FutureId) -> EngineResult<()> {
        self.shared.futures.read(future, |_| Some(()))
    }

    fn future_get_value(&self, future: FutureId) -> EngineResult<Option<Vec<u8>>> {
        self.shared.futures.read(future, |value| match value {
            NativeValue::Value(value) => Some(value.clone()),
            _ => None,
        })
    }

    fn future_get_key(&self, future: FutureId) -> EngineResult<Vec<u8>> {
        self.shared.futures.read(future, |value| match value {
            NativeValue::Key(key) => Some(key.clone()),
            _ => None,
        })
    }

    fn future_get_key_values(&self, future: FutureId) -> EngineResult<(Vec<KeyValue>, bool)> {
        self.shared.futures.read(future, |value| match value {
            NativeValue::KeyValues(pairs, more) => Some((pairs.clone(), *more)),
            _ => None,
        })
    }

    fn future_get_string_array(&self, future: FutureId) -> EngineResult<Vec<String>> {
        self.shared.futures.read(future, |value| match value {
            NativeValue::Strings(strings) => Some(strings.clone()),
            _ => None,
        })
    }

    fn future_get_version(&self, future: FutureId) -> EngineResult<i64> {
        self.shared.futures.read(future, |value| match value {
            NativeValue::Version(version) => Some(*version),
            _ => None,
        })
    }

    fn future_cancel(&self, future: FutureId) {
        self.shared.watches.lock().remove(&future);
        if self.shared.futures.complete(future, Err(codes::OPERATION_CANCELLED)) == Completion::Completed {
            tracing::trace!(future = %future, "future canceled");
        }
    }

    fn future_destroy(&self, future: FutureId) {
        self.shared.watches.lock().remove(&future);
        if self.shared.futures.remove(future) {
            self.shared.stats.record_future_destroyed();
        } else {
            self.shared.stats.record_double_release();
            tracing::error!(future = %future, "future released twice");
        }
    }
}

impl MemoryEngine {
    fn spawn_backoff(&self, id: FutureId, tr: TransactionId, backoff: Duration) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-backoff", self.shared.config.worker_name))
            .spawn(move || {
                thread::sleep(backoff);
                let result = shared.finish_retry(tr);
                shared.complete(id, result);
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "backoff thread unavailable; retrying without delay");
            self.submit(Box::new(move |shared| {
                let result = shared.finish_retry(tr);
                shared.complete(id, result);
            }));
        }
    }
}

/// Read conflict range of one range batch.
///
/// Covers the selector keys and the returned rows; when the batch is
/// partial it stops at the last row returned.
fn range_read_conflict(args: &RangeArgs<'_>, batch: &[KeyValue], more: bool) -> KeyRange {
    let low = args.begin.key.min(args.end.key);
    let high = args.begin.key.max(args.end.key);
    let first = batch.iter().map(|kv| kv.key.as_slice()).min();
    let last = batch.iter().map(|kv| kv.key.as_slice()).max();

    let (low, high) = match (first, last) {
        (Some(first), Some(last)) if more && args.reverse => (first, high.max(last)),
        (Some(first), Some(last)) if more => (low.min(first), last),
        (Some(first), Some(last)) => (low.min(first), high.max(last)),
        _ => (low, high),
    };
    covering_range(low, high)
}

/// Addresses of the replicas serving `key`.
fn addresses_for_key(config: &EngineConfig, key: &[u8]) -> Vec<String> {
    let count = config.storage_addresses.len();
    if count == 0 {
        return Vec::new();
    }
    let start = usize::from(key.first().copied().unwrap_or(0)) % count;
    (0..config.replication_factor.min(count))
        .map(|i| config.storage_addresses[(start + i) % count].clone())
        .collect()
}

//! Store engine call table.

use crate::error::{EngineResult, ErrorCode};
use crate::types::{
    ConflictRangeType, FutureId, KeyValue, MutationType, RangeArgs, SelectorArgs, TransactionId,
};

/// Completion callback registered on a native future.
///
/// The engine invokes it at most once, from whichever thread completes the
/// future. If the future is already complete at registration time, the
/// callback runs on the registering thread before `future_set_callback`
/// returns.
pub type FutureCallback = Box<dyn FnOnce() + Send + 'static>;

/// The call table of a transactional key-value store.
///
/// The engine is an **opaque collaborator**: it owns transactions and
/// pending results and hands out integer-like handles for them. Asynchronous
/// calls return a [`FutureId`] whose result is read back with the typed
/// `future_get_*` getters once the future is ready.
///
/// # Invariants
///
/// - Every `FutureId` returned must eventually be passed to
///   `future_destroy` exactly once; using it afterwards is an error
/// - A registered [`FutureCallback`] is called at most once
/// - Typed getters fail with `RESULT_TYPE_MISMATCH` when the future holds a
///   result of a different shape
/// - Synchronous mutations (`set`, `clear`, ...) never fail immediately;
///   size and key-range violations are deferred and reported by `commit`
///
/// # Implementors
///
/// - [`super::MemoryEngine`] - in-memory MVCC engine for tests and demos
pub trait StoreEngine: Send + Sync {
    // === Transactions ===

    /// Creates a new native transaction.
    fn transaction_create(&self) -> EngineResult<TransactionId>;

    /// Releases a native transaction. Outstanding futures stay valid.
    fn transaction_destroy(&self, tr: TransactionId);

    /// Discards staged mutations, conflict ranges and the read version.
    fn transaction_reset(&self, tr: TransactionId);

    /// Abandons the current attempt; pending and later calls fail with
    /// `TRANSACTION_CANCELLED` until the transaction is reset.
    fn transaction_cancel(&self, tr: TransactionId);

    /// Sets a transaction option.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_OPTION` for unknown codes and `INVALID_OPTION_VALUE`
    /// for malformed values.
    fn transaction_set_option(
        &self,
        tr: TransactionId,
        option: i32,
        value: Option<&[u8]>,
    ) -> EngineResult<()>;

    // === Reads ===

    /// Reads the value of a key. Result shape: [`crate::ResultKind::Value`].
    fn transaction_get(&self, tr: TransactionId, key: &[u8], snapshot: bool) -> FutureId;

    /// Resolves a key selector. Result shape: [`crate::ResultKind::Key`].
    fn transaction_get_key(
        &self,
        tr: TransactionId,
        selector: SelectorArgs<'_>,
        snapshot: bool,
    ) -> FutureId;

    /// Reads one batch of a range. Result shape: [`crate::ResultKind::KeyValues`].
    fn transaction_get_range(&self, tr: TransactionId, args: &RangeArgs<'_>) -> FutureId;

    /// Reads the transaction's read version. Result shape: [`crate::ResultKind::Version`].
    fn transaction_get_read_version(&self, tr: TransactionId) -> FutureId;

    /// Pins the read version used by later reads.
    fn transaction_set_read_version(&self, tr: TransactionId, version: i64);

    /// Returns the version at which the transaction committed.
    ///
    /// # Errors
    ///
    /// Returns `CLIENT_INVALID_OPERATION` unless the transaction committed.
    fn transaction_get_committed_version(&self, tr: TransactionId) -> EngineResult<i64>;

    /// Resolves to the commit version once the transaction commits.
    /// Result shape: [`crate::ResultKind::Version`].
    fn transaction_get_versionstamp(&self, tr: TransactionId) -> FutureId;

    /// Lists the storage addresses serving a key.
    /// Result shape: [`crate::ResultKind::StringArray`].
    fn transaction_get_addresses_for_key(&self, tr: TransactionId, key: &[u8]) -> FutureId;

    /// Registers a change notification on a key.
    /// Result shape: [`crate::ResultKind::Void`].
    fn transaction_watch(&self, tr: TransactionId, key: &[u8]) -> FutureId;

    // === Mutations ===

    /// Stages a write.
    fn transaction_set(&self, tr: TransactionId, key: &[u8], value: &[u8]);

    /// Stages a single-key deletion.
    fn transaction_clear(&self, tr: TransactionId, key: &[u8]);

    /// Stages deletion of `[begin, end)`.
    fn transaction_clear_range(&self, tr: TransactionId, begin: &[u8], end: &[u8]);

    /// Stages an atomic mutation.
    fn transaction_atomic_op(
        &self,
        tr: TransactionId,
        key: &[u8],
        operand: &[u8],
        mutation: MutationType,
    );

    /// Adds an explicit conflict range `[begin, end)`.
    ///
    /// # Errors
    ///
    /// Returns `INVERTED_RANGE` when `begin > end`.
    fn transaction_add_conflict_range(
        &self,
        tr: TransactionId,
        begin: &[u8],
        end: &[u8],
        kind: ConflictRangeType,
    ) -> EngineResult<()>;

    // === Commit and retry ===

    /// Commits all staged mutations atomically.
    /// Result shape: [`crate::ResultKind::Void`].
    fn transaction_commit(&self, tr: TransactionId) -> FutureId;

    /// Retry-loop primitive: resolves successfully after backoff and reset if
    /// `code` is retryable, otherwise resolves with `code`.
    /// Result shape: [`crate::ResultKind::Void`].
    fn transaction_on_error(&self, tr: TransactionId, code: ErrorCode) -> FutureId;

    // === Futures ===

    /// Registers the completion callback of a future.
    ///
    /// # Errors
    ///
    /// Returns `FUTURE_RELEASED` when the future no longer exists, or
    /// `CLIENT_INVALID_OPERATION` when a callback is already registered.
    fn future_set_callback(&self, future: FutureId, callback: FutureCallback) -> EngineResult<()>;

    /// Returns true once the future holds a result or an error.
    fn future_is_ready(&self, future: FutureId) -> bool;

    /// Returns the future's error, if it completed with one.
    fn future_get_error(&self, future: FutureId) -> EngineResult<()>;

    /// Reads a [`crate::ResultKind::Value`] result.
    fn future_get_value(&self, future: FutureId) -> EngineResult<Option<Vec<u8>>>;

    /// Reads a [`crate::ResultKind::Key`] result.
    fn future_get_key(&self, future: FutureId) -> EngineResult<Vec<u8>>;

    /// Reads a [`crate::ResultKind::KeyValues`] result.
    fn future_get_key_values(&self, future: FutureId) -> EngineResult<(Vec<KeyValue>, bool)>;

    /// Reads a [`crate::ResultKind::StringArray`] result.
    fn future_get_string_array(&self, future: FutureId) -> EngineResult<Vec<String>>;

    /// Reads a [`crate::ResultKind::Version`] result.
    fn future_get_version(&self, future: FutureId) -> EngineResult<i64>;

    /// Requests cancellation. Best-effort: a completion already in flight
    /// may still run the callback.
    fn future_cancel(&self, future: FutureId);

    /// Releases the future and its result buffers.
    fn future_destroy(&self, future: FutureId);
}

//! The transaction handle.

use super::state::TransactionState;
use crate::config::ClientConfig;
use crate::context::CallerContext;
use crate::error::{CoreError, CoreResult};
use crate::operation::decode::{self, Decoder};
use crate::operation::AsyncOperation;
use crate::param::ByteParam;
use crate::selector::{KeySelector, RangeRequest, RangeResult};
use crate::watch::WatchHandle;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use txbridge_engine::{
    ConflictRangeType, ErrorCode, FutureId, MutationType, StoreEngine, TransactionId,
};

/// A transaction against the store.
///
/// The handle owns one native transaction for its whole lifetime and
/// releases it when dropped. Reads and commits return [`AsyncOperation`]s
/// whose results are delivered through the handle's [`CallerContext`].
/// Several operations may be outstanding at once; they are not serialized.
///
/// Operations other than `reset`, `cancel`, `on_error` and
/// `get_committed_version` require the handle to be
/// [`TransactionState::Active`] and fail with [`CoreError::InvalidState`]
/// otherwise, without reaching the engine.
pub struct TransactionHandle {
    engine: Arc<dyn StoreEngine>,
    native: TransactionId,
    ctx: CallerContext,
    state: Rc<Cell<TransactionState>>,
    config: ClientConfig,
}

impl TransactionHandle {
    pub(crate) fn new(
        engine: Arc<dyn StoreEngine>,
        native: TransactionId,
        ctx: &CallerContext,
        config: ClientConfig,
    ) -> Self {
        tracing::debug!(tr = %native, "transaction opened");
        Self {
            engine,
            native,
            ctx: ctx.clone(),
            state: Rc::new(Cell::new(TransactionState::Active)),
            config,
        }
    }

    /// Returns the native transaction id.
    pub fn id(&self) -> TransactionId {
        self.native
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Returns the context results are delivered through.
    pub fn context(&self) -> &CallerContext {
        &self.ctx
    }

    fn ensure_active(&self, op: &str) -> CoreResult<()> {
        let state = self.state.get();
        if state.is_active() {
            Ok(())
        } else {
            Err(CoreError::invalid_state(format!(
                "{op} requires an active transaction (state: {state:?})"
            )))
        }
    }

    fn issue<T: 'static>(&self, op: &'static str, future: FutureId, decoder: Decoder<T>) -> AsyncOperation<T> {
        if self.config.trace_operations {
            tracing::debug!(tr = %self.native, %future, op, "operation issued");
        } else {
            tracing::trace!(tr = %self.native, %future, op, "operation issued");
        }
        AsyncOperation::new(Arc::clone(&self.engine), future, decoder, &self.ctx)
    }

    // === Reads ===

    /// Reads the value of `key`. Resolves to `None` if the key is absent.
    pub fn get<'a>(
        &self,
        key: impl Into<ByteParam<'a>>,
        snapshot: bool,
    ) -> CoreResult<AsyncOperation<Option<Vec<u8>>>> {
        self.ensure_active("get")?;
        let key: ByteParam<'_> = key.into();
        let future = self.engine.transaction_get(self.native, key.as_bytes(), snapshot);
        Ok(self.issue("get", future, decode::value))
    }

    /// Resolves a key selector to a key.
    pub fn get_key(&self, selector: &KeySelector, snapshot: bool) -> CoreResult<AsyncOperation<Vec<u8>>> {
        self.ensure_active("get_key")?;
        let future = self
            .engine
            .transaction_get_key(self.native, selector.as_args(), snapshot);
        Ok(self.issue("get_key", future, decode::key))
    }

    /// Reads one batch of a range.
    pub fn get_range(&self, request: &RangeRequest) -> CoreResult<AsyncOperation<RangeResult>> {
        self.ensure_active("get_range")?;
        let future = self
            .engine
            .transaction_get_range(self.native, &request.as_args());
        Ok(self.issue("get_range", future, decode::key_values))
    }

    /// Builds a range request using the client's default streaming mode.
    pub fn range(&self, begin: KeySelector, end: KeySelector) -> RangeRequest {
        RangeRequest::new(begin, end).with_mode(self.config.default_streaming_mode)
    }

    /// Reads the transaction's read version.
    pub fn get_read_version(&self) -> CoreResult<AsyncOperation<i64>> {
        self.ensure_active("get_read_version")?;
        let future = self.engine.transaction_get_read_version(self.native);
        Ok(self.issue("get_read_version", future, decode::version))
    }

    /// Pins the version later reads observe.
    pub fn set_read_version(&self, version: i64) -> CoreResult<()> {
        self.ensure_active("set_read_version")?;
        self.engine.transaction_set_read_version(self.native, version);
        Ok(())
    }

    /// Returns the version the transaction committed at, or `-1` for a
    /// read-only commit. Allowed in any state.
    ///
    /// # Errors
    ///
    /// Fails with the engine's `client_invalid_operation` before a
    /// successful commit.
    pub fn get_committed_version(&self) -> CoreResult<i64> {
        Ok(self.engine.transaction_get_committed_version(self.native)?)
    }

    /// Resolves to the commit version once the transaction commits.
    pub fn get_versionstamp(&self) -> CoreResult<AsyncOperation<i64>> {
        self.ensure_active("get_versionstamp")?;
        let future = self.engine.transaction_get_versionstamp(self.native);
        Ok(self.issue("get_versionstamp", future, decode::version))
    }

    /// Lists the storage addresses serving `key`.
    pub fn get_addresses_for_key<'a>(
        &self,
        key: impl Into<ByteParam<'a>>,
    ) -> CoreResult<AsyncOperation<Vec<String>>> {
        self.ensure_active("get_addresses_for_key")?;
        let key: ByteParam<'_> = key.into();
        let future = self
            .engine
            .transaction_get_addresses_for_key(self.native, key.as_bytes());
        Ok(self.issue("get_addresses_for_key", future, decode::strings))
    }

    /// Registers a change notification on `key`.
    ///
    /// The watch outlives the transaction. It fires once a later commit
    /// changes the key's value.
    pub fn watch<'a>(&self, key: impl Into<ByteParam<'a>>) -> CoreResult<WatchHandle> {
        self.ensure_active("watch")?;
        let key = ByteParam::into_bytes(key.into());
        let future = self.engine.transaction_watch(self.native, &key);
        let op = self.issue("watch", future, decode::void);
        Ok(WatchHandle::new(key, op))
    }

    // === Mutations ===

    /// Stages a write of `value` to `key`.
    pub fn set<'k, 'v>(
        &self,
        key: impl Into<ByteParam<'k>>,
        value: impl Into<ByteParam<'v>>,
    ) -> CoreResult<()> {
        self.ensure_active("set")?;
        let (key, value): (ByteParam<'_>, ByteParam<'_>) = (key.into(), value.into());
        self.engine
            .transaction_set(self.native, key.as_bytes(), value.as_bytes());
        Ok(())
    }

    /// Stages deletion of `key`.
    pub fn clear<'a>(&self, key: impl Into<ByteParam<'a>>) -> CoreResult<()> {
        self.ensure_active("clear")?;
        let key: ByteParam<'_> = key.into();
        self.engine.transaction_clear(self.native, key.as_bytes());
        Ok(())
    }

    /// Stages deletion of every key in `[begin, end)`.
    pub fn clear_range<'b, 'e>(
        &self,
        begin: impl Into<ByteParam<'b>>,
        end: impl Into<ByteParam<'e>>,
    ) -> CoreResult<()> {
        self.ensure_active("clear_range")?;
        let (begin, end): (ByteParam<'_>, ByteParam<'_>) = (begin.into(), end.into());
        self.engine
            .transaction_clear_range(self.native, begin.as_bytes(), end.as_bytes());
        Ok(())
    }

    /// Stages an atomic mutation of `key` with `operand`.
    ///
    /// Staged operations on the same key apply in the order they were
    /// staged.
    pub fn atomic_op<'k, 'o>(
        &self,
        key: impl Into<ByteParam<'k>>,
        operand: impl Into<ByteParam<'o>>,
        mutation: MutationType,
    ) -> CoreResult<()> {
        self.ensure_active("atomic_op")?;
        let (key, operand): (ByteParam<'_>, ByteParam<'_>) = (key.into(), operand.into());
        self.engine
            .transaction_atomic_op(self.native, key.as_bytes(), operand.as_bytes(), mutation);
        Ok(())
    }

    /// Marks `[begin, end)` as read by this transaction.
    pub fn add_read_conflict_range<'b, 'e>(
        &self,
        begin: impl Into<ByteParam<'b>>,
        end: impl Into<ByteParam<'e>>,
    ) -> CoreResult<()> {
        self.add_conflict_range(begin.into(), end.into(), ConflictRangeType::Read)
    }

    /// Marks `[begin, end)` as written by this transaction.
    pub fn add_write_conflict_range<'b, 'e>(
        &self,
        begin: impl Into<ByteParam<'b>>,
        end: impl Into<ByteParam<'e>>,
    ) -> CoreResult<()> {
        self.add_conflict_range(begin.into(), end.into(), ConflictRangeType::Write)
    }

    fn add_conflict_range(
        &self,
        begin: ByteParam<'_>,
        end: ByteParam<'_>,
        kind: ConflictRangeType,
    ) -> CoreResult<()> {
        self.ensure_active("add_conflict_range")?;
        if begin.as_bytes() > end.as_bytes() {
            return Err(CoreError::invalid_parameter(
                "conflict range begin is greater than end",
            ));
        }
        self.engine
            .transaction_add_conflict_range(self.native, begin.as_bytes(), end.as_bytes(), kind)?;
        Ok(())
    }

    /// Sets a transaction option. Codes and values are validated by the
    /// engine.
    pub fn set_option(&self, option: i32, value: Option<&[u8]>) -> CoreResult<()> {
        self.ensure_active("set_option")?;
        self.engine
            .transaction_set_option(self.native, option, value)?;
        Ok(())
    }

    // === Commit and retry ===

    /// Commits the staged mutations. The handle becomes
    /// [`TransactionState::Committed`].
    pub fn commit(&self) -> CoreResult<AsyncOperation<()>> {
        self.ensure_active("commit")?;
        let future = self.engine.transaction_commit(self.native);
        self.state.set(TransactionState::Committed);
        tracing::debug!(tr = %self.native, "commit issued");
        Ok(self.issue("commit", future, decode::void))
    }

    /// Retry-loop step for a failed operation.
    ///
    /// Resolves successfully once the engine has backed off and reset the
    /// transaction; the handle is then `Active` again. Fails with `code`
    /// itself when the engine classifies it as not retryable.
    pub fn on_error(&self, code: ErrorCode) -> CoreResult<AsyncOperation<()>> {
        let state = self.state.get();
        if !state.accepts_on_error() {
            return Err(CoreError::invalid_state(format!(
                "on_error requires an active or committed transaction (state: {state:?})"
            )));
        }
        let future = self.engine.transaction_on_error(self.native, code);
        let handle_state = Rc::clone(&self.state);
        let native = self.native;
        Ok(self
            .issue("on_error", future, decode::void)
            .with_hook(move |outcome| {
                if outcome.is_ok() {
                    handle_state.set(TransactionState::Active);
                    tracing::debug!(tr = %native, "transaction reset for retry");
                }
            }))
    }

    /// Discards staged mutations, conflict ranges and the read version and
    /// returns the handle to `Active`. Allowed in any state.
    pub fn reset(&self) {
        self.engine.transaction_reset(self.native);
        self.state.set(TransactionState::Active);
        tracing::debug!(tr = %self.native, "transaction reset");
    }

    /// Abandons the current attempt. Outstanding operations fail with the
    /// engine's `transaction_cancelled` until `reset`. Allowed in any state.
    pub fn cancel(&self) {
        self.engine.transaction_cancel(self.native);
        self.state.set(TransactionState::Canceled);
        tracing::debug!(tr = %self.native, "transaction canceled");
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        self.engine.transaction_destroy(self.native);
        tracing::debug!(tr = %self.native, "transaction released");
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.native)
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;
    use std::cell::RefCell;
    use std::time::{Duration, Instant};
    use txbridge_engine::{codes, EngineConfig, MemoryEngine};

    fn setup() -> (Arc<MemoryEngine>, Client, CallerContext) {
        let engine = Arc::new(MemoryEngine::new(EngineConfig::new().no_backoff()).unwrap());
        let client = Client::new(engine.clone());
        (engine, client, CallerContext::new())
    }

    fn resolve<T: 'static>(ctx: &CallerContext, op: AsyncOperation<T>) -> CoreResult<T> {
        let slot = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        op.on_ready(move |outcome| *sink.borrow_mut() = Some(outcome))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while slot.borrow().is_none() {
            assert!(Instant::now() < deadline, "operation never resolved");
            ctx.dispatch_next(Duration::from_millis(10));
        }
        let outcome = slot.borrow_mut().take().unwrap();
        outcome
    }

    #[test]
    fn operations_require_an_active_transaction() {
        let (_engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        let commit = tr.commit().unwrap();
        assert_eq!(tr.state(), TransactionState::Committed);

        assert!(matches!(tr.set("k", "v"), Err(CoreError::InvalidState { .. })));
        assert!(matches!(tr.get("k", false), Err(CoreError::InvalidState { .. })));
        assert!(matches!(tr.commit(), Err(CoreError::InvalidState { .. })));

        resolve(&ctx, commit).unwrap();
        tr.reset();
        assert_eq!(tr.state(), TransactionState::Active);
        tr.set("k", "v").unwrap();
    }

    #[test]
    fn canceled_transaction_rejects_on_error() {
        let (_engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        tr.cancel();
        assert_eq!(tr.state(), TransactionState::Canceled);
        assert!(matches!(
            tr.on_error(codes::NOT_COMMITTED),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(tr.get_committed_version().is_err());
    }

    #[test]
    fn successful_on_error_reactivates_the_handle() {
        let (_engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        tr.set("k", "v").unwrap();
        let commit = tr.commit().unwrap();
        resolve(&ctx, commit).unwrap();
        assert_eq!(tr.state(), TransactionState::Committed);

        let retry = tr.on_error(codes::NOT_COMMITTED).unwrap();
        resolve(&ctx, retry).unwrap();
        assert_eq!(tr.state(), TransactionState::Active);
    }

    #[test]
    fn failed_on_error_leaves_state_alone() {
        let (_engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        let commit = tr.commit().unwrap();
        resolve(&ctx, commit).unwrap();

        let retry = tr.on_error(codes::KEY_TOO_LARGE).unwrap();
        let err = resolve(&ctx, retry).unwrap_err();
        assert_eq!(err.code(), Some(codes::KEY_TOO_LARGE));
        assert_eq!(tr.state(), TransactionState::Committed);
    }

    #[test]
    fn versionstamp_is_version_shaped() {
        let (engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        tr.set("k", "v").unwrap();
        let stamp = tr.get_versionstamp().unwrap();

        // The same native call decoded as a key is a shape mismatch.
        let as_key = AsyncOperation::new(
            engine.clone(),
            engine.transaction_get_versionstamp(tr.id()),
            decode::key,
            &ctx,
        );

        let commit = tr.commit().unwrap();
        resolve(&ctx, commit).unwrap();

        let version = resolve(&ctx, stamp).unwrap();
        assert_eq!(version, tr.get_committed_version().unwrap());
        let err = resolve(&ctx, as_key).unwrap_err();
        assert_eq!(err.code(), Some(codes::RESULT_TYPE_MISMATCH));
    }

    #[test]
    fn range_uses_the_default_streaming_mode() {
        let engine = Arc::new(MemoryEngine::with_defaults().unwrap());
        let client = Client::with_config(
            engine,
            ClientConfig::new().default_streaming_mode(txbridge_engine::StreamingMode::Small),
        );
        let ctx = CallerContext::new();
        let tr = client.create_transaction(&ctx).unwrap();
        let request = tr.range(
            KeySelector::first_greater_or_equal(""),
            KeySelector::first_greater_or_equal(b"\xff"),
        );
        assert_eq!(request.mode, txbridge_engine::StreamingMode::Small);
    }

    #[test]
    fn unknown_option_surfaces_engine_error() {
        let (_engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        let err = tr.set_option(9999, None).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_OPTION));
    }

    #[test]
    fn dropping_the_handle_releases_the_native_transaction() {
        let (engine, client, ctx) = setup();
        let tr = client.create_transaction(&ctx).unwrap();
        assert_eq!(engine.stats().live_transactions, 1);
        drop(tr);
        assert_eq!(engine.stats().live_transactions, 0);
    }
}

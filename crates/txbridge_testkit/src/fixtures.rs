//! Test fixtures and engine helpers.
//!
//! Provides a [`TestBed`] that owns an in-memory engine, a client and the
//! caller context results are delivered through, plus helpers that pump
//! the context until an operation resolves.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use txbridge_core::{
    AsyncOperation, CallerContext, Client, ClientConfig, CoreError, CoreResult, KeyValue,
    RangeRequest, TransactionHandle,
};
use txbridge_engine::{EngineConfig, MemoryEngine};

/// How long helpers pump a context before giving up.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatches `ctx` until `done` returns true.
///
/// # Panics
///
/// Panics after [`DELIVERY_TIMEOUT`].
pub fn pump_until(ctx: &CallerContext, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + DELIVERY_TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for delivery");
        ctx.dispatch_next(Duration::from_millis(10));
    }
}

/// Registers a continuation on `op` and pumps `ctx` until it runs.
pub fn wait_on<T: 'static>(ctx: &CallerContext, op: AsyncOperation<T>) -> CoreResult<T> {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    op.on_ready(move |outcome| *sink.borrow_mut() = Some(outcome))?;
    pump_until(ctx, || slot.borrow().is_some());
    let outcome = slot
        .borrow_mut()
        .take()
        .unwrap_or(Err(CoreError::ContextClosed));
    outcome
}

/// Runs `body` in a retry loop until its commit succeeds.
///
/// Engine errors from `body` or the commit go through `on_error`; a
/// non-retryable error ends the loop with that error.
pub fn transact<R>(
    client: &Client,
    ctx: &CallerContext,
    mut body: impl FnMut(&TransactionHandle) -> CoreResult<R>,
) -> CoreResult<R> {
    let tr = client.create_transaction(ctx)?;
    loop {
        let attempt = body(&tr).and_then(|value| {
            wait_on(ctx, tr.commit()?)?;
            Ok(value)
        });
        match attempt {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(code) = err.code() else {
                    return Err(err);
                };
                tracing::debug!(tr = %tr.id(), code, "retrying transaction");
                wait_on(ctx, tr.on_error(code)?)?;
            }
        }
    }
}

/// An in-memory engine with a client and caller context.
pub struct TestBed {
    /// The engine, for inspecting stats.
    pub engine: Arc<MemoryEngine>,
    /// The client bound to the engine.
    pub client: Client,
    /// The context results are delivered through.
    pub ctx: CallerContext,
}

impl TestBed {
    /// Creates a bed with zero retry backoff.
    pub fn memory() -> Self {
        Self::with_config(EngineConfig::new().no_backoff())
    }

    /// Creates a bed with a custom engine configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_configs(config, ClientConfig::default())
    }

    /// Creates a bed with custom engine and client configurations.
    pub fn with_configs(engine: EngineConfig, client: ClientConfig) -> Self {
        let engine = Arc::new(MemoryEngine::new(engine).expect("Failed to start engine"));
        let client = Client::with_config(engine.clone(), client);
        Self {
            engine,
            client,
            ctx: CallerContext::new(),
        }
    }

    /// Opens a transaction on the bed's context.
    pub fn transaction(&self) -> TransactionHandle {
        self.client
            .create_transaction(&self.ctx)
            .expect("Failed to create transaction")
    }

    /// Waits for `op` on the bed's context.
    pub fn wait<T: 'static>(&self, op: AsyncOperation<T>) -> CoreResult<T> {
        wait_on(&self.ctx, op)
    }

    /// Dispatches the bed's context until `done` returns true.
    pub fn pump_until(&self, done: impl FnMut() -> bool) {
        pump_until(&self.ctx, done);
    }

    /// Commits `pairs` in one transaction.
    pub fn write<K, V>(&self, pairs: &[(K, V)])
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let tr = self.transaction();
        for (key, value) in pairs {
            tr.set(key.as_ref(), value.as_ref())
                .expect("Failed to stage write");
        }
        self.wait(tr.commit().expect("Failed to commit"))
            .expect("Commit failed");
    }

    /// Reads `key` in a fresh transaction.
    pub fn read(&self, key: impl AsRef<[u8]>) -> Option<Vec<u8>> {
        let tr = self.transaction();
        self.wait(tr.get(key.as_ref(), false).expect("Failed to issue get"))
            .expect("Read failed")
    }

    /// Follows continuations from `request` and concatenates every page.
    ///
    /// Returns the rows and the number of pages read.
    pub fn scan(&self, tr: &TransactionHandle, request: RangeRequest) -> CoreResult<(Vec<KeyValue>, usize)> {
        let mut rows = Vec::new();
        let mut pages = 0;
        let mut next = Some(request);
        while let Some(current) = next {
            let page = self.wait(tr.get_range(&current)?)?;
            pages += 1;
            next = current.continuation(&page);
            rows.extend(page.key_values);
        }
        Ok((rows, pages))
    }

    /// Asserts that every native future has been released exactly once.
    pub fn assert_no_leaks(&self) {
        self.ctx.dispatch_pending();
        let stats = self.engine.stats();
        assert_eq!(stats.live_futures, 0, "leaked native futures: {stats:?}");
        assert_eq!(stats.double_releases, 0, "double releases: {stats:?}");
    }
}

/// Runs a test against a fresh [`TestBed`] and checks for leaks afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use txbridge_testkit::with_test_bed;
///
/// #[test]
/// fn my_test() {
///     with_test_bed(|bed| {
///         bed.write(&[("k", "v")]);
///     });
/// }
/// ```
pub fn with_test_bed<F, R>(f: F) -> R
where
    F: FnOnce(&TestBed) -> R,
{
    let bed = TestBed::memory();
    let result = f(&bed);
    bed.assert_no_leaks();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use txbridge_engine::codes;

    #[test]
    fn write_then_read() {
        with_test_bed(|bed| {
            bed.write(&[("a", "1"), ("b", "2")]);
            assert_eq!(bed.read("a"), Some(b"1".to_vec()));
            assert_eq!(bed.read("missing"), None);
        });
    }

    #[test]
    fn transact_retries_conflicts() {
        let bed = TestBed::memory();
        bed.write(&[("n", "0")]);
        let mut attempts = 0;
        let value = transact(&bed.client, &bed.ctx, |tr| {
            attempts += 1;
            let current = wait_on(&bed.ctx, tr.get("n", false)?)?;
            if attempts == 1 {
                // Invalidate the read before the first commit.
                bed.write(&[("n", "1")]);
            }
            tr.set("n", "2")?;
            Ok(current)
        })
        .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(value, Some(b"1".to_vec()));
        assert_eq!(bed.read("n"), Some(b"2".to_vec()));
        bed.assert_no_leaks();
    }

    #[test]
    fn transact_stops_on_fatal_errors() {
        let bed = TestBed::with_config(EngineConfig::new().no_backoff().max_key_size(4));
        let err = transact(&bed.client, &bed.ctx, |tr| tr.set("too-long", "v")).unwrap_err();
        assert_eq!(err.code(), Some(codes::KEY_TOO_LARGE));
        bed.assert_no_leaks();
    }
}

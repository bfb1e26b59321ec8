//! Integration tests for the transaction API against the in-memory engine.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use txbridge_core::{
    codes, AsyncOperation, CallerContext, Client, CoreError, CoreResult, KeySelector,
    MutationType, OperationState, RangeRequest, RangeResult, TransactionState, WatchState,
};
use txbridge_engine::{EngineConfig, MemoryEngine};

struct Harness {
    engine: Arc<MemoryEngine>,
    client: Client,
    ctx: CallerContext,
}

impl Harness {
    fn new() -> Self {
        let engine = Arc::new(MemoryEngine::new(EngineConfig::new().no_backoff()).unwrap());
        let client = Client::new(engine.clone());
        Self {
            engine,
            client,
            ctx: CallerContext::new(),
        }
    }

    fn wait<T: 'static>(&self, op: AsyncOperation<T>) -> CoreResult<T> {
        let slot = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        op.on_ready(move |outcome| *sink.borrow_mut() = Some(outcome))
            .unwrap();
        self.pump_until(|| slot.borrow().is_some());
        let outcome = slot.borrow_mut().take().unwrap();
        outcome
    }

    fn pump_until(&self, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for delivery");
            self.ctx.dispatch_next(Duration::from_millis(10));
        }
    }

    fn write(&self, pairs: &[(&str, &str)]) {
        let tr = self.client.create_transaction(&self.ctx).unwrap();
        for (key, value) in pairs {
            tr.set(*key, *value).unwrap();
        }
        self.wait(tr.commit().unwrap()).unwrap();
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let tr = self.client.create_transaction(&self.ctx).unwrap();
        self.wait(tr.get(key, false).unwrap()).unwrap()
    }

    fn assert_clean(&self) {
        self.ctx.dispatch_pending();
        let stats = self.engine.stats();
        assert_eq!(stats.live_futures, 0, "leaked futures: {stats:?}");
        assert_eq!(stats.double_releases, 0);
    }
}

#[test]
fn absent_key_differs_from_empty_value() {
    let h = Harness::new();
    h.write(&[("empty", "")]);

    assert_eq!(h.read("never-written"), None);
    assert_eq!(h.read("empty"), Some(Vec::new()));
    h.assert_clean();
}

#[test]
fn paginates_five_keys_two_at_a_time() {
    let h = Harness::new();
    h.write(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);

    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let first = RangeRequest::new(
        KeySelector::first_greater_or_equal("a"),
        KeySelector::first_greater_or_equal("z"),
    )
    .with_limit(2);

    let page = h.wait(tr.get_range(&first).unwrap()).unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.more);

    let next = first.continuation(&page).unwrap();
    assert_eq!(next.begin, KeySelector::first_greater_than("b"));
    assert_eq!(next.iteration, 1);

    // The limit caps each page, so a derived continuation would return two
    // more rows. Lifting it returns the rest in one call (see DESIGN.md,
    // "Continuation limit").
    let rest = h.wait(tr.get_range(&next.with_limit(0)).unwrap()).unwrap();
    assert!(!rest.more);

    let keys: Vec<Vec<u8>> = page
        .key_values
        .iter()
        .chain(rest.key_values.iter())
        .map(|kv| kv.key.clone())
        .collect();
    let expected: Vec<Vec<u8>> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|k| k.as_bytes().to_vec())
        .collect();
    assert_eq!(keys, expected);

    drop(tr);
    h.assert_clean();
}

#[test]
fn continuation_pages_cover_the_range_exactly() {
    let h = Harness::new();
    let pairs: Vec<(String, String)> = (0..17).map(|i| (format!("k{i:02}"), i.to_string())).collect();
    let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    h.write(&refs);

    let tr = h.client.create_transaction(&h.ctx).unwrap();
    for reverse in [false, true] {
        let mut request = Some(RangeRequest::prefix("k").with_limit(3).reverse(reverse));
        let mut seen = Vec::new();
        while let Some(current) = request {
            let page: RangeResult = h.wait(tr.get_range(&current).unwrap()).unwrap();
            seen.extend(page.key_values.iter().map(|kv| kv.key.clone()));
            request = current.continuation(&page);
        }
        let mut expected: Vec<Vec<u8>> = pairs.iter().map(|(k, _)| k.as_bytes().to_vec()).collect();
        if reverse {
            expected.reverse();
        }
        assert_eq!(seen, expected, "reverse = {reverse}");
    }
    drop(tr);
    h.assert_clean();
}

#[test]
fn inverted_conflict_range_fails_without_effect() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();

    let err = tr.add_read_conflict_range("z", "a").unwrap_err();
    assert!(matches!(err, CoreError::InvalidParameter { .. }));
    let err = tr.add_write_conflict_range("z", "a").unwrap_err();
    assert!(matches!(err, CoreError::InvalidParameter { .. }));
    assert_eq!(tr.state(), TransactionState::Active);

    // Nothing was staged, so the commit is read-only.
    h.wait(tr.commit().unwrap()).unwrap();
    assert_eq!(tr.get_committed_version().unwrap(), -1);
    drop(tr);
    h.assert_clean();
}

#[test]
fn set_then_atomic_add_applies_in_order() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    tr.set("counter", 5u64.to_le_bytes().as_slice()).unwrap();
    tr.atomic_op("counter", 7u64.to_le_bytes().as_slice(), MutationType::Add)
        .unwrap();

    let staged = h.wait(tr.get("counter", false).unwrap()).unwrap();
    assert_eq!(staged, Some(12u64.to_le_bytes().to_vec()));
    h.wait(tr.commit().unwrap()).unwrap();
    drop(tr);

    assert_eq!(h.read("counter"), Some(12u64.to_le_bytes().to_vec()));
    h.assert_clean();
}

#[test]
fn conflict_then_on_error_gives_a_fresh_transaction() {
    let h = Harness::new();
    h.write(&[("balance", "10")]);

    let tr = h.client.create_transaction(&h.ctx).unwrap();
    h.wait(tr.get("balance", false).unwrap()).unwrap();
    tr.set("stale-write", "x").unwrap();
    tr.add_write_conflict_range("audit", "audit\x00").unwrap();

    // A concurrent writer invalidates the read.
    h.write(&[("balance", "20")]);

    let err = h.wait(tr.commit().unwrap()).unwrap_err();
    assert_eq!(err.code(), Some(codes::NOT_COMMITTED));
    assert!(err.is_retryable());

    h.wait(tr.on_error(codes::NOT_COMMITTED).unwrap()).unwrap();
    assert_eq!(tr.state(), TransactionState::Active);

    // The failed attempt's writes are gone and a clean retry commits.
    assert_eq!(h.wait(tr.get("stale-write", false).unwrap()).unwrap(), None);
    let balance = h.wait(tr.get("balance", false).unwrap()).unwrap();
    assert_eq!(balance, Some(b"20".to_vec()));
    tr.set("balance", "21").unwrap();
    h.wait(tr.commit().unwrap()).unwrap();
    assert!(tr.get_committed_version().unwrap() > 0);
    drop(tr);

    assert_eq!(h.read("stale-write"), None);
    assert_eq!(h.read("balance"), Some(b"21".to_vec()));
    h.assert_clean();
}

#[test]
fn on_error_discards_conflict_ranges_of_the_failed_attempt() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    tr.add_read_conflict_range("guard", "guard\x00").unwrap();
    tr.add_write_conflict_range("audit", "audit\x00").unwrap();
    tr.set("note", "first").unwrap();

    h.write(&[("guard", "1")]);
    let err = h.wait(tr.commit().unwrap()).unwrap_err();
    assert_eq!(err.code(), Some(codes::NOT_COMMITTED));
    h.wait(tr.on_error(codes::NOT_COMMITTED).unwrap()).unwrap();

    // Pin the retry's read version, then write the guarded key after it.
    h.wait(tr.get_read_version().unwrap()).unwrap();
    tr.set("note", "second").unwrap();
    h.write(&[("guard", "2")]);

    // A reader of `audit` that predates the retry's commit.
    let reader = h.client.create_transaction(&h.ctx).unwrap();
    assert_eq!(h.wait(reader.get("audit", false).unwrap()).unwrap(), None);
    reader.set("audit-seen", "yes").unwrap();

    h.wait(tr.commit().unwrap()).unwrap();
    assert!(tr.get_committed_version().unwrap() > 0);
    h.wait(reader.commit().unwrap()).unwrap();

    drop(reader);
    drop(tr);
    assert_eq!(h.read("note"), Some(b"second".to_vec()));
    h.assert_clean();
}

#[test]
fn committed_version_before_commit_fails() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let err = tr.get_committed_version().unwrap_err();
    assert_eq!(err.code(), Some(codes::CLIENT_INVALID_OPERATION));
}

#[test]
fn oversized_key_surfaces_on_commit() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let key = vec![b'k'; 20_000];
    tr.set(key.as_slice(), "v").unwrap();
    let err = h.wait(tr.commit().unwrap()).unwrap_err();
    assert_eq!(err.code(), Some(codes::KEY_TOO_LARGE));
    assert!(!err.is_retryable());

    let err = h.wait(tr.on_error(codes::KEY_TOO_LARGE).unwrap()).unwrap_err();
    assert_eq!(err.code(), Some(codes::KEY_TOO_LARGE));
    drop(tr);
    h.assert_clean();
}

#[test]
fn every_operation_delivers_exactly_once_under_cancel_races() {
    let h = Harness::new();
    h.write(&[("k", "v")]);
    let tr = h.client.create_transaction(&h.ctx).unwrap();

    let deliveries = Rc::new(RefCell::new(Vec::new()));
    let mut ops = Vec::new();
    for i in 0..200 {
        let op = tr.get("k", false).unwrap();
        if i % 2 == 0 {
            op.cancel();
        }
        let sink = Rc::clone(&deliveries);
        op.on_ready(move |outcome| sink.borrow_mut().push((i, outcome)))
            .unwrap();
        if i % 3 == 0 {
            op.cancel();
        }
        ops.push(op);
    }

    h.pump_until(|| deliveries.borrow().len() == 200);
    h.ctx.dispatch_pending();
    std::thread::sleep(Duration::from_millis(20));
    h.ctx.dispatch_pending();

    let deliveries = deliveries.borrow();
    assert_eq!(deliveries.len(), 200);
    let mut seen = vec![false; 200];
    for (i, outcome) in deliveries.iter() {
        assert!(!seen[*i], "operation {i} delivered twice");
        seen[*i] = true;
        match outcome {
            Ok(value) => assert_eq!(value.as_deref(), Some(b"v".as_slice())),
            Err(err) => assert_eq!(*err, CoreError::Cancelled),
        }
    }
    for op in &ops {
        assert!(op.state().is_terminal());
    }
    drop(ops);
    drop(tr);
    h.assert_clean();
}

#[test]
fn dropping_an_unobserved_operation_releases_it() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    for _ in 0..50 {
        drop(tr.get("k", false).unwrap());
    }
    drop(tr.get_read_version().unwrap());

    // Completions for withdrawn operations are released on dispatch.
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.engine.stats().live_futures > 0 {
        assert!(Instant::now() < deadline, "futures never released");
        h.ctx.dispatch_next(Duration::from_millis(10));
    }
    assert_eq!(h.ctx.pending_operations(), 0);
    drop(tr);
    h.assert_clean();
}

#[test]
fn second_registration_is_rejected() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let op = tr.get("k", false).unwrap();
    op.on_ready(|_| {}).unwrap();
    assert_eq!(op.on_ready(|_| {}).unwrap_err(), CoreError::AlreadyRegistered);
    h.pump_until(|| op.state() == OperationState::Resolved && h.ctx.pending_operations() == 0);
    drop(op);
    drop(tr);
    h.assert_clean();
}

#[test]
fn watch_cancel_right_after_creation_has_one_outcome() {
    let h = Harness::new();
    for round in 0..50 {
        let tr = h.client.create_transaction(&h.ctx).unwrap();
        let watch = tr.watch("w").unwrap();
        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        watch
            .on_change(move |outcome| sink.borrow_mut().push(outcome))
            .unwrap();

        // Race a firing commit against the cancel.
        if round % 2 == 0 {
            let value = round.to_string();
            h.write(&[("w", value.as_str())]);
        }
        watch.cancel();

        h.pump_until(|| !outcomes.borrow().is_empty());
        h.ctx.dispatch_pending();
        let outcomes = outcomes.borrow();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Ok(()) => assert_eq!(watch.state(), WatchState::Fired),
            Err(err) => {
                assert_eq!(*err, CoreError::Cancelled);
                assert_eq!(watch.state(), WatchState::Canceled);
            }
        }
        drop(watch);
        drop(tr);
    }
    h.assert_clean();
    assert_eq!(h.engine.live_watches(), 0);
}

#[test]
fn cancel_after_fire_keeps_the_watch_armed_until_delivery() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let watch = tr.watch("w").unwrap();
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&outcomes);
    watch
        .on_change(move |outcome| sink.borrow_mut().push(outcome))
        .unwrap();

    // Commit from another context so nothing is dispatched on `h.ctx`.
    let writer_ctx = CallerContext::new();
    let writer = Client::new(h.engine.clone())
        .create_transaction(&writer_ctx)
        .unwrap();
    writer.set("w", "changed").unwrap();
    let done = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&done);
    writer
        .commit()
        .unwrap()
        .on_ready(move |outcome| *slot.borrow_mut() = Some(outcome))
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while done.borrow().is_none() {
        assert!(Instant::now() < deadline, "writer commit never delivered");
        writer_ctx.dispatch_next(Duration::from_millis(10));
    }
    assert_eq!(done.borrow_mut().take(), Some(Ok(())));

    // The fire resolved the watch before the cancel arrived.
    watch.cancel();
    assert_eq!(watch.state(), WatchState::Armed);
    assert!(outcomes.borrow().is_empty());

    h.pump_until(|| !outcomes.borrow().is_empty());
    h.ctx.dispatch_pending();
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert_eq!(watch.state(), WatchState::Fired);

    drop(watch);
    drop(writer);
    drop(tr);
    writer_ctx.dispatch_pending();
    h.assert_clean();
}

#[test]
fn watch_cancel_without_listener_releases_immediately() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let watch = tr.watch("w").unwrap();
    drop(tr);
    watch.cancel();
    assert_eq!(watch.state(), WatchState::Released);
    assert!(watch.is_released());
    assert!(watch.on_change(|_| {}).is_err());
    h.assert_clean();
}

#[test]
fn watch_outlives_its_transaction_and_ignores_identical_writes() {
    let h = Harness::new();
    h.write(&[("w", "same")]);

    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let watch = tr.watch("w").unwrap();
    drop(tr);

    let fired = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&fired);
    watch
        .on_change(move |outcome| *sink.borrow_mut() = Some(outcome))
        .unwrap();

    h.write(&[("w", "same")]);
    std::thread::sleep(Duration::from_millis(20));
    h.ctx.dispatch_pending();
    assert!(fired.borrow().is_none());
    assert_eq!(watch.state(), WatchState::Armed);

    h.write(&[("w", "changed")]);
    h.pump_until(|| fired.borrow().is_some());
    assert_eq!(fired.borrow_mut().take(), Some(Ok(())));
    assert_eq!(watch.state(), WatchState::Fired);
    drop(watch);
    h.assert_clean();
}

#[test]
fn dropping_a_watch_cancels_it() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let watch = tr.watch("w").unwrap();
    assert_eq!(h.engine.live_watches(), 1);
    drop(watch);
    assert_eq!(h.engine.live_watches(), 0);
    drop(tr);
    h.assert_clean();
}

#[test]
fn key_selectors_resolve_through_the_handle() {
    let h = Harness::new();
    h.write(&[("b", "1"), ("d", "2"), ("f", "3")]);
    let tr = h.client.create_transaction(&h.ctx).unwrap();

    let cases = [
        (KeySelector::first_greater_or_equal("c"), b"d".to_vec()),
        (KeySelector::first_greater_than("d"), b"f".to_vec()),
        (KeySelector::last_less_than("d"), b"b".to_vec()),
        (KeySelector::last_less_or_equal("d"), b"d".to_vec()),
        (KeySelector::first_greater_or_equal("b") + 1, b"d".to_vec()),
        (KeySelector::first_greater_than("f"), b"\xff".to_vec()),
        (KeySelector::last_less_than("b"), Vec::new()),
    ];
    for (selector, expected) in cases {
        let key = h.wait(tr.get_key(&selector, false).unwrap()).unwrap();
        assert_eq!(key, expected, "{selector:?}");
    }
    drop(tr);
    h.assert_clean();
}

#[test]
fn read_versions_and_addresses() {
    let h = Harness::new();
    h.write(&[("k", "v")]);
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    let version = h.wait(tr.get_read_version().unwrap()).unwrap();
    assert_eq!(version, h.engine.current_version());

    let addresses = h.wait(tr.get_addresses_for_key("k").unwrap()).unwrap();
    assert!(!addresses.is_empty());

    tr.set_read_version(version + 1_000).unwrap();
    let err = h.wait(tr.get("k", false).unwrap()).unwrap_err();
    assert_eq!(err.code(), Some(codes::FUTURE_VERSION));
    drop(tr);
    h.assert_clean();
}

#[test]
fn cancel_fails_outstanding_operations_until_reset() {
    let h = Harness::new();
    let tr = h.client.create_transaction(&h.ctx).unwrap();
    tr.set("k", "v").unwrap();
    tr.cancel();
    assert_eq!(tr.state(), TransactionState::Canceled);
    assert!(matches!(tr.commit(), Err(CoreError::InvalidState { .. })));

    tr.reset();
    assert_eq!(h.wait(tr.get("k", false).unwrap()).unwrap(), None);
    drop(tr);
    h.assert_clean();
}

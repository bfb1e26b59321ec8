//! Watch command implementation.

use super::{emit, CliResult, Session};
use crate::Format;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use txbridge_core::WatchState;
use txbridge_engine::EngineConfig;

/// Watch result.
#[derive(Debug, Serialize)]
pub struct WatchReport {
    /// Watched key.
    pub key: String,
    /// Final watch state.
    pub state: String,
    /// Outcome delivered to the listener.
    pub outcome: String,
    /// Writes committed before the watch fired.
    pub writes: usize,
}

/// Runs the watch command.
///
/// First commits a write that leaves the value unchanged, then one that
/// changes it, unless `cancel` is set.
pub fn run(config: EngineConfig, key: &str, cancel: bool, format: Format) -> CliResult<()> {
    let session = Session::start(config)?;
    session.transact(|_, tr| Ok(tr.set(key, "initial")?))?;

    let watch = {
        let tr = session.transaction()?;
        tr.watch(key)?
    };
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    watch.on_change(move |result| *sink.borrow_mut() = Some(result))?;

    let mut writes = 0;
    if cancel {
        watch.cancel();
    } else {
        for value in ["initial", "changed"] {
            session.transact(|_, tr| Ok(tr.set(key, value)?))?;
            writes += 1;
            session.ctx.dispatch_pending();
            if outcome.borrow().is_some() {
                break;
            }
        }
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while outcome.borrow().is_none() && Instant::now() < deadline {
        session.ctx.dispatch_next(Duration::from_millis(50));
    }

    let delivered = match outcome.borrow_mut().take() {
        Some(Ok(())) => "fired".to_string(),
        Some(Err(err)) => err.to_string(),
        None => "pending".to_string(),
    };
    let state = watch.state();
    drop(watch);

    let report = WatchReport {
        key: key.to_string(),
        state: format!("{state:?}"),
        outcome: delivered,
        writes,
    };
    emit(format, &report, |r| {
        println!("Key: {}", r.key);
        println!("Writes: {}", r.writes);
        println!("Outcome: {}", r.outcome);
        println!("State: {}", r.state);
    })?;

    if state == WatchState::Armed {
        tracing::warn!(key, "watch never resolved");
    }
    Ok(())
}

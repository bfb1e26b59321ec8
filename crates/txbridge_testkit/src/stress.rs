//! Stress runs for txbridge.
//!
//! These runs drive many interleavings of engine completions against
//! caller cancellations, and many threads retrying against one engine.

use crate::fixtures::{pump_until, transact, wait_on, TestBed};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use txbridge_core::{CallerContext, Client, CoreError, CoreResult};
use txbridge_engine::MemoryEngine;

/// Result of a stress run.
#[derive(Debug, Clone, Default)]
pub struct StressResult {
    /// Operations issued.
    pub issued: usize,
    /// Deliveries carrying a value.
    pub resolved: usize,
    /// Deliveries carrying `Cancelled`.
    pub canceled: usize,
    /// Operations delivered more than once. Always zero when the bridge
    /// holds its guarantee.
    pub duplicates: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressResult {
    /// Deliveries of any kind.
    pub fn delivered(&self) -> usize {
        self.resolved + self.canceled
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Issued: {}", self.issued);
        println!("Resolved: {}", self.resolved);
        println!("Canceled: {}", self.canceled);
        println!("Duplicates: {}", self.duplicates);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per run.
    pub operations: usize,
    /// Threads for contended runs.
    pub threads: usize,
    /// Increments per thread in contended runs.
    pub increments: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            increments: 50,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            operations: 300,
            threads: 3,
            increments: 15,
        }
    }
}

/// Issues reads and cancels a varying subset at varying points.
///
/// Every operation gets a continuation; the run checks each is delivered
/// exactly once.
pub fn run_cancel_race(bed: &TestBed, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    bed.write(&[("race", "value")]);
    let tr = bed.transaction();

    let seen = Rc::new(RefCell::new(vec![0usize; config.operations]));
    let result = Rc::new(RefCell::new(StressResult {
        issued: config.operations,
        ..StressResult::default()
    }));

    let mut ops = Vec::with_capacity(config.operations);
    for i in 0..config.operations {
        let op = tr.get("race", false).expect("Failed to issue get");
        match i % 4 {
            0 => op.cancel(),
            1 => thread::yield_now(),
            _ => {}
        }
        let seen = Rc::clone(&seen);
        let result = Rc::clone(&result);
        op.on_ready(move |outcome| {
            let mut seen = seen.borrow_mut();
            seen[i] += 1;
            let mut result = result.borrow_mut();
            if seen[i] > 1 {
                result.duplicates += 1;
            }
            match outcome {
                Ok(_) => result.resolved += 1,
                Err(CoreError::Cancelled) => result.canceled += 1,
                Err(err) => panic!("unexpected failure: {err}"),
            }
        })
        .expect("Failed to register continuation");
        if i % 3 == 0 {
            op.cancel();
        }
        ops.push(op);
    }

    pump_until(&bed.ctx, || result.borrow().delivered() >= config.operations);
    // Give stragglers a chance to show up as duplicates.
    thread::sleep(Duration::from_millis(20));
    bed.ctx.dispatch_pending();
    drop(ops);

    let mut result = result.borrow().clone();
    result.duration = start.elapsed();
    result
}

/// Issues watches and cancels them while commits race to fire them.
pub fn run_watch_race(bed: &TestBed, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    let mut result = StressResult {
        issued: config.operations,
        ..StressResult::default()
    };
    for round in 0..config.operations {
        let tr = bed.transaction();
        let watch = tr.watch("watched").expect("Failed to create watch");
        drop(tr);

        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        watch
            .on_change(move |outcome| sink.borrow_mut().push(outcome))
            .expect("Failed to register listener");

        if round % 2 == 0 {
            let writer = bed.transaction();
            writer
                .set("watched", round.to_string())
                .expect("Failed to stage write");
            // Commit without waiting so the fire races the cancel below.
            writer
                .commit()
                .expect("Failed to commit")
                .on_ready(|_| {})
                .expect("Failed to register continuation");
        }
        watch.cancel();

        pump_until(&bed.ctx, || !outcomes.borrow().is_empty());
        bed.ctx.dispatch_pending();
        let outcomes = outcomes.borrow();
        if outcomes.len() > 1 {
            result.duplicates += outcomes.len() - 1;
        }
        match outcomes.first() {
            Some(Ok(())) => result.resolved += 1,
            Some(Err(_)) => result.canceled += 1,
            None => {}
        }
    }
    pump_until(&bed.ctx, || bed.ctx.pending_operations() == 0);
    result.duration = start.elapsed();
    result
}

/// Increments one counter from several threads with read-modify-write
/// transactions. Each thread owns its caller context.
///
/// Returns the final counter value and the number of retries observed.
pub fn run_contended_counter(
    engine: Arc<MemoryEngine>,
    config: &StressConfig,
) -> CoreResult<(u64, usize)> {
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let client = Client::new(engine.clone());
            let increments = config.increments;
            thread::spawn(move || -> CoreResult<usize> {
                let ctx = CallerContext::new();
                let mut retries = 0;
                for _ in 0..increments {
                    let mut attempts = 0;
                    transact(&client, &ctx, |tr| {
                        attempts += 1;
                        let current = wait_on(&ctx, tr.get("counter", false)?)?;
                        let value = decode_counter(current.as_deref());
                        tr.set("counter", (value + 1).to_le_bytes().as_slice())?;
                        Ok(())
                    })?;
                    retries += attempts - 1;
                }
                Ok(retries)
            })
        })
        .collect();

    let mut retries = 0;
    for handle in handles {
        retries += handle.join().expect("Worker thread panicked")?;
    }

    let client = Client::new(engine);
    let ctx = CallerContext::new();
    let tr = client.create_transaction(&ctx)?;
    let final_value = wait_on(&ctx, tr.get("counter", false)?)?;
    Ok((decode_counter(final_value.as_deref()), retries))
}

fn decode_counter(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map_or(0, u64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_race_delivers_once() {
        let bed = TestBed::memory();
        let result = run_cancel_race(&bed, &StressConfig::quick());
        assert_eq!(result.duplicates, 0);
        assert_eq!(result.delivered(), result.issued);
        assert!(result.canceled > 0);
        bed.assert_no_leaks();
    }

    #[test]
    fn contended_counter_converges() {
        let bed = TestBed::memory();
        let config = StressConfig::quick();
        let (value, _retries) = run_contended_counter(bed.engine.clone(), &config).unwrap();
        assert_eq!(value, (config.threads * config.increments) as u64);
    }
}

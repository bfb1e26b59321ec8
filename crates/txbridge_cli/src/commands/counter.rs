//! Counter command implementation.

use super::{emit, CliResult, Session};
use crate::Format;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use txbridge_engine::{EngineConfig, MemoryEngine};

const COUNTER_KEY: &str = "counter";

/// Outcome of a counter run.
#[derive(Debug, Serialize)]
pub struct CounterReport {
    /// Worker threads.
    pub workers: usize,
    /// Increments per worker.
    pub increments: usize,
    /// Final counter value.
    pub value: u64,
    /// Retries taken across all workers.
    pub retries: usize,
    /// Commits the engine accepted.
    pub commits: u64,
    /// Commits the engine rejected with a conflict.
    pub conflicts: u64,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u128,
}

/// Runs the counter command.
pub fn run(config: EngineConfig, workers: usize, increments: usize, format: Format) -> CliResult<()> {
    let start = Instant::now();
    let engine = Arc::new(MemoryEngine::new(config)?);

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || increment(engine, increments))
        })
        .collect();

    let mut retries = 0;
    for handle in handles {
        retries += handle
            .join()
            .map_err(|_| std::io::Error::other("worker thread panicked"))??;
    }

    let session = Session::attach(Arc::clone(&engine));
    let tr = session.transaction()?;
    let value = decode(session.wait(tr.get(COUNTER_KEY, false)?)?.as_deref());
    let stats = engine.stats();

    let report = CounterReport {
        workers,
        increments,
        value,
        retries,
        commits: stats.commits,
        conflicts: stats.conflicts,
        elapsed_ms: start.elapsed().as_millis(),
    };
    emit(format, &report, |r| {
        println!("Counter: {}", r.value);
        println!("Expected: {}", r.workers * r.increments);
        println!("Retries: {}", r.retries);
        println!("Commits: {}", r.commits);
        println!("Conflicts: {}", r.conflicts);
        println!("Elapsed: {} ms", r.elapsed_ms);
    })
}

fn increment(engine: Arc<MemoryEngine>, increments: usize) -> CliResult<usize> {
    let session = Session::attach(engine);
    let mut retries = 0;
    for _ in 0..increments {
        let ((), taken) = session.transact(|s, tr| {
            let current = decode(s.wait(tr.get(COUNTER_KEY, false)?)?.as_deref());
            tr.set(COUNTER_KEY, (current + 1).to_le_bytes().as_slice())?;
            Ok(())
        })?;
        retries += taken;
    }
    Ok(retries)
}

fn decode(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map_or(0, u64::from_le_bytes)
}

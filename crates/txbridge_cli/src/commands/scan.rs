//! Scan command implementation.

use super::{emit, printable, CliResult, Session};
use crate::Format;
use serde::Serialize;
use txbridge_core::{RangeRequest, StreamingMode};
use txbridge_engine::EngineConfig;

/// One page of a scan.
#[derive(Debug, Serialize)]
pub struct PageReport {
    /// Iteration counter the page was requested with.
    pub iteration: i32,
    /// Keys in the page.
    pub keys: Vec<String>,
    /// Whether more rows remained after the page.
    pub more: bool,
}

/// Scan result.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    /// Streaming mode used.
    pub mode: String,
    /// Rows per page.
    pub limit: i32,
    /// Scan direction.
    pub reverse: bool,
    /// Pages in order.
    pub pages: Vec<PageReport>,
    /// Total rows.
    pub rows: usize,
    /// Native futures still held after the scan.
    pub live_futures: u64,
}

/// Runs the scan command.
pub fn run(
    config: EngineConfig,
    keys: usize,
    limit: i32,
    mode: StreamingMode,
    reverse: bool,
    format: Format,
) -> CliResult<()> {
    let session = Session::start(config)?;
    seed(&session, keys)?;

    let tr = session.transaction()?;
    let mut request = Some(
        RangeRequest::prefix("key/")
            .with_limit(limit)
            .with_mode(mode)
            .reverse(reverse),
    );
    let mut pages = Vec::new();
    while let Some(current) = request {
        let page = session.wait(tr.get_range(&current)?)?;
        tracing::debug!(iteration = current.iteration, rows = page.len(), more = page.more, "page read");
        request = current.continuation(&page);
        pages.push(PageReport {
            iteration: current.iteration,
            keys: page.key_values.iter().map(|kv| printable(&kv.key)).collect(),
            more: page.more,
        });
    }

    drop(tr);

    let report = ScanReport {
        mode: format!("{mode:?}"),
        limit,
        reverse,
        rows: pages.iter().map(|p| p.keys.len()).sum(),
        pages,
        live_futures: session.engine.stats().live_futures,
    };
    emit(format, &report, |r| {
        println!("Mode: {} (limit {}, reverse {})", r.mode, r.limit, r.reverse);
        for page in &r.pages {
            println!(
                "Page {:>3}: {} rows{}",
                page.iteration,
                page.keys.len(),
                if page.more { ", more" } else { "" }
            );
            for key in &page.keys {
                println!("  {key}");
            }
        }
        println!("Total rows: {}", r.rows);
        println!("Live futures: {}", r.live_futures);
    })
}

fn seed(session: &Session, keys: usize) -> CliResult<()> {
    session.transact(|_, tr| {
        for i in 0..keys {
            tr.set(format!("key/{i:05}"), format!("value {i}"))?;
        }
        Ok(())
    })?;
    Ok(())
}

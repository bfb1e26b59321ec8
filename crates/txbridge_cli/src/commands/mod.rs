//! CLI command implementations.

pub mod counter;
pub mod errors;
pub mod scan;
pub mod watch;

use crate::Format;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use txbridge_core::{AsyncOperation, CallerContext, Client, CoreError, CoreResult, TransactionHandle};
use txbridge_engine::{EngineConfig, MemoryEngine};

/// How long a command waits for one result.
const RESULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine could not be started.
    #[error("failed to start engine: {0}")]
    Engine(#[from] std::io::Error),

    /// A transaction operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A result did not arrive in time.
    #[error("timed out after {0:?} waiting for a result")]
    Timeout(Duration),

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// An engine, a client and the context this thread dispatches.
pub struct Session {
    /// The engine, kept for stats.
    pub engine: Arc<MemoryEngine>,
    /// The client.
    pub client: Client,
    /// The caller context.
    pub ctx: CallerContext,
}

impl Session {
    /// Starts an engine and binds a client to it.
    pub fn start(config: EngineConfig) -> CliResult<Self> {
        let engine = Arc::new(MemoryEngine::new(config)?);
        Ok(Self::attach(engine))
    }

    /// Binds a new client and context to an existing engine.
    pub fn attach(engine: Arc<MemoryEngine>) -> Self {
        let client = Client::new(engine.clone());
        Self {
            engine,
            client,
            ctx: CallerContext::new(),
        }
    }

    /// Dispatches the context until `op` delivers its result.
    pub fn wait<T: 'static>(&self, op: AsyncOperation<T>) -> CliResult<T> {
        let slot = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        op.on_ready(move |outcome| *sink.borrow_mut() = Some(outcome))?;

        let deadline = Instant::now() + RESULT_TIMEOUT;
        loop {
            if let Some(outcome) = slot.borrow_mut().take() {
                return Ok(outcome?);
            }
            if Instant::now() >= deadline {
                return Err(CliError::Timeout(RESULT_TIMEOUT));
            }
            self.ctx.dispatch_next(Duration::from_millis(50));
        }
    }

    /// Runs `body` and commits, retrying through `on_error`.
    ///
    /// Returns the body's value and the number of retries.
    pub fn transact<R>(
        &self,
        mut body: impl FnMut(&Self, &TransactionHandle) -> CliResult<R>,
    ) -> CliResult<(R, usize)> {
        let tr = self.client.create_transaction(&self.ctx)?;
        let mut retries = 0;
        loop {
            let attempt = body(self, &tr).and_then(|value| {
                self.wait(tr.commit()?)?;
                Ok(value)
            });
            let err = match attempt {
                Ok(value) => return Ok((value, retries)),
                Err(CliError::Core(err)) => err,
                Err(other) => return Err(other),
            };
            let Some(code) = err.code() else {
                return Err(err.into());
            };
            tracing::debug!(tr = %tr.id(), code, retries, "transaction failed; retrying");
            self.wait(tr.on_error(code)?)?;
            retries += 1;
        }
    }

    /// Convenience wrapper around [`Client::create_transaction`].
    pub fn transaction(&self) -> CoreResult<TransactionHandle> {
        self.client.create_transaction(&self.ctx)
    }
}

/// Prints `report` as JSON or through `text`.
pub fn emit<T: Serialize>(format: Format, report: &T, text: impl FnOnce(&T)) -> CliResult<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Format::Text => text(report),
    }
    Ok(())
}

/// Renders bytes as text, escaping non-printable bytes.
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_escapes_binary() {
        assert_eq!(printable(b"key\x00\xff"), "key\\x00\\xff");
    }

    #[test]
    fn transact_commits_and_counts_retries() {
        let session = Session::start(EngineConfig::new().no_backoff()).unwrap();
        let mut first = true;
        let (_, retries) = session
            .transact(|s, tr| {
                s.wait(tr.get("k", false)?)?;
                if std::mem::take(&mut first) {
                    let other = s.transaction()?;
                    other.set("k", "other")?;
                    s.wait(other.commit()?)?;
                }
                tr.set("k", "mine")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(retries, 1);

        let tr = session.transaction().unwrap();
        let value = session.wait(tr.get("k", false).unwrap()).unwrap();
        assert_eq!(value, Some(b"mine".to_vec()));
    }
}

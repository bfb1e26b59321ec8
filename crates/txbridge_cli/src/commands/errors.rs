//! Errors command implementation.

use super::{emit, CliResult};
use crate::Format;
use serde::Serialize;
use txbridge_engine::{codes, error_category, error_message, ErrorCode};

/// One registry entry.
#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    /// Error code.
    pub code: ErrorCode,
    /// Registry message.
    pub message: &'static str,
    /// Retry category.
    pub category: String,
    /// Whether `on_error` retries it.
    pub retryable: bool,
}

impl ErrorEntry {
    fn of(code: ErrorCode) -> Self {
        let category = error_category(code);
        Self {
            code,
            message: error_message(code),
            category: format!("{category:?}"),
            retryable: category.is_retryable(),
        }
    }
}

/// Runs the errors command.
pub fn run(code: Option<ErrorCode>, format: Format) -> CliResult<()> {
    let entries: Vec<ErrorEntry> = match code {
        Some(code) => vec![ErrorEntry::of(code)],
        None => codes::ALL.iter().copied().map(ErrorEntry::of).collect(),
    };
    emit(format, &entries, |entries| {
        for entry in entries {
            println!(
                "{:>5}  {:<18}  {}",
                entry.code, entry.category, entry.message
            );
        }
    })
}

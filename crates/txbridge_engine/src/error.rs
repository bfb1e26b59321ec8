//! Engine error codes and the code-to-message registry.
//!
//! Every engine call reports failure as an integer code. The engine owns the
//! registry that maps a code to its message and to its retry category; the
//! binding layer surfaces both unchanged.

use thiserror::Error;

/// Integer error code reported by the engine. `0` means success.
pub type ErrorCode = i32;

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Well-known engine error codes.
pub mod codes {
    use super::ErrorCode;

    /// Success.
    pub const SUCCESS: ErrorCode = 0;
    /// Read version is older than the oldest retained version.
    pub const TRANSACTION_TOO_OLD: ErrorCode = 1007;
    /// Requested read version is newer than the latest committed version.
    pub const FUTURE_VERSION: ErrorCode = 1009;
    /// Commit rejected because of a read-write conflict.
    pub const NOT_COMMITTED: ErrorCode = 1020;
    /// Commit outcome is unknown.
    pub const COMMIT_UNKNOWN_RESULT: ErrorCode = 1021;
    /// Transaction was canceled.
    pub const TRANSACTION_CANCELLED: ErrorCode = 1025;
    /// Too many outstanding watches.
    pub const TOO_MANY_WATCHES: ErrorCode = 1032;
    /// Asynchronous operation was canceled.
    pub const OPERATION_CANCELLED: ErrorCode = 1101;
    /// Operation is invalid in the transaction's current state.
    pub const CLIENT_INVALID_OPERATION: ErrorCode = 2000;
    /// Key lies outside the legal key range.
    pub const KEY_OUTSIDE_LEGAL_RANGE: ErrorCode = 2004;
    /// Range begin is greater than range end.
    pub const INVERTED_RANGE: ErrorCode = 2005;
    /// Option value is malformed.
    pub const INVALID_OPTION_VALUE: ErrorCode = 2006;
    /// Option code is unknown.
    pub const INVALID_OPTION: ErrorCode = 2007;
    /// Result requested from a future that is not ready.
    pub const FUTURE_NOT_SET: ErrorCode = 2015;
    /// Future id does not refer to a live future.
    pub const FUTURE_RELEASED: ErrorCode = 2016;
    /// Transaction id does not refer to a live transaction.
    pub const INVALID_TRANSACTION: ErrorCode = 2020;
    /// Versionstamp requested from a transaction that committed no writes.
    pub const NO_COMMIT_VERSION: ErrorCode = 2021;
    /// Result getter does not match the shape of the future's result.
    pub const RESULT_TYPE_MISMATCH: ErrorCode = 2030;
    /// Key exceeds the maximum key size.
    pub const KEY_TOO_LARGE: ErrorCode = 2102;
    /// Value exceeds the maximum value size.
    pub const VALUE_TOO_LARGE: ErrorCode = 2103;
    /// Exact streaming mode used without a row limit.
    pub const EXACT_MODE_WITHOUT_LIMITS: ErrorCode = 2210;
    /// Unknown error.
    pub const UNKNOWN_ERROR: ErrorCode = 4000;

    /// Every registered code, in ascending order.
    pub const ALL: &[ErrorCode] = &[
        SUCCESS,
        TRANSACTION_TOO_OLD,
        FUTURE_VERSION,
        NOT_COMMITTED,
        COMMIT_UNKNOWN_RESULT,
        TRANSACTION_CANCELLED,
        TOO_MANY_WATCHES,
        OPERATION_CANCELLED,
        CLIENT_INVALID_OPERATION,
        KEY_OUTSIDE_LEGAL_RANGE,
        INVERTED_RANGE,
        INVALID_OPTION_VALUE,
        INVALID_OPTION,
        FUTURE_NOT_SET,
        FUTURE_RELEASED,
        INVALID_TRANSACTION,
        NO_COMMIT_VERSION,
        RESULT_TYPE_MISMATCH,
        KEY_TOO_LARGE,
        VALUE_TOO_LARGE,
        EXACT_MODE_WITHOUT_LIMITS,
        UNKNOWN_ERROR,
    ];
}

/// Retry category of an error code, as decided by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Conflict with a concurrent transaction; retrying the body may succeed.
    RetryableConflict,
    /// Transient failure; retrying may succeed.
    RetryableTransient,
    /// Retrying will not help.
    NonRetryable,
}

impl ErrorCategory {
    /// Returns true for both retryable categories.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::NonRetryable)
    }
}

/// Returns the registry message for an error code.
pub fn error_message(code: ErrorCode) -> &'static str {
    match code {
        codes::SUCCESS => "Success",
        codes::TRANSACTION_TOO_OLD => "Transaction is too old to perform reads or be committed",
        codes::FUTURE_VERSION => "Request for future version",
        codes::NOT_COMMITTED => "Transaction not committed due to conflict with another transaction",
        codes::COMMIT_UNKNOWN_RESULT => "Transaction may or may not have committed",
        codes::TRANSACTION_CANCELLED => "Operation aborted because the transaction was cancelled",
        codes::TOO_MANY_WATCHES => "Too many watches currently set",
        codes::OPERATION_CANCELLED => "Asynchronous operation cancelled",
        codes::CLIENT_INVALID_OPERATION => "Invalid API call",
        codes::KEY_OUTSIDE_LEGAL_RANGE => "Key outside legal range",
        codes::INVERTED_RANGE => "Range begin key larger than end key",
        codes::INVALID_OPTION_VALUE => "Option set with an invalid value",
        codes::INVALID_OPTION => "Option not valid in this context",
        codes::FUTURE_NOT_SET => "Result not available because the future is not ready",
        codes::FUTURE_RELEASED => "Future has been released",
        codes::INVALID_TRANSACTION => "Transaction handle is not valid",
        codes::NO_COMMIT_VERSION => "Transaction is read-only and therefore does not have a commit version",
        codes::RESULT_TYPE_MISMATCH => "Result requested with a getter of the wrong shape",
        codes::KEY_TOO_LARGE => "Key length exceeds limit",
        codes::VALUE_TOO_LARGE => "Value length exceeds limit",
        codes::EXACT_MODE_WITHOUT_LIMITS => "EXACT streaming mode requires limits, but none were given",
        _ => "An unknown error occurred",
    }
}

/// Returns the retry category for an error code.
pub fn error_category(code: ErrorCode) -> ErrorCategory {
    match code {
        codes::NOT_COMMITTED => ErrorCategory::RetryableConflict,
        codes::TRANSACTION_TOO_OLD | codes::FUTURE_VERSION | codes::COMMIT_UNKNOWN_RESULT => {
            ErrorCategory::RetryableTransient
        }
        _ => ErrorCategory::NonRetryable,
    }
}

/// An error reported by the engine: a registry code and its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    code: ErrorCode,
    message: &'static str,
}

impl EngineError {
    /// Creates an error for a registry code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: error_message(code),
        }
    }

    /// Returns the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the registry message.
    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Returns the engine's retry category for this error.
    pub fn category(&self) -> ErrorCategory {
        error_category(self.code)
    }
}

impl From<ErrorCode> for EngineError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

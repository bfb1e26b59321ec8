//! Error types for txbridge core.

use thiserror::Error;
use txbridge_engine::{EngineError, ErrorCategory, ErrorCode};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by transaction handles and async operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Error reported by the store engine, with its registry message.
    #[error("{message} (code {code})")]
    Engine {
        /// Engine error code.
        code: ErrorCode,
        /// Registry message for the code.
        message: &'static str,
        /// Retry category assigned by the engine.
        category: ErrorCategory,
    },

    /// Operation not permitted in the handle's current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Argument rejected before reaching the engine.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the rejected argument.
        message: String,
    },

    /// The operation was canceled before it resolved.
    #[error("operation cancelled")]
    Cancelled,

    /// A continuation is already registered on this operation.
    #[error("a continuation is already registered")]
    AlreadyRegistered,

    /// The caller context that would deliver the result is gone.
    #[error("caller context closed")]
    ContextClosed,
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Returns the engine error code, if this error came from the engine.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the engine classifies this error as retryable.
    ///
    /// Only engine errors are ever retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Engine { category, .. } => category.is_retryable(),
            _ => false,
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        Self::Engine {
            code: err.code(),
            message: err.message(),
            category: err.category(),
        }
    }
}

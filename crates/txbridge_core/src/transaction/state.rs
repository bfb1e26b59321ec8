//! Transaction handle state.

/// Implicit state of a transaction handle.
///
/// `reset()` and a successful `on_error` return the handle to `Active`.
/// Dropping the handle releases the native transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Reads, writes and commit are allowed.
    Active,
    /// `commit()` was issued.
    Committed,
    /// `cancel()` was called.
    Canceled,
}

impl TransactionState {
    /// Checks if the handle accepts reads and writes.
    #[must_use]
    pub fn is_active(self) -> bool {
        self == TransactionState::Active
    }

    /// Returns true if `on_error` may be called in this state.
    #[must_use]
    pub fn accepts_on_error(self) -> bool {
        matches!(self, TransactionState::Active | TransactionState::Committed)
    }
}

//! Transaction handles.

mod handle;
mod state;

pub use handle::TransactionHandle;
pub use state::TransactionState;

//! Shared state of one in-flight operation.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use txbridge_engine::{FutureId, StoreEngine};

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const CANCELED: u8 = 2;

/// Lifecycle state of an async operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// Waiting for the engine.
    Pending,
    /// The engine completed the operation (successfully or not).
    Resolved,
    /// The caller canceled before the engine completed.
    Canceled,
}

impl OperationState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => OperationState::Pending,
            RESOLVED => OperationState::Resolved,
            _ => OperationState::Canceled,
        }
    }

    /// Returns true for `Resolved` and `Canceled`.
    pub fn is_terminal(self) -> bool {
        self != OperationState::Pending
    }
}

/// Atomic operation state, shared with the caller's handle.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn get(&self) -> OperationState {
        OperationState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Pending → Resolved. Returns false if another transition won.
    pub fn try_resolve(&self) -> bool {
        self.transition(RESOLVED)
    }

    /// Pending → Canceled. Returns false if another transition won.
    pub fn try_cancel(&self) -> bool {
        self.transition(CANCELED)
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Owner of a native future. Dropping it destroys the future.
pub(crate) struct NativeFuture {
    engine: Arc<dyn StoreEngine>,
    id: FutureId,
    released: Arc<AtomicBool>,
}

impl NativeFuture {
    pub(crate) fn new(engine: Arc<dyn StoreEngine>, id: FutureId, released: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            id,
            released,
        }
    }

    /// The engine that owns the future.
    pub(crate) fn engine(&self) -> &dyn StoreEngine {
        self.engine.as_ref()
    }

    /// The native future id.
    pub(crate) fn id(&self) -> FutureId {
        self.id
    }
}

impl Drop for NativeFuture {
    fn drop(&mut self) {
        self.engine.future_destroy(self.id);
        self.released.store(true, Ordering::Release);
        tracing::trace!(future = %self.id, "native future released");
    }
}

/// The part of an operation reachable from engine threads.
///
/// Shared through an `Arc` by the caller's handle, the engine callback and
/// any queued completion message; the native future is released when the
/// last of them lets go.
pub(crate) struct OperationCore {
    state: Arc<StateCell>,
    native: NativeFuture,
}

impl OperationCore {
    pub fn new(state: Arc<StateCell>, native: NativeFuture) -> Self {
        Self { state, native }
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub fn native(&self) -> &NativeFuture {
        &self.native
    }
}

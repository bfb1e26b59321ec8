//! Change notifications.

use crate::error::CoreResult;
use crate::operation::{AsyncOperation, OperationState};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use txbridge_engine::FutureId;

/// Lifecycle of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Waiting for the key to change.
    Armed,
    /// The key changed and the listener was notified.
    Fired,
    /// Canceled before it fired.
    Canceled,
    /// The native future has been released.
    Released,
}

struct WatchInner {
    key: Vec<u8>,
    op: RefCell<Option<AsyncOperation<()>>>,
    state: Cell<WatchState>,
}

/// A pending change notification on one key.
///
/// The watch is independent of the transaction that created it. It resolves
/// once, when a later commit changes the key, or fails with
/// [`CoreError::Cancelled`](crate::CoreError::Cancelled) when canceled.
/// Dropping the last handle cancels it.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Rc<WatchInner>,
}

impl WatchHandle {
    pub(crate) fn new(key: Vec<u8>, op: AsyncOperation<()>) -> Self {
        Self {
            inner: Rc::new(WatchInner {
                key,
                op: RefCell::new(Some(op)),
                state: Cell::new(WatchState::Armed),
            }),
        }
    }

    /// The watched key.
    pub fn key(&self) -> &[u8] {
        &self.inner.key
    }

    /// The native future id, if the watch is still attached to one.
    pub fn future_id(&self) -> Option<FutureId> {
        self.inner.op.borrow().as_ref().map(AsyncOperation::id)
    }

    /// Registers the listener.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyRegistered`](crate::CoreError::AlreadyRegistered)
    /// if a listener is already registered or the watch was canceled
    /// without one.
    pub fn on_change<F>(&self, f: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<()>) + 'static,
    {
        let op = self.inner.op.borrow();
        let Some(op) = op.as_ref() else {
            return Err(crate::CoreError::AlreadyRegistered);
        };
        let inner = Rc::downgrade(&self.inner);
        op.on_ready(move |outcome| {
            if let Some(inner) = inner.upgrade() {
                if outcome.is_ok() {
                    inner.state.set(WatchState::Fired);
                } else if inner.state.get() == WatchState::Armed {
                    inner.state.set(WatchState::Canceled);
                }
                tracing::debug!(ok = outcome.is_ok(), "watch delivered");
            }
            f(outcome);
        })
    }

    /// Cancels the watch.
    ///
    /// A registered listener receives `Cancelled` unless the watch already
    /// fired. When the fire won, the watch stays `Armed` until delivery and
    /// then reports `Fired`. Without a listener the native future is released right away.
    pub fn cancel(&self) {
        let (won, listening) = {
            let op = self.inner.op.borrow();
            match op.as_ref() {
                Some(op) => {
                    op.cancel();
                    (op.state() == OperationState::Canceled, op.is_registered())
                }
                None => return,
            }
        };
        // A fire that already resolved the operation keeps the watch armed
        // until its listener runs.
        if won && self.inner.state.get() == WatchState::Armed {
            self.inner.state.set(WatchState::Canceled);
        }
        if !listening {
            let op = self.inner.op.borrow_mut().take();
            drop(op);
        }
        tracing::debug!("watch canceled");
    }

    /// Current state.
    ///
    /// A watch canceled without a listener reports `Released`, since
    /// nothing remains attached to it.
    pub fn state(&self) -> WatchState {
        let op = self.inner.op.borrow();
        match (op.as_ref(), self.inner.state.get()) {
            (None, _) => WatchState::Released,
            (Some(op), WatchState::Armed) if op.state() == OperationState::Canceled => {
                WatchState::Canceled
            }
            (Some(_), state) => state,
        }
    }

    /// Returns true once the native future has been destroyed.
    pub fn is_released(&self) -> bool {
        self.inner
            .op
            .borrow()
            .as_ref()
            .map_or(true, AsyncOperation::is_released)
    }
}

impl Drop for WatchInner {
    fn drop(&mut self) {
        if let Some(op) = self.op.get_mut().take() {
            op.cancel();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("key", &String::from_utf8_lossy(&self.inner.key))
            .field("state", &self.state())
            .finish()
    }
}

//! Asynchronous operations.
//!
//! An [`AsyncOperation`] wraps one pending native call. Its result is
//! delivered exactly once, on the caller's thread, through the continuation
//! registered with [`AsyncOperation::on_ready`].
//!
//! ## Lifecycle
//!
//! ```text
//!            engine completes            dispatch
//! Pending ───────────────────▶ Resolved ──────────▶ continuation(Ok | Err(engine))
//!    │
//!    │ cancel() / drop before on_ready
//!    ▼
//! Canceled ─────────────────────────────────────▶ continuation(Err(Cancelled))
//! ```
//!
//! The first terminal transition wins; the other side observes the failed
//! compare-exchange and only drops its reference. The native future is
//! destroyed when the last reference goes away, whichever side that is.

mod shared;
pub(crate) mod decode;

pub use self::shared::OperationState;
pub(crate) use self::shared::OperationCore;

use self::shared::{NativeFuture, StateCell};
use crate::context::{CallerContext, Event, Message, OpId};
use crate::error::{CoreError, CoreResult};
use decode::Decoder;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use txbridge_engine::{FutureId, StoreEngine};

/// A pending native call whose result is delivered once.
///
/// Dropping an operation before registering a continuation withdraws
/// interest and cancels it. Dropping it afterwards keeps the delivery alive.
pub struct AsyncOperation<T> {
    id: OpId,
    future_id: FutureId,
    ctx: CallerContext,
    /// The handle's own reference; moved into the continuation on
    /// registration.
    core: RefCell<Option<Arc<OperationCore>>>,
    weak: Weak<OperationCore>,
    state: Arc<StateCell>,
    released: Arc<AtomicBool>,
    registered: Cell<bool>,
    decoder: Decoder<T>,
    /// Runs before the continuation, with the outcome it will receive.
    hook: RefCell<Option<Box<dyn FnOnce(&CoreResult<T>)>>>,
}

impl<T: 'static> AsyncOperation<T> {
    /// Wraps `future` and registers the engine callback.
    pub(crate) fn new(
        engine: Arc<dyn StoreEngine>,
        future_id: FutureId,
        decoder: Decoder<T>,
        ctx: &CallerContext,
    ) -> Self {
        let state = Arc::new(StateCell::default());
        let released = Arc::new(AtomicBool::new(false));
        let native = NativeFuture::new(Arc::clone(&engine), future_id, Arc::clone(&released));
        let core = Arc::new(OperationCore::new(Arc::clone(&state), native));
        let id = ctx.register();

        let callback_core = Arc::clone(&core);
        let sender = ctx.sender();
        let registered = engine.future_set_callback(
            future_id,
            Box::new(move || {
                if callback_core.state().try_resolve() {
                    let message = Message {
                        id,
                        event: Event::Resolved(callback_core),
                    };
                    if sender.send(message).is_err() {
                        tracing::trace!(op = id, "caller context gone; releasing result");
                    }
                } else {
                    tracing::trace!(op = id, "completion lost the race to cancel");
                }
            }),
        );
        if let Err(err) = registered {
            tracing::warn!(future = %future_id, error = %err, "callback registration failed");
            if state.try_resolve() {
                ctx.post(id, Event::Failed(err.into()));
            }
        }

        Self {
            id,
            future_id,
            ctx: ctx.clone(),
            weak: Arc::downgrade(&core),
            core: RefCell::new(Some(core)),
            state,
            released,
            registered: Cell::new(false),
            decoder,
            hook: RefCell::new(None),
        }
    }

    /// Installs a hook that observes the outcome before the continuation.
    pub(crate) fn with_hook(self, hook: impl FnOnce(&CoreResult<T>) + 'static) -> Self {
        *self.hook.borrow_mut() = Some(Box::new(hook));
        self
    }

    /// Registers the continuation that receives the result.
    ///
    /// The continuation runs from a later [`CallerContext`] dispatch, never
    /// from inside this call.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyRegistered`] on a second registration.
    pub fn on_ready<F>(&self, f: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<T>) + 'static,
    {
        if self.registered.get() {
            return Err(CoreError::AlreadyRegistered);
        }
        let own = self.core.borrow_mut().take();
        let hook = self.hook.borrow_mut().take();
        let decoder = self.decoder;
        let id = self.id;
        let continuation = Box::new(move |event: Event| {
            let outcome = match event {
                Event::Resolved(core) => decoder(core.native()),
                Event::Canceled => Err(CoreError::Cancelled),
                Event::Failed(err) => Err(err),
            };
            drop(own);
            if let Some(hook) = hook {
                hook(&outcome);
            }
            tracing::trace!(op = id, ok = outcome.is_ok(), "delivering result");
            f(outcome);
        });
        self.ctx.set_continuation(self.id, continuation)?;
        self.registered.set(true);
        Ok(())
    }

    /// Cancels the operation.
    ///
    /// If the engine already completed it, this is a no-op and the result
    /// is still delivered. Otherwise the continuation receives
    /// [`CoreError::Cancelled`].
    pub fn cancel(&self) {
        if self.state.try_cancel() {
            if let Some(core) = self.weak.upgrade() {
                core.native().engine().future_cancel(self.future_id);
            }
            tracing::debug!(future = %self.future_id, "operation canceled");
            self.ctx.post(self.id, Event::Canceled);
        }
    }
}

impl<T> AsyncOperation<T> {
    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        self.state.get()
    }

    /// Returns true once the native future has been destroyed.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// The native future id.
    pub fn id(&self) -> FutureId {
        self.future_id
    }

    /// Returns true if a continuation is registered.
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }
}

impl<T> Drop for AsyncOperation<T> {
    fn drop(&mut self) {
        if self.registered.get() {
            return;
        }
        if self.state.try_cancel() {
            if let Some(core) = self.weak.upgrade() {
                core.native().engine().future_cancel(self.future_id);
            }
            tracing::trace!(future = %self.future_id, "unobserved operation withdrawn");
        }
        self.ctx.withdraw(self.id);
    }
}

impl<T> fmt::Debug for AsyncOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("future", &self.future_id)
            .field("state", &self.state())
            .field("registered", &self.registered.get())
            .field("released", &self.is_released())
            .finish()
    }
}

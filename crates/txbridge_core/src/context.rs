//! The caller's scheduling domain.
//!
//! Engine callbacks never run caller code. They post a message into the
//! [`CallerContext`] that issued the operation, and the caller delivers
//! results on its own thread by dispatching the context:
//!
//! ```rust,ignore
//! let ctx = CallerContext::new();
//! let tr = client.create_transaction(&ctx)?;
//! tr.get("key", false)?.on_ready(|value| println!("{value:?}"))?;
//!
//! // The caller's event loop.
//! while ctx.pending_operations() > 0 {
//!     ctx.dispatch_next(Duration::from_millis(100));
//! }
//! ```

use crate::error::CoreError;
use crate::operation::OperationCore;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Identifies an operation within its context.
pub(crate) type OpId = u64;

/// Terminal event of an operation.
pub(crate) enum Event {
    /// The native future completed; decode it on the caller's thread.
    Resolved(Arc<OperationCore>),
    /// The caller canceled before the native future completed.
    Canceled,
    /// The operation could not be wired to the engine.
    Failed(CoreError),
}

/// A completion message crossing from an engine thread.
pub(crate) struct Message {
    pub id: OpId,
    pub event: Event,
}

pub(crate) type Continuation = Box<dyn FnOnce(Event)>;

enum Slot {
    /// No continuation and no event yet.
    Idle,
    /// Continuation registered, waiting for the event.
    Awaiting(Continuation),
    /// Event arrived before a continuation was registered.
    Arrived(Event),
}

struct ContextInner {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    slots: RefCell<HashMap<OpId, Slot>>,
    next_id: Cell<OpId>,
}

/// Delivers operation results on the thread that owns it.
///
/// Cloning yields another handle to the same context. The context is not
/// `Send`: results are only ever delivered where the operations were issued.
#[derive(Clone)]
pub struct CallerContext {
    inner: Rc<ContextInner>,
}

impl CallerContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            inner: Rc::new(ContextInner {
                sender,
                receiver,
                slots: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Delivers every completion already queued, without blocking.
    ///
    /// Returns the number of continuations invoked.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            match self.inner.receiver.try_recv() {
                Ok(message) => delivered += usize::from(self.deliver(message)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return delivered,
            }
        }
    }

    /// Waits up to `timeout` for one completion and processes it.
    ///
    /// Returns true if a continuation was invoked.
    pub fn dispatch_next(&self, timeout: Duration) -> bool {
        match self.inner.receiver.recv_timeout(timeout) {
            Ok(message) => self.deliver(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Number of live operations whose result has not been delivered.
    pub fn pending_operations(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    pub(crate) fn sender(&self) -> Sender<Message> {
        self.inner.sender.clone()
    }

    /// Reserves a slot for a new operation.
    pub(crate) fn register(&self) -> OpId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.slots.borrow_mut().insert(id, Slot::Idle);
        id
    }

    /// Attaches the continuation of an operation.
    ///
    /// An event that arrived earlier is queued again so that delivery still
    /// happens from a dispatch call.
    pub(crate) fn set_continuation(&self, id: OpId, continuation: Continuation) -> Result<(), CoreError> {
        let mut slots = self.inner.slots.borrow_mut();
        match slots.remove(&id) {
            None => Err(CoreError::AlreadyRegistered),
            Some(Slot::Awaiting(existing)) => {
                slots.insert(id, Slot::Awaiting(existing));
                Err(CoreError::AlreadyRegistered)
            }
            Some(Slot::Idle) => {
                slots.insert(id, Slot::Awaiting(continuation));
                Ok(())
            }
            Some(Slot::Arrived(event)) => {
                slots.insert(id, Slot::Awaiting(continuation));
                drop(slots);
                self.post(id, event);
                Ok(())
            }
        }
    }

    /// Queues an event raised on the caller's own thread.
    pub(crate) fn post(&self, id: OpId, event: Event) {
        // The receiver lives in this context, so the send cannot fail.
        let _ = self.inner.sender.send(Message { id, event });
    }

    /// Forgets an operation. Any parked event is released.
    pub(crate) fn withdraw(&self, id: OpId) {
        let removed = self.inner.slots.borrow_mut().remove(&id);
        drop(removed);
    }

    fn deliver(&self, message: Message) -> bool {
        let Message { id, event } = message;
        let slot = self.inner.slots.borrow_mut().remove(&id);
        match slot {
            Some(Slot::Awaiting(continuation)) => {
                continuation(event);
                true
            }
            Some(Slot::Idle) => {
                self.inner.slots.borrow_mut().insert(id, Slot::Arrived(event));
                false
            }
            Some(Slot::Arrived(first)) => {
                tracing::trace!(op = id, "duplicate completion discarded");
                self.inner.slots.borrow_mut().insert(id, Slot::Arrived(first));
                false
            }
            None => {
                tracing::trace!(op = id, "completion for withdrawn operation released");
                false
            }
        }
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerContext")
            .field("pending_operations", &self.pending_operations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Continuation) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |label: &'static str| -> Continuation {
            let sink = Rc::clone(&sink);
            Box::new(move |event| {
                let kind = match event {
                    Event::Resolved(_) => "resolved",
                    Event::Canceled => "canceled",
                    Event::Failed(_) => "failed",
                };
                sink.borrow_mut().push(label);
                sink.borrow_mut().push(kind);
            })
        };
        (log, make)
    }

    #[test]
    fn event_before_registration_is_parked() {
        let ctx = CallerContext::new();
        let (log, make) = recorder();
        let id = ctx.register();

        ctx.post(id, Event::Canceled);
        assert_eq!(ctx.dispatch_pending(), 0);
        assert!(log.borrow().is_empty());

        ctx.set_continuation(id, make("op")).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(ctx.dispatch_pending(), 1);
        assert_eq!(*log.borrow(), vec!["op", "canceled"]);
        assert_eq!(ctx.pending_operations(), 0);
    }

    #[test]
    fn continuation_is_single_shot() {
        let ctx = CallerContext::new();
        let (log, make) = recorder();
        let id = ctx.register();

        ctx.set_continuation(id, make("first")).unwrap();
        assert_eq!(
            ctx.set_continuation(id, make("second")).unwrap_err(),
            CoreError::AlreadyRegistered
        );

        ctx.post(id, Event::Canceled);
        ctx.post(id, Event::Failed(CoreError::ContextClosed));
        assert_eq!(ctx.dispatch_pending(), 1);
        assert_eq!(*log.borrow(), vec!["first", "canceled"]);

        assert_eq!(
            ctx.set_continuation(id, make("late")).unwrap_err(),
            CoreError::AlreadyRegistered
        );
    }

    #[test]
    fn withdrawn_operation_receives_nothing() {
        let ctx = CallerContext::new();
        let (log, make) = recorder();
        let id = ctx.register();
        ctx.set_continuation(id, make("op")).unwrap();
        ctx.withdraw(id);

        ctx.post(id, Event::Canceled);
        assert_eq!(ctx.dispatch_pending(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn dispatch_next_times_out_when_idle() {
        let ctx = CallerContext::new();
        assert!(!ctx.dispatch_next(Duration::from_millis(5)));
    }
}

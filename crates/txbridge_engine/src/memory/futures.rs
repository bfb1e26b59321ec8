//! Pending result table.

use crate::engine::FutureCallback;
use crate::error::{codes, EngineError, EngineResult, ErrorCode};
use crate::types::{FutureId, KeyValue, ResultKind, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A completed result payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NativeValue {
    Void,
    Value(Option<Vec<u8>>),
    Key(Vec<u8>),
    KeyValues(Vec<KeyValue>, bool),
    Strings(Vec<String>),
    Version(i64),
}

impl NativeValue {
    fn kind(&self) -> ResultKind {
        match self {
            NativeValue::Void => ResultKind::Void,
            NativeValue::Value(_) => ResultKind::Value,
            NativeValue::Key(_) => ResultKind::Key,
            NativeValue::KeyValues(..) => ResultKind::KeyValues,
            NativeValue::Strings(_) => ResultKind::StringArray,
            NativeValue::Version(_) => ResultKind::Version,
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(NativeValue),
    Failed(ErrorCode),
}

struct FutureSlot {
    kind: ResultKind,
    owner: TransactionId,
    state: SlotState,
    callback: Option<FutureCallback>,
}

/// Outcome of a completion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The future moved to its terminal state.
    Completed,
    /// The future was already complete.
    AlreadyComplete,
    /// The future was destroyed before completing.
    Missing,
}

/// Table of live futures keyed by id.
pub(crate) struct FutureTable {
    next_id: AtomicU64,
    slots: Mutex<HashMap<FutureId, FutureSlot>>,
}

impl FutureTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a pending future of the given shape.
    pub fn allocate(&self, kind: ResultKind, owner: TransactionId) -> FutureId {
        let id = FutureId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().insert(
            id,
            FutureSlot {
                kind,
                owner,
                state: SlotState::Pending,
                callback: None,
            },
        );
        id
    }

    /// Moves a future to its terminal state and runs its callback.
    ///
    /// The first completion wins; later ones are ignored. The callback runs
    /// after the table lock is released.
    pub fn complete(&self, id: FutureId, result: Result<NativeValue, ErrorCode>) -> Completion {
        let callback = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&id) else {
                return Completion::Missing;
            };
            if !matches!(slot.state, SlotState::Pending) {
                return Completion::AlreadyComplete;
            }
            slot.state = match result {
                Ok(value) => {
                    debug_assert_eq!(value.kind(), slot.kind, "result shape mismatch");
                    SlotState::Ready(value)
                }
                Err(code) => SlotState::Failed(code),
            };
            slot.callback.take()
        };
        if let Some(callback) = callback {
            callback();
        }
        Completion::Completed
    }

    /// Registers the callback of a future, running it at once if the future
    /// is already complete.
    pub fn set_callback(&self, id: FutureId, callback: FutureCallback) -> EngineResult<()> {
        let run_now = {
            let mut slots = self.slots.lock();
            let slot = slots
                .get_mut(&id)
                .ok_or_else(|| EngineError::new(codes::FUTURE_RELEASED))?;
            if slot.callback.is_some() {
                return Err(EngineError::new(codes::CLIENT_INVALID_OPERATION));
            }
            if matches!(slot.state, SlotState::Pending) {
                slot.callback = Some(callback);
                None
            } else {
                Some(callback)
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
        Ok(())
    }

    pub fn is_ready(&self, id: FutureId) -> bool {
        self.slots
            .lock()
            .get(&id)
            .is_some_and(|slot| !matches!(slot.state, SlotState::Pending))
    }

    /// Reads the terminal state of a future.
    pub fn read<T>(
        &self,
        id: FutureId,
        extract: impl FnOnce(&NativeValue) -> Option<T>,
    ) -> EngineResult<T> {
        let slots = self.slots.lock();
        let slot = slots
            .get(&id)
            .ok_or_else(|| EngineError::new(codes::FUTURE_RELEASED))?;
        match &slot.state {
            SlotState::Pending => Err(EngineError::new(codes::FUTURE_NOT_SET)),
            SlotState::Failed(code) => Err(EngineError::new(*code)),
            SlotState::Ready(value) => {
                extract(value).ok_or_else(|| EngineError::new(codes::RESULT_TYPE_MISMATCH))
            }
        }
    }

    /// Removes a future. Returns false if it did not exist.
    pub fn remove(&self, id: FutureId) -> bool {
        // Dropping an uninvoked callback may release the last reference to
        // another future, which re-enters this table.
        let removed = self.slots.lock().remove(&id);
        removed.is_some()
    }

    /// Pending futures owned by a transaction.
    pub fn pending_of(&self, owner: TransactionId) -> Vec<FutureId> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.owner == owner && matches!(slot.state, SlotState::Pending))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const TR: TransactionId = TransactionId(1);

    #[test]
    fn first_completion_wins() {
        let table = FutureTable::new();
        let id = table.allocate(ResultKind::Version, TR);

        assert_eq!(table.complete(id, Ok(NativeValue::Version(4))), Completion::Completed);
        assert_eq!(
            table.complete(id, Err(codes::OPERATION_CANCELLED)),
            Completion::AlreadyComplete
        );
        assert_eq!(table.read(id, |v| match v {
            NativeValue::Version(v) => Some(*v),
            _ => None,
        }).unwrap(), 4);
    }

    #[test]
    fn callback_runs_once_on_completion() {
        let table = FutureTable::new();
        let id = table.allocate(ResultKind::Void, TR);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        table
            .set_callback(id, Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        table.complete(id, Ok(NativeValue::Void));
        table.complete(id, Ok(NativeValue::Void));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_on_ready_future_runs_immediately() {
        let table = FutureTable::new();
        let id = table.allocate(ResultKind::Void, TR);
        table.complete(id, Err(codes::NOT_COMMITTED));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        table
            .set_callback(id, Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_errors() {
        let table = FutureTable::new();
        let id = table.allocate(ResultKind::Value, TR);

        let pending = table.read(id, |_| Some(()));
        assert_eq!(pending.unwrap_err().code(), codes::FUTURE_NOT_SET);

        table.complete(id, Ok(NativeValue::Value(None)));
        let mismatch = table.read(id, |v| match v {
            NativeValue::Key(k) => Some(k.clone()),
            _ => None,
        });
        assert_eq!(mismatch.unwrap_err().code(), codes::RESULT_TYPE_MISMATCH);

        assert!(table.remove(id));
        assert!(!table.remove(id));
        let released = table.read(id, |_| Some(()));
        assert_eq!(released.unwrap_err().code(), codes::FUTURE_RELEASED);
    }

    #[test]
    fn completing_a_removed_future_is_ignored() {
        let table = FutureTable::new();
        let id = table.allocate(ResultKind::Void, TR);
        table.remove(id);
        assert_eq!(table.complete(id, Ok(NativeValue::Void)), Completion::Missing);
        assert_eq!(table.len(), 0);
    }
}

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::app::error::DeviceError;

enum Slot<T> {
    Waiting,
    Done(Result<T, DeviceError>),
    Cancelled,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, value: Slot<T>) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        *slot = value;
        self.ready.notify_all();
        true
    }
}

/// One-shot value produced off the calling thread.
///
/// Waiters may block unboundedly, block with a deadline, or poll. Dropping the
/// handle abandons the value; `cancel` additionally wakes every waiter.
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

/// Producer side of a [`Pending`]. Dropping it unresolved fails the handle.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Pending<T> {
    pub fn channel() -> (Completer<T>, Pending<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Waiting),
            ready: Condvar::new(),
        });
        (
            Completer {
                shared: Arc::clone(&shared),
            },
            Pending { shared },
        )
    }

    pub fn ready(value: T) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(Ok(value));
        pending
    }

    pub fn failed(err: DeviceError) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(Err(err));
        pending
    }

    pub fn wait(&self) -> Result<T, DeviceError> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(result) = Self::take_resolved(&slot) {
                return result;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// A timeout too large to express as a deadline waits without bound.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, DeviceError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut slot = self.shared.lock();
        loop {
            if let Some(result) = Self::take_resolved(&slot) {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::timeout(format!(
                    "Value not available after {} ms",
                    timeout.as_millis()
                )));
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Non-blocking: `None` while the value is still being produced.
    pub fn try_get(&self) -> Option<Result<T, DeviceError>> {
        Self::take_resolved(&self.shared.lock())
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.lock(), Slot::Waiting)
    }

    pub fn cancel(&self) -> bool {
        self.shared.resolve(Slot::Cancelled)
    }

    fn take_resolved(slot: &Slot<T>) -> Option<Result<T, DeviceError>> {
        match slot {
            Slot::Waiting => None,
            Slot::Done(result) => Some(result.clone()),
            Slot::Cancelled => Some(Err(DeviceError::io("Request was cancelled"))),
        }
    }
}

impl<T> Completer<T> {
    /// Returns false when the handle was already cancelled.
    pub fn complete(self, result: Result<T, DeviceError>) -> bool {
        self.shared.resolve(Slot::Done(result))
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.shared.resolve(Slot::Done(Err(DeviceError::io(
            "Request was abandoned before completing",
        ))));
    }
}

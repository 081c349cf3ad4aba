//! Counter of connection handlers that have not yet finished.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Counter {
    active: Mutex<usize>,
    idle: Condvar,
}

/// Shared count of running handlers, used as the shutdown barrier.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    counter: Arc<Counter>,
}

impl InFlight {
    /// Registers a handler. The count drops again when the guard is dropped,
    /// including when the handler panics.
    pub(crate) fn enter(&self) -> InFlightGuard {
        let mut active = self
            .counter
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        InFlightGuard {
            counter: Arc::clone(&self.counter),
        }
    }

    pub(crate) fn count(&self) -> usize {
        *self
            .counter
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until no handler is registered.
    pub(crate) fn wait_idle(&self) {
        let active = self
            .counter
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _idle = self
            .counter
            .idle
            .wait_while(active, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Registration of one running handler.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    counter: Arc<Counter>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut active = self
            .counter
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.counter.idle.notify_all();
        }
    }
}

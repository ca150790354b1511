//! Per-actor slot accounting

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

/// Snapshot of one actor's dispatcher usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActorLoad {
    /// Operations currently holding a slot
    pub in_flight: usize,

    /// Callers suspended waiting for a slot
    pub waiting: usize,
}

/// Slots of one actor
///
/// The semaphore hands permits out in FIFO order, so a waiting caller is never
/// overtaken by a later one.
pub(crate) struct ActorSlots {
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

/// Counts a caller as waiting until dropped
pub(crate) struct WaitGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ActorSlots {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    pub(crate) fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    pub(crate) fn wait(&self) -> WaitGuard<'_> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        WaitGuard {
            waiting: &self.waiting,
        }
    }

    pub(crate) fn start(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn load(&self) -> ActorLoad {
        ActorLoad {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

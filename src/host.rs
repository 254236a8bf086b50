//! Host scheduling hook.
//!
//! The host's loop is divided into scheduling units (frames). Work scheduled with
//! [`SchedulingHost::defer`] runs once, after the current unit's other work, when
//! the host drains the queue at frame end.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Work the coalescer asks the host to run after the current unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredTask {
    FinalizeSnap { unit: u64 },
}

pub trait SchedulingHost: Send + Sync {
    /// Monotonically increasing identifier of the current scheduling unit.
    fn current_unit(&self) -> u64;

    /// Queue `task` to run once after the current unit completes.
    fn defer(&self, task: DeferredTask);
}

/// Frame counter plus deferred-task queue driven by the host loop.
///
/// Deferring the same task twice before a drain queues it once.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    unit: AtomicU64,
    deferred: Mutex<Vec<DeferredTask>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the next scheduling unit, returning its identifier.
    pub fn advance(&self) -> u64 {
        self.unit.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Take every task deferred so far, in the order they were queued.
    pub fn take_deferred(&self) -> Vec<DeferredTask> {
        std::mem::take(&mut *self.deferred.lock())
    }

    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }
}

impl SchedulingHost for FrameScheduler {
    fn current_unit(&self) -> u64 {
        self.unit.load(Ordering::SeqCst)
    }

    fn defer(&self, task: DeferredTask) {
        let mut deferred = self.deferred.lock();
        if !deferred.contains(&task) {
            deferred.push(task);
        }
    }
}

//! When to collect. The policy only decides; scheduling goes through [`GcStateHolder`].

use crate::gc::state::GcStateHolder;
use crate::gc::stats::EpochStats;
use crate::mark::Epoch;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A heuristic deciding when collections are needed.
pub trait GcSchedulerPolicy: Send + Sync {
    /// Called on the main GC thread when a cycle starts.
    fn on_gc_start(&self, _epoch: Epoch) {}

    /// Called on the main GC thread when a cycle has finished.
    fn on_gc_finish(&self, _epoch: Epoch, _stats: &EpochStats) {}

    /// Called by mutators after allocating `bytes`. Returns `true` to request a collection.
    fn on_allocation(&self, bytes: usize) -> bool;
}

/// Collect only when explicitly asked to.
#[derive(Default)]
pub struct ManualPolicy;

impl GcSchedulerPolicy for ManualPolicy {
    fn on_allocation(&self, _bytes: usize) -> bool {
        false
    }
}

/// Collect whenever `threshold` bytes have been allocated since the last cycle started.
pub struct AllocationThresholdPolicy {
    threshold: usize,
    allocated: AtomicUsize,
}

impl AllocationThresholdPolicy {
    pub fn new(threshold: usize) -> Self {
        assert!(threshold > 0);
        Self {
            threshold,
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl GcSchedulerPolicy for AllocationThresholdPolicy {
    fn on_gc_start(&self, _epoch: Epoch) {
        self.allocated.store(0, Ordering::Relaxed);
    }

    fn on_allocation(&self, bytes: usize) -> bool {
        let before = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |allocated| {
                Some(allocated.saturating_add(bytes))
            })
            .unwrap_or_else(|allocated| allocated);
        // Only the allocation crossing the threshold asks.
        before < self.threshold && before.saturating_add(bytes) >= self.threshold
    }
}

pub struct GcScheduler {
    policy: Box<dyn GcSchedulerPolicy>,
}

impl GcScheduler {
    pub fn new(policy: Box<dyn GcSchedulerPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn GcSchedulerPolicy {
        self.policy.as_ref()
    }

    pub fn schedule_gc(&self, state: &GcStateHolder) -> Epoch {
        state.schedule()
    }

    /// Returns the epoch scheduled, if the policy asked for one.
    pub fn on_allocation(&self, state: &GcStateHolder, bytes: usize) -> Option<Epoch> {
        if self.policy.on_allocation(bytes) {
            let epoch = self.schedule_gc(state);
            debug!("Allocation of {} bytes requested epoch {}", bytes, epoch);
            Some(epoch)
        } else {
            None
        }
    }

    pub fn on_gc_start(&self, epoch: Epoch) {
        self.policy.on_gc_start(epoch);
    }

    pub fn on_gc_finish(&self, epoch: Epoch, stats: &EpochStats) {
        self.policy.on_gc_finish(epoch, stats);
    }
}

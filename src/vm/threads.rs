use crate::mark::Epoch;
use crate::vm::VMBinding;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The set of mutator threads.
pub trait ThreadRegistry<VM: VMBinding>: Send + Sync {
    /// The registered mutators, seen through the registry's iteration lock. Registering a new
    /// thread must block until the lock is dropped.
    type IterationLock<'a>: Deref<Target = [Arc<VM::Mutator>]>
    where
        Self: 'a;

    /// Take the iteration lock. Called once per epoch by the main GC thread, with the world
    /// stopped, and held until marking is over.
    fn lock_for_iteration(&self) -> Self::IterationLock<'_>;
}

/// A mutator thread as seen by the collector.
pub trait MutatorThread: Send + Sync + 'static {
    /// The per-thread marking state. The binding stores it in its thread object and never
    /// touches it otherwise.
    fn mark_state(&self) -> &MutatorMarkState;

    /// The runtime's identifier of the thread. Only used in log messages.
    fn carrier_id(&self) -> usize;
}

/// Per-mutator marking state of the current epoch.
#[derive(Default)]
pub struct MutatorMarkState {
    /// Epoch in which this mutator was part of the dispatcher's snapshot.
    epoch: AtomicU64,
    /// Someone (the mutator itself, or the STW thread) owns scanning this thread's roots.
    root_set_claimed: AtomicBool,
    /// The thread's roots are in some mark queue.
    published: AtomicBool,
    /// The mutator is marking in this epoch.
    cooperative: AtomicBool,
}

impl MutatorMarkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset_for(&self, epoch: Epoch) {
        self.root_set_claimed.store(false, Ordering::Relaxed);
        self.published.store(false, Ordering::Relaxed);
        self.cooperative.store(false, Ordering::Relaxed);
        self.epoch.store(epoch, Ordering::Release);
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    /// First caller wins.
    pub(crate) fn try_claim_root_set(&self) -> bool {
        self.root_set_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn publish(&self) {
        debug_assert!(self.root_set_claimed.load(Ordering::Relaxed));
        self.published.store(true, Ordering::Release);
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn set_cooperative(&self) {
        self.cooperative.store(true, Ordering::Relaxed);
    }

    pub fn is_cooperative(&self) -> bool {
        self.cooperative.load(Ordering::Relaxed)
    }
}

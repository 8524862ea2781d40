//! The registry of mark jobs participating in the current epoch.
//!
//! Slots are handed out in registration order by a CAS loop bounded by the number of expected
//! jobs. A slot holds a weak reference to the job's shared list: the job itself belongs to the
//! thread running it. The registry grows between epochs when more jobs are expected, and never
//! shrinks; it cannot grow beyond [`MAX_REGISTRY_CAPACITY`].

use crate::mark::work_queue::SharedList;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

/// Hard limit on the number of jobs in one epoch (mutators and GC threads together).
pub const MAX_REGISTRY_CAPACITY: usize = 4096;

type Slot = OnceLock<Weak<SharedList>>;

pub(crate) struct JobRegistry {
    /// Write-locked only by `reset`, between epochs.
    slots: RwLock<Vec<Slot>>,
    registered: AtomicUsize,
    expected: AtomicUsize,
}

impl JobRegistry {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= MAX_REGISTRY_CAPACITY);
        Self {
            slots: RwLock::new((0..capacity).map(|_| Slot::new()).collect()),
            registered: AtomicUsize::new(0),
            expected: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    pub fn expected(&self) -> usize {
        self.expected.load(Ordering::Acquire)
    }

    /// Clear all slots and expect up to `expected` registrations. Grows the registry if needed.
    pub fn reset(&self, expected: usize) {
        assert!(
            expected <= MAX_REGISTRY_CAPACITY,
            "{} mark jobs expected, but the registry is limited to {}",
            expected,
            MAX_REGISTRY_CAPACITY
        );
        let mut slots = self.slots.write().unwrap();
        if slots.len() < expected {
            let new_capacity = expected
                .max(slots.len() * 2)
                .min(MAX_REGISTRY_CAPACITY);
            debug!(
                "Growing the mark job registry from {} to {} slots",
                slots.len(),
                new_capacity
            );
            slots.resize_with(new_capacity, Slot::new);
        }
        for slot in slots.iter_mut() {
            *slot = Slot::new();
        }
        self.registered.store(0, Ordering::Release);
        self.expected.store(expected, Ordering::Release);
    }

    /// Replace the upper bound with the exact number of jobs, once it is known.
    pub fn set_expected(&self, expected: usize) {
        let registered = self.registered();
        assert!(
            registered <= expected && expected <= self.capacity(),
            "expecting {} mark jobs with {} registered and capacity {}",
            expected,
            registered,
            self.capacity()
        );
        self.expected.store(expected, Ordering::Release);
    }

    /// Take the next free slot for `shared`. Returns the slot index.
    pub fn register(&self, shared: &Arc<SharedList>) -> usize {
        let mut current = self.registered.load(Ordering::Relaxed);
        let index = loop {
            let expected = self.expected();
            assert!(
                current < expected,
                "registering mark job #{} but only {} were expected",
                current + 1,
                expected
            );
            match self.registered.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break current,
                Err(actual) => current = actual,
            }
        };
        let slots = self.slots.read().unwrap();
        if slots[index].set(Arc::downgrade(shared)).is_err() {
            panic!("mark job registry slot {} is already taken", index);
        }
        index
    }

    /// Visit the shared lists of registered jobs, starting after slot `after` and wrapping
    /// around; `after == None` starts at slot 0. Stops at the first visit returning a non-zero
    /// count and returns it.
    pub fn visit_others(
        &self,
        after: Option<usize>,
        mut visit: impl FnMut(&SharedList) -> usize,
    ) -> usize {
        let registered = self.registered();
        if registered == 0 {
            return 0;
        }
        let slots = self.slots.read().unwrap();
        let start = after.map_or(0, |slot| slot + 1);
        for offset in 0..registered {
            let index = (start + offset) % registered;
            if Some(index) == after {
                continue;
            }
            // A claimed slot may not be filled yet, and a finished job may be gone.
            let Some(shared) = slots[index].get().and_then(Weak::upgrade) else {
                continue;
            };
            let found = visit(&shared);
            if found > 0 {
                return found;
            }
        }
        0
    }

    /// Do all registered shared lists look empty?
    pub fn all_shared_empty(&self) -> bool {
        let slots = self.slots.read().unwrap();
        slots[..self.registered()]
            .iter()
            .filter_map(|slot| slot.get().and_then(Weak::upgrade))
            .all(|shared| shared.is_empty() && !shared.is_locked())
    }
}

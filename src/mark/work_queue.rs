//! Per-worker mark queues.
//!
//! A [`WorkQueue`] is an intrusive list of objects split in two: a *local* list that only its
//! owner touches, and a [`SharedList`] that other workers may steal from. The shared list is
//! guarded by a try-lock ("theft lock") so that a thief and the owner sharing more work never
//! block each other: whoever loses the race simply gets a zero count back and moves on.

use crate::mark::ObjectQueue;
use crate::util::ObjectReference;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Thieves take `numerator / STEAL_FRACTION_DENOMINATOR` of a victim's shared list.
pub const STEAL_FRACTION_DENOMINATOR: usize = 4;

/// An intrusive singly linked list threaded through the objects' mark words.
struct IntrusiveList {
    head: Option<ObjectReference>,
    tail: Option<ObjectReference>,
    len: usize,
}

impl IntrusiveList {
    const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn try_push_front(&mut self, object: ObjectReference) -> bool {
        if !object.header().try_link(self.head) {
            return false;
        }
        if self.tail.is_none() {
            self.tail = Some(object);
        }
        self.head = Some(object);
        self.len += 1;
        true
    }

    fn pop_front(&mut self) -> Option<ObjectReference> {
        let head = self.head?;
        let next = head.header().next();
        head.header().unlink();
        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    /// Move every node of `other` in front of this list.
    fn splice_front(&mut self, mut other: IntrusiveList) {
        let (Some(other_head), Some(other_tail)) = (other.head, other.tail) else {
            return;
        };
        assert!(
            self.head != Some(other_head),
            "splicing a list into itself ({:?})",
            other_head
        );
        other_tail.header().set_next(self.head);
        if self.tail.is_none() {
            self.tail = Some(other_tail);
        }
        self.head = Some(other_head);
        self.len += other.len;
        other.head = None;
        other.tail = None;
        other.len = 0;
    }

    /// Detach the first `count` nodes (or all of them, if there are fewer) as a new list.
    fn take_front(&mut self, count: usize) -> IntrusiveList {
        if count >= self.len {
            return std::mem::replace(self, IntrusiveList::new());
        }
        let mut taken = IntrusiveList::new();
        if count == 0 {
            return taken;
        }
        let head = self.head.expect("a non-empty list has a head");
        let mut last = head;
        for _ in 1..count {
            last = last
                .header()
                .next()
                .expect("list shorter than its recorded length");
        }
        self.head = last.header().next();
        last.header().set_next(None);
        self.len -= count;
        taken.head = Some(head);
        taken.tail = Some(last);
        taken.len = count;
        taken
    }
}

/// Theft lock states.
const IDLE: u8 = 0;
const AVAILABLE: u8 = 1;
const LOCKED: u8 = 2;

/// The stealable half of a [`WorkQueue`].
pub struct SharedList {
    /// `IDLE` (empty), `AVAILABLE` (has nodes) or `LOCKED` (someone is splicing).
    state: AtomicU8,
    /// Mirror of `list.len` readable without the lock.
    len: AtomicUsize,
    list: UnsafeCell<IntrusiveList>,
}

// `list` is only accessed by the holder of the theft lock.
unsafe impl Send for SharedList {}
unsafe impl Sync for SharedList {}

impl SharedList {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            len: AtomicUsize::new(0),
            list: UnsafeCell::new(IntrusiveList::new()),
        }
    }

    /// Number of nodes, as of the last unlock.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is someone holding the theft lock right now?
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == LOCKED
    }

    /// Take the theft lock if it is free. With `only_if_available`, an empty list is not even
    /// locked, which keeps thieves from disturbing an idle owner.
    fn try_lock(&self, only_if_available: bool) -> Option<SharedListGuard<'_>> {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current == LOCKED || (only_if_available && current != AVAILABLE) {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(SharedListGuard { shared: self }),
                Err(actual) => current = actual,
            }
        }
    }
}

struct SharedListGuard<'a> {
    shared: &'a SharedList,
}

impl SharedListGuard<'_> {
    fn list(&mut self) -> &mut IntrusiveList {
        // We hold the theft lock.
        unsafe { &mut *self.shared.list.get() }
    }
}

impl Drop for SharedListGuard<'_> {
    fn drop(&mut self) {
        let len = self.list().len;
        self.shared.len.store(len, Ordering::Release);
        let state = if len == 0 { IDLE } else { AVAILABLE };
        self.shared.state.store(state, Ordering::Release);
    }
}

/// A mark queue owned by one worker.
pub struct WorkQueue {
    local: IntrusiveList,
    shared: Arc<SharedList>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            local: IntrusiveList::new(),
            shared: Arc::new(SharedList::new()),
        }
    }

    /// The stealable half, as published in the job registry.
    pub fn shared(&self) -> &Arc<SharedList> {
        &self.shared
    }

    /// Push onto the local list. Fails if the object is already marked, i.e. if it was enqueued
    /// before by anyone in this cycle.
    pub fn push_local(&mut self, object: ObjectReference) -> bool {
        self.local.try_push_front(object)
    }

    pub fn pop_local(&mut self) -> Option<ObjectReference> {
        self.local.pop_front()
    }

    pub fn local_len(&self) -> usize {
        self.local.len
    }

    pub fn local_is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub fn shared_len(&self) -> usize {
        self.shared.len()
    }

    /// Both halves are empty.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.shared.is_empty() && !self.shared.is_locked()
    }

    /// Move the whole local list to the shared list. Returns the number of nodes moved, or 0 if
    /// the theft lock is taken (the caller may retry later).
    pub fn share_all(&mut self) -> usize {
        if self.local.is_empty() {
            return 0;
        }
        let Some(mut guard) = self.shared.try_lock(false) else {
            return 0;
        };
        let moved = self.local.len;
        let local = std::mem::replace(&mut self.local, IntrusiveList::new());
        guard.list().splice_front(local);
        moved
    }

    /// Move up to `ceil(len * numerator / STEAL_FRACTION_DENOMINATOR)` nodes from `victim` to the
    /// local list. Returns 0 if the victim is empty or its theft lock is taken.
    pub fn steal_fraction(&mut self, victim: &SharedList, numerator: usize) -> usize {
        debug_assert!((1..=STEAL_FRACTION_DENOMINATOR).contains(&numerator));
        let Some(mut guard) = victim.try_lock(true) else {
            return 0;
        };
        let available = guard.list().len;
        let count = (available * numerator).div_ceil(STEAL_FRACTION_DENOMINATOR);
        let stolen = guard.list().take_front(count);
        drop(guard);
        let count = stolen.len;
        self.local.splice_front(stolen);
        count
    }

    /// Steal back from our own shared list.
    pub fn reclaim_shared(&mut self, numerator: usize) -> usize {
        let shared = self.shared.clone();
        self.steal_fraction(&shared, numerator)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectQueue for WorkQueue {
    fn enqueue(&mut self, object: ObjectReference) {
        self.push_local(object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::HeaderArena;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn push_deduplicates() {
        let arena = HeaderArena::new(2);
        let mut queue = WorkQueue::new();
        assert!(queue.push_local(arena.get(0)));
        assert!(!queue.push_local(arena.get(0)));
        assert!(queue.push_local(arena.get(1)));
        assert_eq!(queue.local_len(), 2);

        let mut other = WorkQueue::new();
        assert!(!other.push_local(arena.get(1)));
    }

    #[test]
    fn popped_objects_stay_marked() {
        let arena = HeaderArena::new(3);
        let mut queue = WorkQueue::new();
        for i in 0..3 {
            assert!(queue.push_local(arena.get(i)));
        }
        assert_eq!(queue.pop_local(), Some(arena.get(2)));
        assert_eq!(queue.pop_local(), Some(arena.get(1)));
        assert_eq!(queue.pop_local(), Some(arena.get(0)));
        assert_eq!(queue.pop_local(), None);
        assert!(queue.is_empty());
        assert!(arena.get(1).is_marked());
        assert!(!queue.push_local(arena.get(1)));
    }

    #[test]
    fn share_then_steal_rounds_up() {
        let arena = HeaderArena::new(10);
        let mut owner = WorkQueue::new();
        for i in 0..10 {
            owner.push_local(arena.get(i));
        }
        assert_eq!(owner.share_all(), 10);
        assert!(owner.local_is_empty());
        assert_eq!(owner.shared_len(), 10);

        let mut thief = WorkQueue::new();
        // ceil(10 / 4) = 3
        assert_eq!(thief.steal_fraction(owner.shared(), 1), 3);
        assert_eq!(thief.local_len(), 3);
        assert_eq!(owner.shared_len(), 7);
        // ceil(7 * 3 / 4) = 6
        assert_eq!(thief.steal_fraction(owner.shared(), 3), 6);
        assert_eq!(owner.shared_len(), 1);
        assert_eq!(thief.steal_fraction(owner.shared(), 1), 1);
        assert!(owner.is_empty());
        assert_eq!(thief.steal_fraction(owner.shared(), 1), 0);
        assert_eq!(thief.local_len(), 10);
    }

    #[test]
    fn reclaim_own_shared() {
        let arena = HeaderArena::new(4);
        let mut queue = WorkQueue::new();
        for i in 0..4 {
            queue.push_local(arena.get(i));
        }
        queue.share_all();
        assert_eq!(queue.reclaim_shared(STEAL_FRACTION_DENOMINATOR), 4);
        assert_eq!(queue.shared_len(), 0);
        assert_eq!(queue.local_len(), 4);
    }

    #[test]
    fn contention_returns_zero() {
        let arena = HeaderArena::new(4);
        let mut owner = WorkQueue::new();
        for i in 0..4 {
            owner.push_local(arena.get(i));
        }
        owner.share_all();

        let guard = owner.shared().try_lock(false).unwrap();
        let mut thief = WorkQueue::new();
        assert_eq!(thief.steal_fraction(owner.shared(), 1), 0);
        drop(guard);
        assert_eq!(thief.steal_fraction(owner.shared(), 1), 1);
    }

    #[test]
    fn share_fails_while_locked() {
        let arena = HeaderArena::new(2);
        let mut owner = WorkQueue::new();
        owner.push_local(arena.get(0));
        let shared = owner.shared().clone();
        let guard = shared.try_lock(false).unwrap();
        assert_eq!(owner.share_all(), 0);
        assert_eq!(owner.local_len(), 1);
        drop(guard);
        assert_eq!(owner.share_all(), 1);
    }

    /// Random interleavings of pushes, pops, shares and steals across threads. Every object is
    /// popped exactly once.
    #[test]
    fn conservation_under_random_interleavings() {
        const THREADS: usize = 4;
        const OBJECTS: usize = 4000;
        let arena = HeaderArena::new(OBJECTS);
        let mut queues: Vec<WorkQueue> = (0..THREADS).map(|_| WorkQueue::new()).collect();
        for i in 0..OBJECTS {
            assert!(queues[i % THREADS].push_local(arena.get(i)));
        }
        let shared: Vec<Arc<SharedList>> = queues.iter().map(|q| q.shared().clone()).collect();
        let popped_total = AtomicUsize::new(0);
        let popped = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for (ordinal, mut queue) in queues.drain(..).enumerate() {
                let shared = &shared;
                let popped_total = &popped_total;
                let popped = &popped;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(ordinal as u64);
                    let mut mine = Vec::new();
                    while popped_total.load(Ordering::SeqCst) < OBJECTS {
                        match rng.random_range(0..10) {
                            0 => {
                                queue.share_all();
                            }
                            1..=2 => {
                                let victim = rng.random_range(0..THREADS);
                                let numerator = rng.random_range(1..=STEAL_FRACTION_DENOMINATOR);
                                queue.steal_fraction(&shared[victim], numerator);
                            }
                            _ => {
                                if let Some(object) = queue.pop_local() {
                                    mine.push(object);
                                    popped_total.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                        }
                    }
                    assert!(queue.local_is_empty());
                    popped.lock().unwrap().extend(mine);
                });
            }
        });

        let popped = popped.into_inner().unwrap();
        assert_eq!(popped.len(), OBJECTS);
        let distinct: HashSet<_> = popped.iter().copied().collect();
        assert_eq!(distinct.len(), OBJECTS);
        assert!(shared.iter().all(|s| s.is_empty()));
    }
}

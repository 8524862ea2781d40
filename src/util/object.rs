//! Object references and the per-object mark word.
//!
//! Every object managed by parmark starts with a [`GcHeader`]: one machine word the collector
//! owns. The word doubles as the mark bit and as the "next" link of the intrusive work lists in
//! [`crate::mark::work_queue`], so enqueuing an object never allocates, and an object can only
//! be linked into one list at a time.
//!
//! Encoding of the word:
//!
//! | value           | meaning                                    |
//! |-----------------|--------------------------------------------|
//! | `0`             | unmarked                                   |
//! | `1`             | marked, not linked into any list           |
//! | `2`             | marked, linked, last node of its list      |
//! | anything else   | marked, linked, address of the next node   |

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

const UNMARKED: usize = 0;
const MARKED: usize = 1;
const LAST: usize = 2;

/// The GC metadata word. A binding must place it at offset 0 of every managed object.
#[repr(C)]
#[derive(Default)]
pub struct GcHeader {
    word: AtomicUsize,
}

// Node addresses must never collide with the small sentinel values.
static_assertions::const_assert!(std::mem::align_of::<GcHeader>() > LAST);

/// Decoded state of a mark word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    Unmarked,
    Unlinked,
    Last,
    Next(ObjectReference),
}

impl GcHeader {
    pub const fn new() -> Self {
        Self {
            word: AtomicUsize::new(UNMARKED),
        }
    }

    /// Is the object marked in the current cycle? Linked objects are always marked.
    pub fn is_marked(&self) -> bool {
        self.word.load(Ordering::Acquire) != UNMARKED
    }

    /// Mark the object without enqueuing it. Return `true` if this call marked it.
    pub fn try_mark(&self) -> bool {
        self.word
            .compare_exchange(UNMARKED, MARKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Reset the mark of a surviving object. Called by the allocator during sweep, never while
    /// the object may sit in a work list.
    pub fn clear_mark(&self) {
        debug_assert!(
            matches!(self.link(), Link::Unmarked | Link::Unlinked),
            "clearing the mark of a linked object"
        );
        self.word.store(UNMARKED, Ordering::Release);
    }

    pub(crate) fn link(&self) -> Link {
        match self.word.load(Ordering::Acquire) {
            UNMARKED => Link::Unmarked,
            MARKED => Link::Unlinked,
            LAST => Link::Last,
            addr => Link::Next(unsafe { ObjectReference::from_raw_address_unchecked(addr) }),
        }
    }

    /// Mark the object and link it in front of `next` in one step. Fails if the object was
    /// already marked, which is how duplicated enqueues are filtered.
    pub(crate) fn try_link(&self, next: Option<ObjectReference>) -> bool {
        self.word
            .compare_exchange(UNMARKED, encode(next), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Re-point an already linked node.
    pub(crate) fn set_next(&self, next: Option<ObjectReference>) {
        debug_assert!(matches!(self.link(), Link::Last | Link::Next(_)));
        self.word.store(encode(next), Ordering::Release);
    }

    /// The successor of a linked node.
    pub(crate) fn next(&self) -> Option<ObjectReference> {
        match self.link() {
            Link::Next(next) => Some(next),
            Link::Last => None,
            link => panic!("reading the successor of a node that is not linked: {:?}", link),
        }
    }

    /// Detach a node from its list. It stays marked.
    pub(crate) fn unlink(&self) {
        self.word.store(MARKED, Ordering::Release);
    }
}

fn encode(next: Option<ObjectReference>) -> usize {
    match next {
        Some(next) => next.to_raw_address(),
        None => LAST,
    }
}

/// A reference to a managed object, i.e. the address of its [`GcHeader`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectReference(NonNull<GcHeader>);

// An object reference is just an address. Access to the header is atomic.
unsafe impl Send for ObjectReference {}
unsafe impl Sync for ObjectReference {}

impl ObjectReference {
    /// # Safety
    /// `header` must point to a live `GcHeader` that stays valid for as long as this reference
    /// (or a copy of it) is used by the collector.
    pub unsafe fn from_header(header: NonNull<GcHeader>) -> Self {
        Self(header)
    }

    /// # Safety
    /// Same as [`ObjectReference::from_header`].
    pub unsafe fn from_raw_address(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut GcHeader).map(Self)
    }

    unsafe fn from_raw_address_unchecked(addr: usize) -> Self {
        Self(NonNull::new_unchecked(addr as *mut GcHeader))
    }

    pub fn to_raw_address(self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn header(&self) -> &GcHeader {
        // Valid by the contract of the constructors.
        unsafe { self.0.as_ref() }
    }

    pub fn is_marked(self) -> bool {
        self.header().is_marked()
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.to_raw_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(header: &GcHeader) -> ObjectReference {
        unsafe { ObjectReference::from_header(NonNull::from(header)) }
    }

    #[test]
    fn link_marks_once() {
        let a = GcHeader::new();
        let b = GcHeader::new();
        assert!(!a.is_marked());
        assert!(a.try_link(None));
        assert!(a.is_marked());
        assert_eq!(a.link(), Link::Last);
        assert!(!a.try_link(Some(reference(&b))));
        assert!(!a.try_mark());
    }

    #[test]
    fn next_pointer_round_trips_through_the_word() {
        let a = GcHeader::new();
        let b = GcHeader::new();
        assert!(a.try_link(Some(reference(&b))));
        assert_eq!(a.next(), Some(reference(&b)));
        a.set_next(None);
        assert_eq!(a.next(), None);
        a.unlink();
        assert_eq!(a.link(), Link::Unlinked);
        assert!(a.is_marked());
        a.clear_mark();
        assert!(!a.is_marked());
        assert!(a.try_mark());
    }

    #[test]
    #[should_panic]
    fn successor_of_unlinked_node_panics() {
        let a = GcHeader::new();
        a.next();
    }
}

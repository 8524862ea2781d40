//! A runtime for tests: a heap of boxed objects with explicit edges, explicit root sets, and
//! mutator threads that stop at a safepoint when asked to.
//!
//! Every VM hook the collector calls is appended to an event log, so tests can check the order
//! of a cycle's phases.

use crate::mark::{Epoch, ObjectQueue};
use crate::util::{GcHeader, ObjectReference};
use crate::vm::{
    Allocator, Collection, MutatorMarkState, MutatorThread, Scanning, ThreadRegistry, VMBinding,
};
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[repr(C)]
pub struct MockObject {
    /// Must be the first field: object references point here.
    header: GcHeader,
    id: usize,
    children: Mutex<Vec<ObjectReference>>,
    /// Times `process_in_mark` was called on this object since the last sweep.
    scanned: AtomicUsize,
    has_finalizer: bool,
}

impl MockObject {
    fn reference(&self) -> ObjectReference {
        unsafe { ObjectReference::from_header(NonNull::from(&self.header)) }
    }
}

/// A VM hook invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    StopTheWorld(Epoch),
    ResumeTheWorld(Epoch),
    EnableWeakBarriers(Epoch),
    ProcessWeaks(Epoch),
    DisableWeakBarriers(Epoch),
    PrepareForGC,
    FreeReferenceCounted,
    Sweep(Epoch),
    ScheduleFinalization(Epoch),
}

pub struct MockMutator {
    id: usize,
    state: MutatorMarkState,
    roots: Mutex<Vec<ObjectReference>>,
}

impl MockMutator {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn add_root(&self, object: ObjectReference) {
        self.roots.lock().unwrap().push(object);
    }

    pub fn clear_roots(&self) {
        self.roots.lock().unwrap().clear();
    }
}

impl MutatorThread for MockMutator {
    fn mark_state(&self) -> &MutatorMarkState {
        &self.state
    }

    fn carrier_id(&self) -> usize {
        self.id
    }
}

/// The registered mutators, locked against new registrations.
pub struct MutatorsGuard<'a>(MutexGuard<'a, Vec<Arc<MockMutator>>>);

impl Deref for MutatorsGuard<'_> {
    type Target = [Arc<MockMutator>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

struct World {
    stop_requested: bool,
    /// Running mutator threads, which must reach a safepoint before the world is stopped.
    attached: usize,
    /// Attached threads inside `poll_safepoint`. A thread counts until it leaves, even if the
    /// world was resumed and stopped again in the meantime.
    stopped: usize,
}

type FinalizerCallback = Box<dyn Fn(Epoch) + Send + Sync>;

pub struct MockVM {
    heap: Mutex<Vec<Box<MockObject>>>,
    next_id: AtomicUsize,
    globals: Mutex<Vec<ObjectReference>>,
    mutators: Mutex<Vec<Arc<MockMutator>>>,
    world: Mutex<World>,
    world_changed: Condvar,
    events: Mutex<Vec<Event>>,
    finalized: Mutex<Vec<usize>>,
    on_finalize: Mutex<Option<FinalizerCallback>>,
}

impl Default for MockVM {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVM {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            globals: Mutex::new(Vec::new()),
            mutators: Mutex::new(Vec::new()),
            world: Mutex::new(World {
                stop_requested: false,
                attached: 0,
                stopped: 0,
            }),
            world_changed: Condvar::new(),
            events: Mutex::new(Vec::new()),
            finalized: Mutex::new(Vec::new()),
            on_finalize: Mutex::new(None),
        }
    }

    /// `object` must be an object of this VM that has not been swept.
    fn object(&self, object: ObjectReference) -> &MockObject {
        // Every reference handed out by this VM points at the header of a boxed `MockObject`.
        // Boxes are only freed by `sweep`, which needs the heap lock and `&self`.
        unsafe { &*(object.to_raw_address() as *const MockObject) }
    }

    fn alloc_object(&self, has_finalizer: bool) -> ObjectReference {
        let object = Box::new(MockObject {
            header: GcHeader::new(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            children: Mutex::new(Vec::new()),
            scanned: AtomicUsize::new(0),
            has_finalizer,
        });
        let reference = object.reference();
        self.heap.lock().unwrap().push(object);
        reference
    }

    pub fn alloc(&self) -> ObjectReference {
        self.alloc_object(false)
    }

    pub fn alloc_with_finalizer(&self) -> ObjectReference {
        self.alloc_object(true)
    }

    pub fn id(&self, object: ObjectReference) -> usize {
        self.object(object).id
    }

    pub fn add_edge(&self, from: ObjectReference, to: ObjectReference) {
        self.object(from).children.lock().unwrap().push(to);
    }

    pub fn scan_count(&self, object: ObjectReference) -> usize {
        self.object(object).scanned.load(Ordering::SeqCst)
    }

    pub fn add_global_root(&self, object: ObjectReference) {
        self.globals.lock().unwrap().push(object);
    }

    pub fn clear_global_roots(&self) {
        self.globals.lock().unwrap().clear();
    }

    /// Register a mutator. Blocks while the collector iterates over the mutators.
    pub fn new_mutator(&self) -> Arc<MockMutator> {
        let mut mutators = self.mutators.lock().unwrap();
        let mutator = Arc::new(MockMutator {
            id: mutators.len(),
            state: MutatorMarkState::new(),
            roots: Mutex::new(Vec::new()),
        });
        mutators.push(mutator.clone());
        mutator
    }

    /// Allocate `len` objects, each referenced by a random earlier one and holding up to `degree`
    /// random edges. The first object becomes a global root, so all of them are reachable.
    #[cfg(test)]
    pub fn build_random_graph(&self, len: usize, degree: usize, seed: u64) -> Vec<ObjectReference> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(seed);
        let objects: Vec<_> = (0..len).map(|_| self.alloc()).collect();
        for i in 1..len {
            let parent = rng.random_range(0..i);
            self.add_edge(objects[parent], objects[i]);
        }
        for object in objects.iter() {
            for _ in 0..rng.random_range(0..degree) {
                self.add_edge(*object, objects[rng.random_range(0..len)]);
            }
        }
        if let Some(root) = objects.first() {
            self.add_global_root(*root);
        }
        objects
    }

    pub fn live_objects(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_live(&self, id: usize) -> bool {
        self.heap.lock().unwrap().iter().any(|object| object.id == id)
    }

    /// Was every marked object traced exactly once, and no unmarked one traced at all?
    pub fn marked_objects_scanned_once(&self) -> bool {
        self.heap.lock().unwrap().iter().all(|object| {
            let expected = usize::from(object.header.is_marked());
            object.scanned.load(Ordering::SeqCst) == expected
        })
    }

    pub fn clear_marks(&self) {
        for object in self.heap.lock().unwrap().iter() {
            object.header.clear_mark();
            object.scanned.store(0, Ordering::SeqCst);
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, event: Event) {
        trace!("MockVM: {:?}", event);
        self.events.lock().unwrap().push(event);
    }

    /// Ids of the dead objects handed to finalization so far.
    pub fn finalized(&self) -> Vec<usize> {
        self.finalized.lock().unwrap().clone()
    }

    /// Run `callback` once finalizers of an epoch have "run". Without one, the finalization of an
    /// epoch is never reported.
    pub fn set_finalizer_callback(&self, callback: impl Fn(Epoch) + Send + Sync + 'static) {
        *self.on_finalize.lock().unwrap() = Some(Box::new(callback));
    }

    /// Start running the calling thread as a mutator. Blocks while the world is stopped.
    pub fn attach(&self) {
        let mut world = self.world.lock().unwrap();
        while world.stop_requested {
            world = self.world_changed.wait(world).unwrap();
        }
        world.attached += 1;
    }

    pub fn detach(&self) {
        let mut world = self.world.lock().unwrap();
        world.attached -= 1;
        self.world_changed.notify_all();
    }

    /// Safepoint poll of an attached thread. If the world is being stopped, count the thread as
    /// stopped, run `at_safepoint`, and block until the world is resumed. The thread stays
    /// counted until it leaves. Returns whether the thread stopped.
    pub fn poll_safepoint(&self, at_safepoint: impl FnOnce()) -> bool {
        {
            let mut world = self.world.lock().unwrap();
            if !world.stop_requested {
                return false;
            }
            world.stopped += 1;
            self.world_changed.notify_all();
        }
        at_safepoint();
        let mut world = self.world.lock().unwrap();
        while world.stop_requested {
            world = self.world_changed.wait(world).unwrap();
        }
        world.stopped -= 1;
        true
    }
}

impl VMBinding for MockVM {
    type Mutator = MockMutator;
    type VMScanning = Self;
    type VMCollection = Self;
    type VMAllocator = Self;
    type VMThreadRegistry = Self;

    fn scanning(&self) -> &Self {
        self
    }

    fn collection(&self) -> &Self {
        self
    }

    fn allocator(&self) -> &Self {
        self
    }

    fn threads(&self) -> &Self {
        self
    }
}

impl Scanning<MockVM> for MockVM {
    fn process_in_mark<Q: ObjectQueue>(&self, queue: &mut Q, object: ObjectReference) {
        let object = self.object(object);
        object.scanned.fetch_add(1, Ordering::SeqCst);
        for child in object.children.lock().unwrap().iter() {
            queue.enqueue(*child);
        }
    }

    fn scan_thread_roots<Q: ObjectQueue>(&self, mutator: &MockMutator, queue: &mut Q) {
        for root in mutator.roots.lock().unwrap().iter() {
            queue.enqueue(*root);
        }
    }

    fn scan_global_roots<Q: ObjectQueue>(&self, queue: &mut Q) {
        for root in self.globals.lock().unwrap().iter() {
            queue.enqueue(*root);
        }
    }
}

impl Collection<MockVM> for MockVM {
    fn stop_the_world(&self, epoch: Epoch) {
        self.record(Event::StopTheWorld(epoch));
        let mut world = self.world.lock().unwrap();
        world.stop_requested = true;
        self.world_changed.notify_all();
        while world.stopped < world.attached {
            world = self.world_changed.wait(world).unwrap();
        }
    }

    fn resume_the_world(&self, epoch: Epoch) {
        self.record(Event::ResumeTheWorld(epoch));
        let mut world = self.world.lock().unwrap();
        world.stop_requested = false;
        self.world_changed.notify_all();
    }

    fn process_weaks(&self, epoch: Epoch) {
        self.record(Event::ProcessWeaks(epoch));
    }

    fn enable_weak_barriers(&self, epoch: Epoch) {
        self.record(Event::EnableWeakBarriers(epoch));
    }

    fn disable_weak_barriers(&self, epoch: Epoch) {
        self.record(Event::DisableWeakBarriers(epoch));
    }
}

impl Allocator<MockVM> for MockVM {
    /// Ids of dead objects with finalizers.
    type FinalizerQueue = Vec<usize>;

    fn prepare_for_gc(&self) {
        self.record(Event::PrepareForGC);
    }

    fn free_reference_counted(&self) {
        self.record(Event::FreeReferenceCounted);
    }

    fn sweep(&self, epoch: Epoch) -> Vec<usize> {
        self.record(Event::Sweep(epoch));
        let mut finalizable = Vec::new();
        let mut heap = self.heap.lock().unwrap();
        let before = heap.len();
        heap.retain(|object| {
            if object.header.is_marked() {
                object.header.clear_mark();
                object.scanned.store(0, Ordering::SeqCst);
                true
            } else {
                if object.has_finalizer {
                    finalizable.push(object.id);
                }
                false
            }
        });
        debug!(
            "MockVM: epoch {} swept {} of {} objects",
            epoch,
            before - heap.len(),
            before
        );
        finalizable
    }

    fn schedule_finalization(&self, queue: Vec<usize>, epoch: Epoch) {
        self.record(Event::ScheduleFinalization(epoch));
        self.finalized.lock().unwrap().extend(queue);
        if let Some(callback) = self.on_finalize.lock().unwrap().as_ref() {
            callback(epoch);
        }
    }
}

impl ThreadRegistry<MockVM> for MockVM {
    type IterationLock<'a> = MutatorsGuard<'a>;

    fn lock_for_iteration(&self) -> MutatorsGuard<'_> {
        MutatorsGuard(self.mutators.lock().unwrap())
    }
}

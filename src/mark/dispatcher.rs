//! Work-stealing distribution of the mark phase across a dynamic set of threads.
//!
//! Three kinds of threads take part in marking an epoch, each through its own entry point:
//!
//! -   the thread that stopped the world: [`MarkDispatcher::run_main_in_stw`] (exactly one),
//! -   mutators at a safepoint, if they cooperate: [`MarkDispatcher::run_on_mutator`],
//! -   auxiliary GC threads: [`MarkDispatcher::run_auxiliary`].
//!
//! Each participant owns a [`MarkJob`] and registers it in the job registry. A job marks from
//! its own queue, then steals from the shared lists of the others, and when nothing is left it
//! parks on the termination monitor. The last job to park, once every expected job has
//! registered and every shared list is empty, declares the epoch's marking done.

use crate::mark::pacer::{Epoch, EpochPacer, Phase};
use crate::mark::registry::JobRegistry;
use crate::mark::work_queue::WorkQueue;
use crate::mark::ObjectQueue;
use crate::util::{ObjectReference, Options};
use crate::vm::{MutatorThread, Scanning, ThreadRegistry, VMBinding};
use crossbeam::utils::Backoff;
use probe::probe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

/// Outcome of the mark phase of one epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkStats {
    pub epoch: Epoch,
    /// Objects dequeued and traced, over all jobs.
    pub marked_objects: usize,
    /// Thread-local roots reported, over all mutators.
    pub thread_roots: usize,
    pub global_roots: usize,
    /// Jobs that registered.
    pub workers: usize,
    pub cooperative_mutators: usize,
}

/// Guarded by `MarkDispatcher::termination`.
struct TerminationSync {
    /// Jobs parked for lack of work.
    waiting: usize,
    /// Registered jobs not dropped yet.
    live_jobs: usize,
}

/// The thread registry's iteration lock, held from [`MarkDispatcher::begin_marking_epoch`] until
/// marking is over.
pub type MutatorsLock<'a, VM> =
    <<VM as VMBinding>::VMThreadRegistry as ThreadRegistry<VM>>::IterationLock<'a>;

/// What `begin_marking_epoch` fixed for the current epoch.
struct EpochSnapshot<VM: VMBinding> {
    mutators: Vec<Arc<VM::Mutator>>,
    aux_gc_threads: usize,
}

pub struct MarkDispatcher<VM: VMBinding> {
    vm: Arc<VM>,
    pacer: EpochPacer,
    registry: JobRegistry,

    termination: Mutex<TerminationSync>,
    termination_changed: Condvar,
    /// Mirror of `TerminationSync::waiting`, so sharing does not take the lock when nobody waits.
    waiting_hint: AtomicUsize,
    all_done: AtomicBool,
    shutdown: AtomicBool,

    aux_gc_threads: AtomicUsize,
    mutators_cooperate: AtomicBool,
    aux_generation: AtomicUsize,
    steal_fraction_numerator: usize,
    min_size_to_share: usize,
    steal_attempt_cycles: usize,

    snapshot: Mutex<EpochSnapshot<VM>>,
    epoch_cooperate: AtomicBool,
    cooperative_mutators: AtomicUsize,
    marked_objects: AtomicUsize,
    thread_roots: AtomicUsize,
}

impl<VM: VMBinding> MarkDispatcher<VM> {
    pub fn new(vm: Arc<VM>, options: &Options) -> Self {
        Self {
            vm,
            pacer: EpochPacer::new(),
            registry: JobRegistry::new(options.registry_capacity),
            termination: Mutex::new(TerminationSync {
                waiting: 0,
                live_jobs: 0,
            }),
            termination_changed: Condvar::new(),
            waiting_hint: AtomicUsize::new(0),
            all_done: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            aux_gc_threads: AtomicUsize::new(options.aux_gc_threads),
            mutators_cooperate: AtomicBool::new(options.mutators_cooperate),
            aux_generation: AtomicUsize::new(0),
            steal_fraction_numerator: options.steal_fraction_numerator,
            min_size_to_share: options.min_size_to_share,
            steal_attempt_cycles: options.steal_attempt_cycles,
            snapshot: Mutex::new(EpochSnapshot {
                mutators: Vec::new(),
                aux_gc_threads: 0,
            }),
            epoch_cooperate: AtomicBool::new(false),
            cooperative_mutators: AtomicUsize::new(0),
            marked_objects: AtomicUsize::new(0),
            thread_roots: AtomicUsize::new(0),
        }
    }

    pub fn pacer(&self) -> &EpochPacer {
        &self.pacer
    }

    pub fn registered_count(&self) -> usize {
        self.registry.registered()
    }

    pub fn expected_count(&self) -> usize {
        self.registry.expected()
    }

    pub fn registry_capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// Has termination been detected in the current epoch?
    pub fn all_done(&self) -> bool {
        self.all_done.load(Ordering::Acquire)
    }

    pub fn aux_gc_threads(&self) -> usize {
        self.aux_gc_threads.load(Ordering::Relaxed)
    }

    pub fn mutators_cooperate(&self) -> bool {
        self.mutators_cooperate.load(Ordering::Relaxed)
    }

    /// Change the participants of future epochs. Must not be called while an epoch is marking.
    pub fn reconfigure(&self, aux_gc_threads: usize, mutators_cooperate: bool) {
        debug_assert!(matches!(self.pacer.phase(), Phase::Idle | Phase::Shutdown));
        info!(
            "Mark dispatcher reconfigured: {} auxiliary threads, mutators cooperate: {}",
            aux_gc_threads, mutators_cooperate
        );
        self.aux_gc_threads.store(aux_gc_threads, Ordering::Relaxed);
        self.mutators_cooperate
            .store(mutators_cooperate, Ordering::Relaxed);
    }

    /// The current generation of auxiliary threads. Threads of an older generation leave their
    /// loop.
    pub fn aux_generation(&self) -> usize {
        self.aux_generation.load(Ordering::Acquire)
    }

    /// Make every auxiliary thread of the current generation exit its loop.
    pub fn retire_auxiliary(&self) {
        self.aux_generation.fetch_add(1, Ordering::AcqRel);
        self.pacer.wake_all();
    }

    pub fn request_shutdown(&self) {
        info!("Mark dispatcher shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        self.pacer.shutdown();
        let _sync = self.termination.lock().unwrap();
        self.termination_changed.notify_all();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Open recruitment for `epoch`. Called by the main GC thread with the world stopped.
    ///
    /// The returned lock keeps new mutators from registering. Hold it until
    /// [`MarkDispatcher::run_main_in_stw`] returns: a thread missing from the snapshot would
    /// have its roots skipped.
    #[must_use = "mutators registered before marking is over would not have their roots scanned"]
    pub fn begin_marking_epoch(&self, epoch: Epoch) -> MutatorsLock<'_, VM> {
        let mutators = self.vm.threads().lock_for_iteration();
        for mutator in mutators.iter() {
            mutator.mark_state().reset_for(epoch);
        }
        let cooperate = self.mutators_cooperate();
        let aux_gc_threads = self.aux_gc_threads();
        let expected = if cooperate { mutators.len() } else { 0 } + aux_gc_threads + 1;

        {
            let mut sync = self.termination.lock().unwrap();
            if !self.shutdown_requested() {
                assert_eq!(
                    sync.live_jobs, 0,
                    "mark jobs of the previous epoch are still alive"
                );
            }
            sync.waiting = 0;
            self.waiting_hint.store(0, Ordering::Relaxed);
        }
        self.registry.reset(expected);
        self.all_done.store(false, Ordering::Release);
        self.epoch_cooperate.store(cooperate, Ordering::Relaxed);
        self.cooperative_mutators.store(0, Ordering::Relaxed);
        self.marked_objects.store(0, Ordering::Relaxed);
        self.thread_roots.store(0, Ordering::Relaxed);
        debug!(
            "Epoch {}: expecting up to {} mark jobs ({} mutators, cooperative: {}, {} auxiliary threads)",
            epoch,
            expected,
            mutators.len(),
            cooperate,
            aux_gc_threads
        );
        *self.snapshot.lock().unwrap() = EpochSnapshot {
            mutators: mutators.to_vec(),
            aux_gc_threads,
        };
        self.pacer.begin_epoch(epoch);
        mutators
    }

    /// Register `job` for the current epoch. Must be called once per job, before it has work.
    pub fn register_task(&self, job: &mut MarkJob<'_, VM>) {
        assert!(
            job.slot.is_none(),
            "mark job on {:?} registered twice",
            job.carrier
        );
        assert!(
            job.queue.is_empty(),
            "mark job on {:?} registered with a non-empty queue",
            job.carrier
        );
        self.termination.lock().unwrap().live_jobs += 1;
        let slot = self.registry.register(job.queue.shared());
        job.slot = Some(slot);
        trace!("Registered mark job #{} on {:?}", slot, job.carrier);
        let expected = self.registry.expected();
        if slot + 1 == expected {
            debug!(
                "Epoch {}: all {} expected mark jobs registered",
                self.pacer.epoch(),
                expected
            );
        }
    }

    /// Mark on the thread that stopped the world. Returns once marking is complete and every
    /// job of the epoch has been dropped; the pacer is Idle again by then.
    pub fn run_main_in_stw(&self) -> MarkStats {
        let epoch = self.pacer.epoch();
        let (mutators, aux_gc_threads) = {
            let snapshot = self.snapshot.lock().unwrap();
            (snapshot.mutators.clone(), snapshot.aux_gc_threads)
        };
        let mut job = MarkJob::new(self);
        self.register_task(&mut job);

        // Closes recruitment: nobody can become cooperative after this.
        let Some(cooperative) = self.pacer.begin_parallel_mark(epoch, || {
            self.cooperative_mutators.load(Ordering::Relaxed)
        }) else {
            return MarkStats::default();
        };

        let mut thread_roots = 0;
        for mutator in mutators.iter() {
            let state = mutator.mark_state();
            if state.try_claim_root_set() {
                thread_roots += job.collect_thread_roots(mutator);
                state.publish();
            }
        }
        self.thread_roots.fetch_add(thread_roots, Ordering::Relaxed);

        // Every root has to be in some queue before anybody may declare termination.
        let backoff = Backoff::new();
        for mutator in mutators.iter() {
            while !mutator.mark_state().is_published() {
                if self.shutdown_requested() {
                    return MarkStats::default();
                }
                backoff.snooze();
            }
        }
        let global_roots = job.collect_global_roots();

        self.registry.set_expected(cooperative + aux_gc_threads + 1);
        self.wake_idle_workers();
        debug!(
            "Epoch {}: marking with {} jobs ({} cooperative mutators), {} global roots",
            epoch,
            self.registry.expected(),
            cooperative,
            global_roots
        );

        job.mark_loop();
        drop(job);
        self.wait_jobs_finished();
        #[cfg(feature = "extreme_assertions")]
        if !self.shutdown_requested() {
            assert!(
                self.registry.all_shared_empty(),
                "epoch {} ended with work left in a shared list",
                epoch
            );
        }

        let stats = MarkStats {
            epoch,
            marked_objects: self.marked_objects.load(Ordering::Relaxed),
            thread_roots: self.thread_roots.load(Ordering::Relaxed),
            global_roots,
            workers: self.registry.registered(),
            cooperative_mutators: cooperative,
        };
        self.pacer.finish_epoch(epoch);
        stats
    }

    /// Called by a mutator that the runtime counts as stopped for `epoch`: wait until the epoch
    /// opens recruitment, then join it as [`MarkDispatcher::run_on_mutator`] does. Returns at once
    /// if mutators do not cooperate, or if `epoch` is already marking or over.
    pub fn run_on_stopped_mutator(&self, epoch: Epoch, mutator: &VM::Mutator) {
        if !self.mutators_cooperate() {
            return;
        }
        if self.pacer.wait_epoch_begun(epoch) {
            self.run_on_mutator(mutator);
        }
    }

    /// Called by a mutator at a safepoint: mark its own roots and help with marking, if
    /// mutators cooperate and the current epoch is still recruiting.
    pub fn run_on_mutator(&self, mutator: &VM::Mutator) {
        if !self.epoch_cooperate.load(Ordering::Relaxed) || !self.pacer.is(Phase::Ready) {
            return;
        }
        let epoch = self.pacer.epoch();
        let state = mutator.mark_state();
        let joined = self
            .pacer
            .with_ready(epoch, || {
                // Threads created after the snapshot are not expected, and somebody else may
                // already be scanning this thread's roots.
                if state.epoch() != epoch || !state.try_claim_root_set() {
                    return false;
                }
                state.set_cooperative();
                self.cooperative_mutators.fetch_add(1, Ordering::Relaxed);
                true
            })
            .unwrap_or(false);
        if !joined {
            return;
        }
        trace!(
            "Mutator {} cooperates in marking epoch {}",
            mutator.carrier_id(),
            epoch
        );

        let mut job = MarkJob::new(self);
        self.register_task(&mut job);
        let roots = job.collect_thread_roots(mutator);
        self.thread_roots.fetch_add(roots, Ordering::Relaxed);
        state.publish();
        if self.pacer.wait_parallel_mark(epoch) {
            job.mark_loop();
        }
    }

    /// One round of an auxiliary GC thread: wait for an epoch newer than `after`, mark in it,
    /// and wait for it to finish. Returns the epoch, or `None` if the thread should exit
    /// (shutdown, or its generation was retired).
    pub fn run_auxiliary(&self, generation: usize, after: Epoch) -> Option<Epoch> {
        let epoch = self
            .pacer
            .wait_epoch_ready(after, || self.aux_generation() != generation)?;
        let mut job = MarkJob::new(self);
        self.register_task(&mut job);
        if self.pacer.wait_parallel_mark(epoch) {
            job.mark_loop();
        }
        drop(job);
        self.pacer.wait_epoch_finished(epoch);
        Some(epoch)
    }

    fn notify_work_shared(&self) {
        if self.waiting_hint.load(Ordering::Acquire) == 0 {
            return;
        }
        let _sync = self.termination.lock().unwrap();
        self.termination_changed.notify_all();
    }

    fn wake_idle_workers(&self) {
        let _sync = self.termination.lock().unwrap();
        self.termination_changed.notify_all();
    }

    /// Park a job that found no work. Returns `true` if it should look for work again, `false`
    /// if marking is over.
    fn wait_for_more_work(&self, carrier: ThreadId) -> bool {
        let mut sync = self.termination.lock().unwrap();
        sync.waiting += 1;
        self.waiting_hint.store(sync.waiting, Ordering::Release);
        loop {
            if self.all_done.load(Ordering::Acquire) {
                return false;
            }
            if self.shutdown_requested() {
                sync.waiting -= 1;
                self.waiting_hint.store(sync.waiting, Ordering::Release);
                return false;
            }
            let registered = self.registry.registered();
            if sync.waiting == registered && registered == self.registry.expected() {
                if self.registry.all_shared_empty() {
                    self.all_done.store(true, Ordering::Release);
                    self.termination_changed.notify_all();
                    debug!(
                        "Epoch {}: {:?} detected termination ({} jobs)",
                        self.pacer.epoch(),
                        carrier,
                        registered
                    );
                    return false;
                }
                // Work left in a shared list by a contended steal. Everybody else is parked, so
                // this time the steal will succeed.
                sync.waiting -= 1;
                self.waiting_hint.store(sync.waiting, Ordering::Release);
                return true;
            }
            sync = self.termination_changed.wait(sync).unwrap();
            if !self.all_done.load(Ordering::Acquire) && !self.shutdown_requested() {
                sync.waiting -= 1;
                self.waiting_hint.store(sync.waiting, Ordering::Release);
                return true;
            }
        }
    }

    fn on_job_dropped(&self, processed: usize) {
        self.marked_objects.fetch_add(processed, Ordering::Relaxed);
        let mut sync = self.termination.lock().unwrap();
        sync.live_jobs -= 1;
        if sync.live_jobs == 0 {
            self.termination_changed.notify_all();
        }
    }

    fn wait_jobs_finished(&self) {
        let mut sync = self.termination.lock().unwrap();
        while sync.live_jobs > 0 && !self.shutdown_requested() {
            sync = self.termination_changed.wait(sync).unwrap();
        }
    }
}

/// One thread's participation in marking an epoch.
pub struct MarkJob<'d, VM: VMBinding> {
    dispatcher: &'d MarkDispatcher<VM>,
    queue: WorkQueue,
    /// The thread running the job. Diagnostics only.
    carrier: ThreadId,
    slot: Option<usize>,
    processed: usize,
}

impl<'d, VM: VMBinding> MarkJob<'d, VM> {
    pub fn new(dispatcher: &'d MarkDispatcher<VM>) -> Self {
        Self {
            dispatcher,
            queue: WorkQueue::new(),
            carrier: std::thread::current().id(),
            slot: None,
            processed: 0,
        }
    }

    pub fn carrier(&self) -> ThreadId {
        self.carrier
    }

    /// The registry slot, once registered.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Objects traced by this job so far.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Enqueue `object` unless it is already marked. Returns whether it was enqueued.
    pub fn try_push(&mut self, object: ObjectReference) -> bool {
        self.queue.push_local(object)
    }

    /// Pop from the local queue, sharing the rest if it has grown large and nothing of ours is
    /// on offer.
    pub fn try_pop(&mut self) -> Option<ObjectReference> {
        let object = self.queue.pop_local()?;
        if self.queue.local_len() >= self.dispatcher.min_size_to_share
            && self.queue.shared_len() == 0
        {
            self.share_work();
        }
        Some(object)
    }

    /// Offer the local queue to thieves. Returns whether anything was shared.
    pub fn share_work(&mut self) -> bool {
        let shared = self.queue.share_all();
        if shared == 0 {
            return false;
        }
        trace!("{:?} shared {} objects", self.carrier, shared);
        self.dispatcher.notify_work_shared();
        true
    }

    /// Refill the local queue from our own shared list or from other jobs, spinning for a
    /// bounded number of sweeps. Returns whether anything was found.
    pub fn try_acquire_work(&mut self) -> bool {
        let dispatcher = self.dispatcher;
        let numerator = dispatcher.steal_fraction_numerator;
        let slot = self.slot;
        let backoff = Backoff::new();
        for _ in 0..dispatcher.steal_attempt_cycles {
            let mut acquired = self.queue.reclaim_shared(numerator);
            if acquired == 0 {
                let queue = &mut self.queue;
                acquired = dispatcher
                    .registry
                    .visit_others(slot, |victim| queue.steal_fraction(victim, numerator));
            }
            if acquired > 0 {
                trace!("{:?} acquired {} objects", self.carrier, acquired);
                return true;
            }
            backoff.snooze();
        }
        false
    }

    /// Trace until the epoch's marking is over.
    pub fn mark_loop(&mut self) {
        debug_assert!(self.slot.is_some(), "marking with an unregistered job");
        let dispatcher = self.dispatcher;
        let scanning = dispatcher.vm.scanning();
        loop {
            while let Some(object) = self.try_pop() {
                self.processed += 1;
                scanning.process_in_mark(self, object);
            }
            if self.try_acquire_work() {
                continue;
            }
            if !dispatcher.wait_for_more_work(self.carrier) {
                break;
            }
        }
        trace!(
            "{:?} finished marking: {} objects",
            self.carrier,
            self.processed
        );
        probe!(parmark, mark_loop_done, self.processed);
    }

    fn collect_thread_roots(&mut self, mutator: &VM::Mutator) -> usize {
        let dispatcher = self.dispatcher;
        let scanning = dispatcher.vm.scanning();
        let mut roots = RootCollector {
            job: self,
            reported: 0,
        };
        scanning.scan_thread_roots(mutator, &mut roots);
        roots.reported
    }

    fn collect_global_roots(&mut self) -> usize {
        let dispatcher = self.dispatcher;
        let scanning = dispatcher.vm.scanning();
        let mut roots = RootCollector {
            job: self,
            reported: 0,
        };
        scanning.scan_global_roots(&mut roots);
        roots.reported
    }
}

impl<VM: VMBinding> ObjectQueue for MarkJob<'_, VM> {
    fn enqueue(&mut self, object: ObjectReference) {
        self.try_push(object);
    }
}

impl<VM: VMBinding> Drop for MarkJob<'_, VM> {
    fn drop(&mut self) {
        if self.slot.is_none() {
            return;
        }
        if !self.dispatcher.shutdown_requested() && !std::thread::panicking() {
            debug_assert!(
                self.queue.local_is_empty() && self.queue.shared_len() == 0,
                "mark job on {:?} dropped with {} local and {} shared objects",
                self.carrier,
                self.queue.local_len(),
                self.queue.shared_len()
            );
        }
        self.dispatcher.on_job_dropped(self.processed);
    }
}

/// Counts the roots reported into a job.
struct RootCollector<'j, 'd, VM: VMBinding> {
    job: &'j mut MarkJob<'d, VM>,
    reported: usize,
}

impl<VM: VMBinding> ObjectQueue for RootCollector<'_, '_, VM> {
    fn enqueue(&mut self, object: ObjectReference) {
        self.reported += 1;
        self.job.try_push(object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::MockVM;
    use std::collections::HashSet;
    use std::time::Duration;

    fn options(aux_gc_threads: usize, mutators_cooperate: bool) -> Options {
        Options {
            aux_gc_threads,
            mutators_cooperate,
            min_size_to_share: 256,
            ..Options::default()
        }
    }

    fn drain(job: &mut MarkJob<'_, MockVM>) {
        loop {
            while job.try_pop().is_some() {}
            if !job.try_acquire_work() {
                break;
            }
        }
    }

    #[test]
    fn uncontended_stealing() {
        let vm = Arc::new(MockVM::new());
        let objects: Vec<_> = (0..512).map(|_| vm.alloc()).collect();
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(1, false));
        let _mutators = dispatcher.begin_marking_epoch(1);
        assert_eq!(dispatcher.expected_count(), 2);

        let mut first = MarkJob::new(&dispatcher);
        let mut second = MarkJob::new(&dispatcher);
        dispatcher.register_task(&mut first);
        dispatcher.register_task(&mut second);
        for object in objects.iter() {
            assert!(first.try_push(*object));
        }

        assert!(first.try_pop().is_some());
        first.share_work();
        assert!(second.try_acquire_work());
        assert!(!second.queue().local_is_empty());

        drain(&mut first);
        drain(&mut second);
        assert_eq!(
            first.queue().shared_len() + second.queue().shared_len(),
            0
        );
    }

    #[test]
    fn share_eventually() {
        let vm = Arc::new(MockVM::new());
        let objects: Vec<_> = (0..300).map(|_| vm.alloc()).collect();
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(0, false));
        let _mutators = dispatcher.begin_marking_epoch(1);

        let mut job = MarkJob::new(&dispatcher);
        dispatcher.register_task(&mut job);
        for object in objects.iter() {
            job.try_push(*object);
        }
        assert_eq!(job.queue().shared_len(), 0);
        job.try_pop();
        assert!(job.queue().shared_len() > 0);

        job.mark_loop();
        assert!(dispatcher.all_done());
        assert_eq!(job.processed(), 299);
        assert!(job.queue().is_empty());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_is_fatal() {
        let vm = Arc::new(MockVM::new());
        let dispatcher = MarkDispatcher::new(vm, &options(1, false));
        let _mutators = dispatcher.begin_marking_epoch(1);
        let mut job = MarkJob::new(&dispatcher);
        dispatcher.register_task(&mut job);
        dispatcher.register_task(&mut job);
    }

    /// Runs one epoch with `aux` auxiliary threads and returns the mark stats.
    fn mark_epoch(
        vm: &MockVM,
        dispatcher: &MarkDispatcher<MockVM>,
        epoch: Epoch,
        aux: usize,
    ) -> MarkStats {
        let _mutators = dispatcher.begin_marking_epoch(epoch);
        std::thread::scope(|scope| {
            let generation = dispatcher.aux_generation();
            for _ in 0..aux {
                scope.spawn(move || dispatcher.run_auxiliary(generation, epoch - 1));
            }
            let stats = dispatcher.run_main_in_stw();
            assert!(vm.marked_objects_scanned_once());
            stats
        })
    }

    #[test]
    fn parallel_mark_marks_reachable_objects_once() {
        let vm = Arc::new(MockVM::new());
        let reachable = vm.build_random_graph(5000, 4, 42);
        let unreachable: Vec<_> = (0..100).map(|_| vm.alloc()).collect();
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(3, false));

        let stats = mark_epoch(&vm, &dispatcher, 1, 3);
        assert_eq!(stats.epoch, 1);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.marked_objects, reachable.len());
        for object in reachable.iter() {
            assert!(object.is_marked());
            assert_eq!(vm.scan_count(*object), 1);
        }
        for object in unreachable.iter() {
            assert!(!object.is_marked());
        }
        assert!(dispatcher.pacer().is(Phase::Idle));
    }

    #[test]
    fn consecutive_epochs() {
        let vm = Arc::new(MockVM::new());
        let reachable = vm.build_random_graph(1000, 3, 7);
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(2, false));
        for epoch in 1..=3 {
            let stats = mark_epoch(&vm, &dispatcher, epoch, 2);
            assert_eq!(stats.marked_objects, reachable.len());
            vm.clear_marks();
        }
    }

    #[test]
    fn mutator_roots_are_scanned_by_the_main_thread() {
        let vm = Arc::new(MockVM::new());
        let mutators: Vec<_> = (0..4).map(|_| vm.new_mutator()).collect();
        let mut rooted = HashSet::new();
        for mutator in mutators.iter() {
            let object = vm.alloc();
            let child = vm.alloc();
            vm.add_edge(object, child);
            mutator.add_root(object);
            rooted.insert(object);
            rooted.insert(child);
        }
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(1, false));
        let stats = mark_epoch(&vm, &dispatcher, 1, 1);
        assert_eq!(stats.thread_roots, 4);
        assert_eq!(stats.cooperative_mutators, 0);
        assert_eq!(stats.marked_objects, rooted.len());
        assert!(mutators.iter().all(|m| m.mark_state().is_published()));
    }

    #[test]
    fn cooperative_mutators_mark_their_own_roots() {
        let vm = Arc::new(MockVM::new());
        let mutators: Vec<_> = (0..3).map(|_| vm.new_mutator()).collect();
        for mutator in mutators.iter() {
            let roots = vm.build_random_graph(300, 3, mutator.id() as u64);
            for root in roots.iter().take(5) {
                mutator.add_root(*root);
            }
            vm.clear_global_roots();
        }
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(1, true));
        let _mutators = dispatcher.begin_marking_epoch(1);
        assert_eq!(dispatcher.expected_count(), 3 + 1 + 1);

        let stats = std::thread::scope(|scope| {
            let generation = dispatcher.aux_generation();
            let dispatcher = &dispatcher;
            scope.spawn(move || dispatcher.run_auxiliary(generation, 0));
            for mutator in mutators.iter() {
                scope.spawn(move || dispatcher.run_on_mutator(mutator));
            }
            // Let every mutator join before recruitment closes.
            while !mutators.iter().all(|m| m.mark_state().is_published()) {
                std::thread::sleep(Duration::from_millis(1));
            }
            dispatcher.run_main_in_stw()
        });
        assert_eq!(stats.cooperative_mutators, 3);
        assert_eq!(stats.workers, 5);
        assert_eq!(stats.thread_roots, 15);
        assert!(mutators.iter().all(|m| m.mark_state().is_cooperative()));
        assert!(vm.marked_objects_scanned_once());
    }

    #[test]
    fn late_mutator_is_a_no_op() {
        let vm = Arc::new(MockVM::new());
        let mutator = vm.new_mutator();
        let root = vm.alloc();
        mutator.add_root(root);
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(0, true));

        // Not recruiting yet.
        dispatcher.run_on_mutator(&mutator);
        assert!(!mutator.mark_state().is_cooperative());

        let stats = mark_epoch(&vm, &dispatcher, 1, 0);
        assert_eq!(stats.cooperative_mutators, 0);
        assert!(root.is_marked());

        // Recruitment is closed.
        dispatcher.run_on_mutator(&mutator);
        assert!(!mutator.mark_state().is_cooperative());
    }

    #[test]
    fn stopped_mutators_join_once_recruitment_opens() {
        let vm = Arc::new(MockVM::new());
        let mutators: Vec<_> = (0..3).map(|_| vm.new_mutator()).collect();
        for mutator in mutators.iter() {
            mutator.add_root(vm.alloc());
        }
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(0, true));
        let dispatcher = &dispatcher;

        let stats = std::thread::scope(|scope| {
            // The world is stopped before the epoch begins: the mutators wait at the safepoint.
            for mutator in mutators.iter() {
                scope.spawn(move || dispatcher.run_on_stopped_mutator(1, mutator));
            }
            std::thread::sleep(Duration::from_millis(10));
            assert!(mutators.iter().all(|m| !m.mark_state().is_cooperative()));

            let _mutators = dispatcher.begin_marking_epoch(1);
            while !mutators.iter().all(|m| m.mark_state().is_published()) {
                std::thread::sleep(Duration::from_millis(1));
            }
            dispatcher.run_main_in_stw()
        });
        assert_eq!(stats.cooperative_mutators, 3);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.thread_roots, 3);
        assert_eq!(stats.marked_objects, 3);
    }

    #[test]
    fn late_safepoint_does_not_join_a_later_epoch() {
        let vm = Arc::new(MockVM::new());
        let mutator = vm.new_mutator();
        let root = vm.alloc();
        mutator.add_root(root);
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(0, true));
        mark_epoch(&vm, &dispatcher, 1, 0);
        vm.clear_marks();

        let _mutators = dispatcher.begin_marking_epoch(2);
        // The safepoint handler of epoch 1 only runs now.
        dispatcher.run_on_stopped_mutator(1, &mutator);
        assert!(!mutator.mark_state().is_cooperative());
        let stats = dispatcher.run_main_in_stw();
        assert_eq!(stats.cooperative_mutators, 0);
        assert_eq!(stats.thread_roots, 1);
        assert!(root.is_marked());
    }

    #[test]
    fn mutators_registering_during_the_mark_wait_for_it() {
        let vm = Arc::new(MockVM::new());
        let root = vm.alloc();
        let dispatcher = MarkDispatcher::new(vm.clone(), &options(0, false));

        std::thread::scope(|scope| {
            let mutators = dispatcher.begin_marking_epoch(1);
            assert!(mutators.is_empty());
            let registering = scope.spawn(|| {
                let mutator = vm.new_mutator();
                mutator.add_root(root);
            });
            std::thread::sleep(Duration::from_millis(10));
            assert!(!registering.is_finished());

            let stats = dispatcher.run_main_in_stw();
            assert_eq!(stats.thread_roots, 0);
            drop(mutators);
            registering.join().unwrap();
        });

        let stats = mark_epoch(&vm, &dispatcher, 2, 0);
        assert_eq!(stats.thread_roots, 1);
        assert!(root.is_marked());
    }

    #[test]
    fn auxiliary_threads_exit_on_shutdown_and_retirement() {
        let vm = Arc::new(MockVM::new());
        let dispatcher = MarkDispatcher::new(vm, &options(2, false));
        let dispatcher = &dispatcher;
        std::thread::scope(|scope| {
            let generation = dispatcher.aux_generation();
            let retired = scope.spawn(move || dispatcher.run_auxiliary(generation, 0));
            std::thread::sleep(Duration::from_millis(10));
            dispatcher.retire_auxiliary();
            assert_eq!(retired.join().unwrap(), None);

            let generation = dispatcher.aux_generation();
            let stopped = scope.spawn(move || dispatcher.run_auxiliary(generation, 0));
            std::thread::sleep(Duration::from_millis(10));
            dispatcher.request_shutdown();
            assert_eq!(stopped.join().unwrap(), None);
        });
        assert!(dispatcher.shutdown_requested());
    }
}

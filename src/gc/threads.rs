//! The main GC thread, which runs collection cycles, and the pool of auxiliary GC threads, which
//! only help with marking.

use crate::gc::scheduler::GcScheduler;
use crate::gc::state::GcStateHolder;
use crate::gc::stats::{EpochStats, GcPhase, GcStats};
use crate::mark::{Epoch, MarkDispatcher};
use crate::util::Options;
use crate::vm::{Allocator, Collection, VMBinding};
use probe::probe;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// State shared by the GC threads and the public API.
pub struct GcContext<VM: VMBinding> {
    pub(crate) vm: Arc<VM>,
    pub(crate) state: GcStateHolder,
    pub(crate) dispatcher: MarkDispatcher<VM>,
    pub(crate) scheduler: GcScheduler,
    pub(crate) stats: GcStats,
    concurrent_sweep: bool,
    concurrent_weak_processing: bool,
    /// Held by the main GC thread for a whole cycle, and by reconfiguration.
    cycle_lock: Mutex<()>,
}

impl<VM: VMBinding> GcContext<VM> {
    pub fn new(vm: Arc<VM>, options: &Options, scheduler: GcScheduler) -> Self {
        Self {
            dispatcher: MarkDispatcher::new(vm.clone(), options),
            vm,
            state: GcStateHolder::new(),
            scheduler,
            stats: GcStats::new(),
            concurrent_sweep: options.concurrent_sweep,
            concurrent_weak_processing: options.concurrent_weak_processing,
            cycle_lock: Mutex::new(()),
        }
    }

    fn main_loop(&self) {
        while let Some(epoch) = self.state.wait_scheduled() {
            let _cycle = self.cycle_lock.lock().unwrap();
            if self.dispatcher.shutdown_requested() {
                break;
            }
            self.perform_full_gc(epoch);
        }
        debug!("Main GC thread exiting");
    }

    fn auxiliary_loop(&self, generation: usize, mut after: Epoch) {
        while let Some(epoch) = self.dispatcher.run_auxiliary(generation, after) {
            after = epoch;
        }
        trace!("Auxiliary GC thread of generation {} exiting", generation);
    }

    /// One full stop-the-world mark, followed by sweep.
    pub(crate) fn perform_full_gc(&self, epoch: Epoch) {
        let collection = self.vm.collection();
        let allocator = self.vm.allocator();
        let started = Instant::now();
        let mut stats = EpochStats::new(epoch);

        self.state.start(epoch);
        self.scheduler.on_gc_start(epoch);
        probe!(parmark, gc_start, epoch);
        info!("Epoch {}: collection started", epoch);

        stats.time(GcPhase::StopTheWorld, || collection.stop_the_world(epoch));
        // Stopped mutators waiting in `safepoint` join once recruitment opens. New mutators
        // cannot register until the mark is over.
        let mutators = self.dispatcher.begin_marking_epoch(epoch);
        stats.mark = stats.time(GcPhase::Mark, || self.dispatcher.run_main_in_stw());
        drop(mutators);
        if self.dispatcher.shutdown_requested() {
            collection.resume_the_world(epoch);
            return;
        }
        probe!(parmark, mark_done, epoch, stats.mark.marked_objects);

        if self.concurrent_weak_processing {
            stats.time(GcPhase::WeakProcessing, || {
                collection.enable_weak_barriers(epoch);
                collection.resume_the_world(epoch);
                collection.process_weaks(epoch);
                collection.stop_the_world(epoch);
                collection.disable_weak_barriers(epoch);
            });
        } else {
            stats.time(GcPhase::WeakProcessing, || collection.process_weaks(epoch));
        }

        stats.time(GcPhase::PrepareHeap, || {
            allocator.prepare_for_gc();
            allocator.free_reference_counted();
        });

        let finalizer_queue = if self.concurrent_sweep {
            stats.time(GcPhase::ResumeTheWorld, || {
                collection.resume_the_world(epoch)
            });
            stats.pause = started.elapsed();
            stats.time(GcPhase::Sweep, || allocator.sweep(epoch))
        } else {
            let queue = stats.time(GcPhase::Sweep, || allocator.sweep(epoch));
            stats.time(GcPhase::ResumeTheWorld, || {
                collection.resume_the_world(epoch)
            });
            stats.pause = started.elapsed();
            queue
        };

        stats.time(GcPhase::Finalization, || {
            allocator.schedule_finalization(finalizer_queue, epoch)
        });
        stats.total = started.elapsed();
        probe!(parmark, gc_end, epoch);
        self.scheduler.on_gc_finish(epoch, &stats);
        self.stats.record(stats);
        self.state.finish(epoch);
    }
}

/// Handles of the GC threads.
pub struct GcThreads<VM: VMBinding> {
    context: Arc<GcContext<VM>>,
    main: Mutex<Option<JoinHandle<()>>>,
    auxiliary: Mutex<Vec<JoinHandle<()>>>,
}

impl<VM: VMBinding> GcThreads<VM> {
    /// Spawn the main GC thread and as many auxiliary threads as the dispatcher is configured
    /// for.
    pub fn start(context: Arc<GcContext<VM>>) -> io::Result<Self> {
        let threads = Self {
            context: context.clone(),
            main: Mutex::new(None),
            auxiliary: Mutex::new(Vec::new()),
        };
        threads.spawn_auxiliary(context.dispatcher.aux_gc_threads())?;
        let main = thread::Builder::new()
            .name("parmark-main".to_string())
            .spawn(move || context.main_loop())?;
        *threads.main.lock().unwrap() = Some(main);
        info!(
            "GC threads started: 1 main, {} auxiliary",
            threads.auxiliary_threads()
        );
        Ok(threads)
    }

    pub fn context(&self) -> &Arc<GcContext<VM>> {
        &self.context
    }

    pub fn auxiliary_threads(&self) -> usize {
        self.auxiliary.lock().unwrap().len()
    }

    /// Must be called between cycles, with no auxiliary thread of the current generation alive.
    fn spawn_auxiliary(&self, count: usize) -> io::Result<()> {
        let dispatcher = &self.context.dispatcher;
        let generation = dispatcher.aux_generation();
        // No epoch is recruiting: new threads join from the next one.
        let after = dispatcher.pacer().epoch();
        let mut auxiliary = self.auxiliary.lock().unwrap();
        for index in 0..count {
            let context = self.context.clone();
            let spawned = thread::Builder::new()
                .name(format!("parmark-aux-{}", index))
                .spawn(move || context.auxiliary_loop(generation, after));
            match spawned {
                Ok(handle) => auxiliary.push(handle),
                Err(e) => {
                    warn!("Failed to spawn auxiliary GC thread {}: {}", index, e);
                    dispatcher.reconfigure(index, dispatcher.mutators_cooperate());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Replace the auxiliary pool with `aux_gc_threads` fresh threads, and set whether mutators
    /// cooperate. Waits for the current cycle, if any, to finish.
    pub fn reconfigure(&self, aux_gc_threads: usize, mutators_cooperate: bool) -> io::Result<()> {
        let _cycle = self.context.cycle_lock.lock().unwrap();
        let dispatcher = &self.context.dispatcher;
        dispatcher.retire_auxiliary();
        self.join_auxiliary();
        dispatcher.reconfigure(aux_gc_threads, mutators_cooperate);
        self.spawn_auxiliary(aux_gc_threads)
    }

    fn join_auxiliary(&self) {
        let handles: Vec<_> = self.auxiliary.lock().unwrap().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("An auxiliary GC thread panicked");
            }
        }
    }

    pub fn schedule_and_wait_finished(&self) -> Epoch {
        let epoch = self.context.state.schedule();
        self.context.state.wait_epoch_finished(epoch);
        epoch
    }

    /// Only returns once the binding reports finalization of the epoch, or on shutdown.
    pub fn schedule_and_wait_finalized(&self) -> Epoch {
        let epoch = self.context.state.schedule();
        self.context.state.wait_epoch_finalized(epoch);
        epoch
    }

    /// Shut down and join every GC thread. A cycle in progress must be able to complete its
    /// stop-the-world request.
    pub fn stop(&self) {
        self.context.state.shutdown();
        self.context.dispatcher.request_shutdown();
        if let Some(main) = self.main.lock().unwrap().take() {
            if main.join().is_err() {
                warn!("The main GC thread panicked");
            }
        }
        self.join_auxiliary();
    }
}

impl<VM: VMBinding> Drop for GcThreads<VM> {
    fn drop(&mut self) {
        self.stop();
    }
}

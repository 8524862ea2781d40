//! The collector instance and its builder.

use crate::gc::{
    AllocationThresholdPolicy, EpochStats, GcContext, GcScheduler, GcSchedulerPolicy, GcThreads,
};
use crate::mark::Epoch;
use crate::util::options::Options;
use crate::vm::VMBinding;
use std::io;
use std::sync::Arc;

/// Configures and creates a [`ParMark`] instance.
pub struct ParMarkBuilder {
    /// The options for this instance.
    pub options: Options,
    policy: Option<Box<dyn GcSchedulerPolicy>>,
}

impl ParMarkBuilder {
    /// Create a builder with options from the `PARMARK_*` environment variables.
    pub fn new() -> Self {
        let mut builder = Self::new_no_env_vars();
        builder.options.read_env_var_settings();
        builder
    }

    /// Create a builder with default options, ignoring the environment.
    pub fn new_no_env_vars() -> Self {
        ParMarkBuilder {
            options: Options::default(),
            policy: None,
        }
    }

    /// Set an option. Returns `false` and keeps the current value if the option is unknown or the
    /// value is invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Set options from a whitespace separated list of `key=value` pairs, e.g.
    /// `"aux_gc_threads=3 mutators_cooperate=true"`. Returns `true` if all of them were set.
    pub fn set_options_bulk_by_str(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_command_line(options)
    }

    /// Use `policy` to decide when to collect. The default collects every
    /// `allocation_threshold` bytes.
    pub fn policy(&mut self, policy: Box<dyn GcSchedulerPolicy>) -> &mut Self {
        self.policy = Some(policy);
        self
    }

    /// Create the instance and start its GC threads.
    ///
    /// This attempts to initialize a logger. A runtime that wants its own logger should install it
    /// before calling this.
    ///
    /// Arguments:
    /// * `vm`: The runtime binding.
    pub fn build<VM: VMBinding>(self, vm: Arc<VM>) -> io::Result<ParMark<VM>> {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("parmark initialized the logger."),
            Err(_) => debug!(
                "parmark failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        let options = self.options;
        let policy = self.policy.unwrap_or_else(|| {
            Box::new(AllocationThresholdPolicy::new(options.allocation_threshold))
        });
        let context = Arc::new(GcContext::new(vm, &options, GcScheduler::new(policy)));
        let threads = GcThreads::start(context.clone())?;
        info!("Initialized parmark with {:?}", options);
        #[cfg(feature = "extreme_assertions")]
        warn!("The feature 'extreme_assertions' is enabled. parmark will run expensive run-time checks. Slow performance should be expected.");
        Ok(ParMark {
            options,
            context,
            threads,
        })
    }
}

impl Default for ParMarkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running collector. Dropping it shuts the GC threads down.
pub struct ParMark<VM: VMBinding> {
    options: Options,
    context: Arc<GcContext<VM>>,
    threads: GcThreads<VM>,
}

impl<VM: VMBinding> ParMark<VM> {
    pub fn vm(&self) -> &Arc<VM> {
        &self.context.vm
    }

    /// The options the instance was built with. Later reconfiguration is not reflected here.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Called by a mutator thread stopped at a GC safepoint. The runtime must count the thread
    /// as stopped before the call and until the thread leaves the safepoint.
    ///
    /// If mutators cooperate and a cycle is in progress, the thread waits for the cycle to open
    /// recruitment, then marks its own roots and helps with marking before returning. Otherwise
    /// it returns at once.
    ///
    /// Arguments:
    /// * `mutator`: The calling thread.
    pub fn safepoint(&self, mutator: &VM::Mutator) {
        let state = &self.context.state;
        let started = state.started();
        if started > state.finished() {
            self.context
                .dispatcher
                .run_on_stopped_mutator(started, mutator);
        }
    }

    /// Report an allocation to the scheduling policy. Returns the epoch requested, if the policy
    /// decided a collection is due.
    pub fn on_allocation(&self, bytes: usize) -> Option<Epoch> {
        self.context
            .scheduler
            .on_allocation(&self.context.state, bytes)
    }

    /// Request a collection without waiting for it.
    pub fn request_gc(&self) -> Epoch {
        self.context.scheduler.schedule_gc(&self.context.state)
    }

    /// Request a collection and block until it has finished (or shutdown).
    pub fn schedule_and_wait_finished(&self) -> Epoch {
        self.threads.schedule_and_wait_finished()
    }

    /// Request a collection and block until the finalizers of the objects it found dead have run.
    pub fn schedule_and_wait_finalized(&self) -> Epoch {
        self.threads.schedule_and_wait_finalized()
    }

    /// Called by the runtime when the finalizers scheduled for `epoch` have run.
    pub fn on_finalized(&self, epoch: Epoch) {
        self.context.state.finalized(epoch);
    }

    /// Change the number of auxiliary GC threads and whether mutators cooperate. Waits for the
    /// cycle in progress, if any.
    pub fn reconfigure(&self, aux_gc_threads: usize, mutators_cooperate: bool) -> io::Result<()> {
        self.threads.reconfigure(aux_gc_threads, mutators_cooperate)
    }

    pub fn aux_gc_threads(&self) -> usize {
        self.threads.auxiliary_threads()
    }

    pub fn last_epoch_stats(&self) -> Option<EpochStats> {
        self.context.stats.last()
    }

    pub fn epoch_stats(&self, epoch: Epoch) -> Option<EpochStats> {
        self.context.stats.get(epoch)
    }

    /// The last epoch that has finished.
    pub fn finished_epoch(&self) -> Epoch {
        self.context.state.finished()
    }

    /// Stop and join the GC threads. Waiting calls return; further requests are ignored.
    pub fn shutdown(&self) {
        self.threads.stop();
    }
}

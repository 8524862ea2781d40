use crate::mark::Epoch;
use crate::vm::VMBinding;

/// Safepoint and weak reference hooks. All methods are called from the main GC thread.
pub trait Collection<VM: VMBinding>: Send + Sync {
    /// Request every mutator to stop at a safepoint, and return once all of them have.
    ///
    /// A mutator reaching the safepoint may call
    /// [`ParMark::safepoint`](crate::ParMark::safepoint) to cooperate in marking. It must already
    /// be counted as stopped when it does, and stay counted until it leaves the safepoint.
    fn stop_the_world(&self, epoch: Epoch);

    /// Let the mutators stopped by `stop_the_world` continue.
    fn resume_the_world(&self, epoch: Epoch);

    /// Clear weak references to unmarked objects.
    fn process_weaks(&self, epoch: Epoch);

    /// Turn on the barriers that let mutators run while weak references are processed.
    fn enable_weak_barriers(&self, _epoch: Epoch) {}

    /// Turn the weak reference barriers off again. Called with the world stopped.
    fn disable_weak_barriers(&self, _epoch: Epoch) {}
}

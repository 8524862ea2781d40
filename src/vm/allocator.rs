use crate::mark::Epoch;
use crate::vm::VMBinding;

/// Heap hooks, called at fixed points of a cycle after marking has completed.
pub trait Allocator<VM: VMBinding>: Send + Sync {
    /// Objects found dead that need finalization, handed from `sweep` to
    /// `schedule_finalization`.
    type FinalizerQueue: Send;

    /// Get the heap ready for sweeping, e.g. by retiring thread-local allocation buffers.
    /// Called with the world stopped.
    fn prepare_for_gc(&self);

    /// Release external resources held by dead reference-counted objects. Called with the world
    /// stopped.
    fn free_reference_counted(&self) {}

    /// Reclaim every unmarked object, and clear the marks of the survivors. May run with the
    /// mutators resumed, depending on the `concurrent_sweep` option.
    fn sweep(&self, epoch: Epoch) -> Self::FinalizerQueue;

    /// Hand dead objects with finalizers over to the runtime's finalizer processing. The runtime
    /// reports completion through [`ParMark::on_finalized`](crate::ParMark::on_finalized).
    fn schedule_finalization(&self, queue: Self::FinalizerQueue, epoch: Epoch);
}

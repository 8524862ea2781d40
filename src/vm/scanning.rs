use crate::mark::ObjectQueue;
use crate::util::ObjectReference;
use crate::vm::VMBinding;

/// Tracing and root enumeration.
///
/// All methods report objects by calling [`ObjectQueue::enqueue`]. The queue filters objects
/// that are already marked, so reporting the same object twice is harmless.
pub trait Scanning<VM: VMBinding>: Send + Sync {
    /// Enqueue every object directly referenced by `object`. Called exactly once for each object
    /// marked in a cycle, possibly from several threads at once for different objects.
    fn process_in_mark<Q: ObjectQueue>(&self, queue: &mut Q, object: ObjectReference);

    /// Enqueue the thread-local roots of `mutator`: its stack and thread-local storage.
    /// The mutator is either suspended, or is the current thread.
    fn scan_thread_roots<Q: ObjectQueue>(&self, mutator: &VM::Mutator, queue: &mut Q);

    /// Enqueue the roots that do not belong to any thread, e.g. globals.
    fn scan_global_roots<Q: ObjectQueue>(&self, queue: &mut Q);
}

//! Parallel marking: per-thread work queues, the epoch pacer, and the dispatcher that spreads the
//! mark phase over the GC threads and cooperating mutators.

pub mod dispatcher;
pub mod pacer;
pub(crate) mod registry;
pub mod work_queue;

pub use self::dispatcher::{MarkDispatcher, MarkJob, MarkStats, MutatorsLock};
pub use self::pacer::{Epoch, EpochPacer, Phase};
pub use self::registry::MAX_REGISTRY_CAPACITY;
pub use self::work_queue::{SharedList, WorkQueue};

use crate::util::ObjectReference;

/// A sink for objects found while tracing or scanning roots.
pub trait ObjectQueue {
    /// Mark `object` and queue it for tracing, unless it is marked already.
    fn enqueue(&mut self, object: ObjectReference);
}

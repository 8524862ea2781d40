//! parmark-to-VM interface: the traits a language runtime implements so that the collector can
//! drive a cycle without knowing how objects, threads or memory are organized.
//!
//! A binding provides one [`VMBinding`] instance. Each concern lives behind its own trait:
//! [`Scanning`] for tracing and roots, [`Collection`] for stopping and resuming the world and
//! weak reference processing, [`Allocator`] for the heap hooks around sweep, and
//! [`ThreadRegistry`] for the set of mutator threads.

mod allocator;
mod collection;
mod scanning;
mod threads;

pub use self::allocator::Allocator;
pub use self::collection::Collection;
pub use self::scanning::Scanning;
pub use self::threads::{MutatorMarkState, MutatorThread, ThreadRegistry};

/// The `VMBinding` trait associates each interface trait with a concrete type and gives the
/// collector access to it.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync,
{
    /// A mutator thread known to the collector.
    type Mutator: MutatorThread;

    type VMScanning: Scanning<Self>;
    type VMCollection: Collection<Self>;
    type VMAllocator: Allocator<Self>;
    type VMThreadRegistry: ThreadRegistry<Self>;

    fn scanning(&self) -> &Self::VMScanning;
    fn collection(&self) -> &Self::VMCollection;
    fn allocator(&self) -> &Self::VMAllocator;
    fn threads(&self) -> &Self::VMThreadRegistry;
}

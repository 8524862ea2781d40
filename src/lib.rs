//! parmark is a parallel mark coordinator for stop-the-world tracing collectors.
//!
//! The runtime (the *binding*) owns the heap, the object layout and the mutator threads; parmark
//! owns the schedule of a collection cycle and the distribution of the mark phase over threads:
//!
//! * Every object starts with a [`GcHeader`](util::GcHeader). Its mark word doubles as the link
//!   of an intrusive work list, so marking an object and queueing it is a single CAS.
//! * Each marking thread owns a [`WorkQueue`](mark::WorkQueue): a private list and a shared
//!   list that other threads steal from.
//! * The [`MarkDispatcher`](mark::MarkDispatcher) recruits the main GC thread, auxiliary GC
//!   threads and (optionally) mutators stopped at a safepoint, balances work between them and
//!   detects global termination.
//! * The [`GcThreads`](gc::GcThreads) run the cycles: stop the world, mark, process weak
//!   references, sweep, resume, and schedule finalizers.
//!
//! A binding implements the traits in [`vm`], creates an instance with [`ParMarkBuilder`] and
//! calls [`ParMark::safepoint`] from mutators reaching a GC safepoint.

#[macro_use]
extern crate log;

mod parmark;
pub use crate::parmark::ParMark;
pub use crate::parmark::ParMarkBuilder;

pub mod gc;
pub mod mark;
pub mod util;
pub mod vm;

#[cfg(test)]
mod tests;

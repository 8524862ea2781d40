//! Collection cycles: when to collect, who collects, and what happened.

pub mod scheduler;
pub mod state;
pub mod stats;
pub mod threads;

pub use self::scheduler::{
    AllocationThresholdPolicy, GcScheduler, GcSchedulerPolicy, ManualPolicy,
};
pub use self::state::GcStateHolder;
pub use self::stats::{EpochStats, GcPhase, GcStats};
pub use self::threads::{GcContext, GcThreads};

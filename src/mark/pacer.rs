//! The phase state machine that paces one marking epoch.
//!
//! ```text
//!   Idle --begin_epoch--> Ready --begin_parallel_mark--> ParallelMark --finish_epoch--> Idle
//!     \__________________________ shutdown ___________________________________--> Shutdown
//! ```
//!
//! Only the dispatcher drives transitions, one at a time. Any number of threads may wait for
//! them; every transition wakes all waiters.

use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Identifier of one collection cycle. `0` means no cycle has been requested yet.
pub type Epoch = u64;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit, strum_macros::Display)]
pub enum Phase {
    /// No epoch in progress.
    Idle,
    /// Recruiting: workers may register and cooperating mutators may publish roots.
    Ready,
    /// Work distribution is open.
    ParallelMark,
    /// The runtime is tearing down. Absorbing.
    Shutdown,
}

struct PacerSync {
    phase: Phase,
    epoch: Epoch,
}

pub struct EpochPacer {
    sync: Mutex<PacerSync>,
    phase_changed: Condvar,
    /// Lock-free mirrors of `sync`, for quick checks on hot paths.
    phase: Atomic<Phase>,
    epoch: AtomicU64,
}

impl EpochPacer {
    pub fn new() -> Self {
        Self {
            sync: Mutex::new(PacerSync {
                phase: Phase::Idle,
                epoch: 0,
            }),
            phase_changed: Condvar::new(),
            phase: Atomic::new(Phase::Idle),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is(&self, phase: Phase) -> bool {
        self.phase() == phase
    }

    fn transition(&self, sync: &mut MutexGuard<PacerSync>, phase: Phase) {
        trace!(
            "Epoch {}: {} -> {}",
            sync.epoch,
            sync.phase,
            phase
        );
        sync.phase = phase;
        self.phase.store(phase, Ordering::Release);
        self.phase_changed.notify_all();
    }

    /// Idle -> Ready for a new epoch. Returns `false` if shutdown has been requested.
    pub fn begin_epoch(&self, epoch: Epoch) -> bool {
        let mut sync = self.sync.lock().unwrap();
        if sync.phase == Phase::Shutdown {
            return false;
        }
        assert_eq!(
            sync.phase,
            Phase::Idle,
            "beginning epoch {} while epoch {} is not finished",
            epoch,
            sync.epoch
        );
        assert!(
            epoch > sync.epoch,
            "epochs must increase: {} after {}",
            epoch,
            sync.epoch
        );
        sync.epoch = epoch;
        self.epoch.store(epoch, Ordering::Release);
        self.transition(&mut sync, Phase::Ready);
        true
    }

    /// Ready -> ParallelMark. `f` runs under the pacer lock right before the transition, so
    /// anything it reads cannot change through [`EpochPacer::with_ready`] afterwards.
    /// Returns `None` after shutdown.
    pub fn begin_parallel_mark<R>(&self, epoch: Epoch, f: impl FnOnce() -> R) -> Option<R> {
        let mut sync = self.sync.lock().unwrap();
        if sync.phase == Phase::Shutdown {
            return None;
        }
        assert!(
            sync.phase == Phase::Ready && sync.epoch == epoch,
            "starting parallel mark for epoch {} in {} (epoch {})",
            epoch,
            sync.phase,
            sync.epoch
        );
        let result = f();
        self.transition(&mut sync, Phase::ParallelMark);
        Some(result)
    }

    /// Run `f` under the pacer lock if, and only if, the pacer is Ready for `epoch`.
    pub fn with_ready<R>(&self, epoch: Epoch, f: impl FnOnce() -> R) -> Option<R> {
        let sync = self.sync.lock().unwrap();
        if sync.phase == Phase::Ready && sync.epoch == epoch {
            Some(f())
        } else {
            None
        }
    }

    /// Back to Idle at the end of `epoch`.
    pub fn finish_epoch(&self, epoch: Epoch) {
        let mut sync = self.sync.lock().unwrap();
        if sync.phase == Phase::Shutdown {
            return;
        }
        debug_assert_eq!(sync.epoch, epoch);
        self.transition(&mut sync, Phase::Idle);
    }

    pub fn shutdown(&self) {
        let mut sync = self.sync.lock().unwrap();
        self.transition(&mut sync, Phase::Shutdown);
    }

    /// Wake every waiter so it re-evaluates conditions kept outside the pacer.
    pub fn wake_all(&self) {
        let _sync = self.sync.lock().unwrap();
        self.phase_changed.notify_all();
    }

    /// Block until an epoch newer than `after` is recruiting (or already marking). Returns `None`
    /// on shutdown, or as soon as `stop()` holds; `stop` is re-checked after every wake-up.
    pub fn wait_epoch_ready(&self, after: Epoch, stop: impl Fn() -> bool) -> Option<Epoch> {
        let mut sync = self.sync.lock().unwrap();
        loop {
            if sync.phase == Phase::Shutdown || stop() {
                return None;
            }
            if matches!(sync.phase, Phase::Ready | Phase::ParallelMark) && sync.epoch > after {
                return Some(sync.epoch);
            }
            sync = self.phase_changed.wait(sync).unwrap();
        }
    }

    /// Block until `epoch` has begun. Returns `true` if it is recruiting, `false` if it is past
    /// recruitment, a later epoch started, or shutdown was requested.
    pub fn wait_epoch_begun(&self, epoch: Epoch) -> bool {
        let mut sync = self.sync.lock().unwrap();
        loop {
            match sync.phase {
                Phase::Shutdown => return false,
                _ if sync.epoch > epoch => return false,
                Phase::Ready if sync.epoch == epoch => return true,
                Phase::Idle if sync.epoch < epoch => {}
                _ => return false,
            }
            sync = self.phase_changed.wait(sync).unwrap();
        }
    }

    /// Block until `epoch` enters ParallelMark. Returns `false` if it never will: the epoch is
    /// over, a later one started, or shutdown was requested.
    pub fn wait_parallel_mark(&self, epoch: Epoch) -> bool {
        let mut sync = self.sync.lock().unwrap();
        loop {
            match sync.phase {
                Phase::Shutdown | Phase::Idle => return false,
                _ if sync.epoch != epoch => return false,
                Phase::ParallelMark => return true,
                Phase::Ready => {}
            }
            sync = self.phase_changed.wait(sync).unwrap();
        }
    }

    /// Block until `epoch` is over. Returns as soon as the pacer is Idle, has moved to a later
    /// epoch, or is shut down.
    pub fn wait_epoch_finished(&self, epoch: Epoch) {
        let mut sync = self.sync.lock().unwrap();
        while !(sync.phase == Phase::Idle || sync.phase == Phase::Shutdown || sync.epoch > epoch)
        {
            sync = self.phase_changed.wait(sync).unwrap();
        }
    }
}

impl Default for EpochPacer {
    fn default() -> Self {
        Self::new()
    }
}

//! Epoch bookkeeping shared between the threads that request collections and the main GC thread.

use crate::mark::Epoch;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Epochs {
    scheduled: Epoch,
    started: Epoch,
    finished: Epoch,
    finalized: Epoch,
    shutdown: bool,
}

/// Which epochs have been scheduled, started, finished and finalized.
///
/// All four only ever increase, and `scheduled >= started >= finished`. Requests made while an
/// epoch is scheduled but not started yet are merged into it.
#[derive(Default)]
pub struct GcStateHolder {
    epochs: Mutex<Epochs>,
    changed: Condvar,
}

impl GcStateHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a collection. Returns the epoch that will perform it.
    pub fn schedule(&self) -> Epoch {
        let mut epochs = self.epochs.lock().unwrap();
        if epochs.scheduled > epochs.started {
            return epochs.scheduled;
        }
        epochs.scheduled = epochs.started + 1;
        debug!("Scheduled epoch {}", epochs.scheduled);
        self.changed.notify_all();
        epochs.scheduled
    }

    /// Block until an epoch is scheduled that has not started. Returns `None` on shutdown.
    pub fn wait_scheduled(&self) -> Option<Epoch> {
        let mut epochs = self.epochs.lock().unwrap();
        loop {
            if epochs.shutdown {
                return None;
            }
            if epochs.scheduled > epochs.started {
                return Some(epochs.scheduled);
            }
            epochs = self.changed.wait(epochs).unwrap();
        }
    }

    pub fn start(&self, epoch: Epoch) {
        let mut epochs = self.epochs.lock().unwrap();
        debug_assert!(epoch > epochs.started && epoch <= epochs.scheduled);
        epochs.started = epoch;
        self.changed.notify_all();
    }

    pub fn finish(&self, epoch: Epoch) {
        let mut epochs = self.epochs.lock().unwrap();
        debug_assert!(epoch > epochs.finished && epoch <= epochs.started);
        epochs.finished = epoch;
        self.changed.notify_all();
    }

    /// Finalizers of `epoch` have run. Reports may come out of order; a report for an epoch
    /// covers all earlier ones.
    pub fn finalized(&self, epoch: Epoch) {
        let mut epochs = self.epochs.lock().unwrap();
        if epoch > epochs.finalized {
            epochs.finalized = epoch;
            self.changed.notify_all();
        }
    }

    /// Block until `epoch` has finished, or shutdown.
    pub fn wait_epoch_finished(&self, epoch: Epoch) {
        let mut epochs = self.epochs.lock().unwrap();
        while epochs.finished < epoch && !epochs.shutdown {
            epochs = self.changed.wait(epochs).unwrap();
        }
    }

    /// Block until finalizers of `epoch` have run, or shutdown.
    pub fn wait_epoch_finalized(&self, epoch: Epoch) {
        let mut epochs = self.epochs.lock().unwrap();
        while epochs.finalized < epoch && !epochs.shutdown {
            epochs = self.changed.wait(epochs).unwrap();
        }
    }

    pub fn shutdown(&self) {
        let mut epochs = self.epochs.lock().unwrap();
        epochs.shutdown = true;
        self.changed.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.epochs.lock().unwrap().shutdown
    }

    pub fn scheduled(&self) -> Epoch {
        self.epochs.lock().unwrap().scheduled
    }

    pub fn started(&self) -> Epoch {
        self.epochs.lock().unwrap().started
    }

    pub fn finished(&self) -> Epoch {
        self.epochs.lock().unwrap().finished
    }

    pub fn last_finalized(&self) -> Epoch {
        self.epochs.lock().unwrap().finalized
    }
}

use crate::mark::{Epoch, MarkStats};
use enum_map::{Enum, EnumMap};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Number of epochs whose statistics are kept.
pub const STATS_HISTORY: usize = 16;

/// The steps of a cycle on the main GC thread that are timed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, strum_macros::Display)]
pub enum GcPhase {
    StopTheWorld,
    Mark,
    WeakProcessing,
    PrepareHeap,
    Sweep,
    ResumeTheWorld,
    Finalization,
}

/// Statistics of one collection cycle.
#[derive(Clone, Debug)]
pub struct EpochStats {
    pub epoch: Epoch,
    pub mark: MarkStats,
    phase_times: EnumMap<GcPhase, Duration>,
    /// From the start of the cycle to the world being resumed.
    pub pause: Duration,
    pub total: Duration,
}

impl EpochStats {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            mark: MarkStats::default(),
            phase_times: EnumMap::default(),
            pause: Duration::ZERO,
            total: Duration::ZERO,
        }
    }

    /// Run `f`, adding its duration to `phase`.
    pub fn time<R>(&mut self, phase: GcPhase, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.phase_times[phase] += start.elapsed();
        result
    }

    pub fn phase_time(&self, phase: GcPhase) -> Duration {
        self.phase_times[phase]
    }

    pub fn phase_times(&self) -> impl Iterator<Item = (GcPhase, Duration)> + '_ {
        self.phase_times.iter().map(|(phase, time)| (phase, *time))
    }
}

/// Statistics of recent cycles.
#[derive(Default)]
pub struct GcStats {
    history: Mutex<VecDeque<EpochStats>>,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stats: EpochStats) {
        info!(
            "Epoch {} done: {} objects marked by {} jobs ({} cooperative), pause {:?}, total {:?}",
            stats.epoch,
            stats.mark.marked_objects,
            stats.mark.workers,
            stats.mark.cooperative_mutators,
            stats.pause,
            stats.total
        );
        for (phase, time) in stats.phase_times() {
            debug!("Epoch {}: {} took {:?}", stats.epoch, phase, time);
        }
        let mut history = self.history.lock().unwrap();
        if history.len() == STATS_HISTORY {
            history.pop_front();
        }
        history.push_back(stats);
    }

    pub fn last(&self) -> Option<EpochStats> {
        self.history.lock().unwrap().back().cloned()
    }

    pub fn get(&self, epoch: Epoch) -> Option<EpochStats> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .find(|stats| stats.epoch == epoch)
            .cloned()
    }

    /// Snapshot of the recorded epochs, oldest first.
    pub fn history(&self) -> Vec<EpochStats> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

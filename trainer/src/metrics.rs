use std::time::Duration;

/// Per-run phase timings and counters. Logged at the end of a run, never
/// persisted.
#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    /// Wall time spent advancing the simulation.
    pub sim_time: Duration,
    /// Wall time spent in reductions and optimizer steps.
    pub reduce_time: Duration,

    pub epochs: u64,
    pub batches: u64,
    pub trials: u64,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_epoch(&mut self) {
        self.epochs += 1;
    }

    #[inline]
    pub fn bump_batch(&mut self) {
        self.batches += 1;
    }

    #[inline]
    pub fn add_trials(&mut self, n: usize) {
        self.trials += n as u64;
    }

    #[inline]
    pub fn add_sim_time(&mut self, d: Duration) {
        self.sim_time += d;
    }

    #[inline]
    pub fn add_reduce_time(&mut self, d: Duration) {
        self.reduce_time += d;
    }
}

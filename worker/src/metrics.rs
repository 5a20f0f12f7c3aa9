use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub observe_time: Duration,
    pub sync_time: Duration,
    pub idle_time: Duration,

    pub steps: u64,
    pub deltas: u64,
    pub episodes: u64,
    pub reward: f64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn bump_delta(&mut self) {
        self.deltas += 1;
    }

    #[inline]
    pub fn add_episode(&mut self, reward: f32) {
        self.episodes += 1;
        self.reward += reward as f64;
    }

    /// The mean reward over every finished episode.
    pub fn mean_reward(&self) -> Option<f64> {
        (self.episodes > 0).then(|| self.reward / self.episodes as f64)
    }
}

use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use comms::specs::{PreprocessorSpec, RunSpec, StepScope};

/// Immutable execution bounds for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub episodes: usize,
    /// Agent timesteps per episode, `0` leaves episodes unbounded.
    pub max_timesteps: usize,
    pub repeat_actions: NonZeroUsize,
    pub preprocessor: Option<PreprocessorSpec>,
    pub global_steps: u64,
    pub step_scope: StepScope,
    pub log_dir: PathBuf,
    pub checkpoint_interval: Duration,
    pub poll_interval: Duration,
    pub init_timeout: Duration,
}

impl WorkerConfig {
    /// Creates a new worker configuration from the run's specification.
    ///
    /// # Arguments
    /// * `spec` - The specification shared by every process of the run.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn from_spec(spec: &RunSpec) -> Self {
        Self {
            episodes: spec.episodes,
            max_timesteps: spec.max_timesteps,
            repeat_actions: spec.repeat_actions,
            preprocessor: spec.preprocessor.clone(),
            global_steps: spec.global_steps,
            step_scope: spec.step_scope,
            log_dir: spec.log_dir.clone(),
            checkpoint_interval: spec.checkpoint_interval(),
            poll_interval: spec.poll_interval(),
            init_timeout: spec.init_timeout(),
        }
    }

    /// Whether `steps` reached the global step ceiling.
    pub fn ceiling_reached(&self, steps: u64) -> bool {
        steps >= self.global_steps
    }
}

use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use super::Topology;

/// Which step count is compared against the global step ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepScope {
    /// The shared counter, summed over every worker.
    #[default]
    Global,
    /// The increments made by this worker alone.
    Local,
}

/// The specification of a pure observation transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessorSpec {
    Scale { factor: f32 },
    Clip { low: f32, high: f32 },
    Normalize,
    Chain { specs: Vec<PreprocessorSpec> },
}

/// Everything a spawned process needs to take part in a run.
///
/// Written once by the coordinator and read by every process at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub topology: Topology,
    pub agent_type: String,
    #[serde(default)]
    pub agent_config: serde_json::Value,
    pub environment_type: String,
    pub environment: serde_json::Value,
    /// Episodes per worker, by default only the global step ceiling bounds a run.
    #[serde(default = "RunSpec::default_episodes")]
    pub episodes: usize,
    /// Agent timesteps per episode, `0` leaves episodes unbounded.
    #[serde(default)]
    pub max_timesteps: usize,
    #[serde(default = "RunSpec::default_repeat_actions")]
    pub repeat_actions: NonZeroUsize,
    #[serde(default)]
    pub preprocessor: Option<PreprocessorSpec>,
    #[serde(default = "RunSpec::default_global_steps")]
    pub global_steps: u64,
    #[serde(default)]
    pub step_scope: StepScope,
    #[serde(default = "RunSpec::default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "RunSpec::default_checkpoint_secs")]
    pub checkpoint_secs: u64,
    #[serde(default = "RunSpec::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "RunSpec::default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

impl RunSpec {
    pub const DEFAULT_GLOBAL_STEPS: u64 = 10_000_000;
    pub const DEFAULT_LOG_DIR: &'static str = "/tmp/train_logs";

    /// Creates a run bounded by the global step ceiling only, with every other
    /// setting at its default.
    pub fn new(
        topology: Topology,
        agent_type: impl Into<String>,
        environment_type: impl Into<String>,
        environment: serde_json::Value,
    ) -> Self {
        Self {
            topology,
            agent_type: agent_type.into(),
            agent_config: serde_json::Value::Null,
            environment_type: environment_type.into(),
            environment,
            episodes: Self::default_episodes(),
            max_timesteps: 0,
            repeat_actions: Self::default_repeat_actions(),
            preprocessor: None,
            global_steps: Self::default_global_steps(),
            step_scope: StepScope::default(),
            log_dir: Self::default_log_dir(),
            checkpoint_secs: Self::default_checkpoint_secs(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            init_timeout_secs: Self::default_init_timeout_secs(),
        }
    }

    fn default_episodes() -> usize {
        usize::MAX
    }

    fn default_repeat_actions() -> NonZeroUsize {
        NonZeroUsize::MIN
    }

    fn default_global_steps() -> u64 {
        Self::DEFAULT_GLOBAL_STEPS
    }

    fn default_log_dir() -> PathBuf {
        PathBuf::from(Self::DEFAULT_LOG_DIR)
    }

    fn default_checkpoint_secs() -> u64 {
        600
    }

    fn default_poll_interval_ms() -> u64 {
        100
    }

    fn default_init_timeout_secs() -> u64 {
        120
    }

    /// How often the leader writes a checkpoint while active.
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_secs)
    }

    /// The longest a worker waits on its stepping thread before re-checking stop conditions.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The longest a non leader waits for the shared state to be initialized.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

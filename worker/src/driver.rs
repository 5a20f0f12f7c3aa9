use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use comms::specs::StepScope;
use log::{info, trace};
use parking_lot::Mutex;
use tokio::{task, time};

use crate::{
    Agent, Result, WorkerConfig, WorkerErr,
    agent::Transition,
    metrics::WorkerMetrics,
    net::StepReport,
    runner::{RunnerHandle, Unit},
    session::Session,
    summary::EpisodeSummary,
};

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The counter selected by the step scope reached the ceiling.
    CeilingReached { steps: u64 },
    /// An operator raised the shared stop flag.
    StopRequested,
    /// The local stop token was cancelled.
    Cancelled,
    /// The stepping runner ran out of episodes.
    EpisodesExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CeilingReached { steps } => write!(f, "step ceiling reached at {steps}"),
            Self::StopRequested => write!(f, "stop requested"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::EpisodesExhausted => write!(f, "episodes exhausted"),
        }
    }
}

/// The outcome of a finished worker loop.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub reason: StopReason,
    /// The last global step value this worker observed.
    pub global_step: u64,
    /// The increments made by this worker.
    pub local_steps: u64,
    pub metrics: WorkerMetrics,
}

/// Interleaves the stepping runner with the shared global step.
///
/// Every transition goes through the agent, its proposed update is pushed to the
/// servers, fresh parameters are pulled back and then the global step is increased.
/// The stop conditions are re-checked at least once every poll interval, whether a
/// transition arrived or not.
pub struct WorkerLoop<A> {
    cfg: WorkerConfig,
    agent: Arc<Mutex<A>>,
    params: Vec<f32>,
    last: StepReport,
    local_steps: u64,
    metrics: WorkerMetrics,
}

impl<A: Agent> WorkerLoop<A> {
    pub fn new(cfg: WorkerConfig, agent: Arc<Mutex<A>>) -> Self {
        Self {
            cfg,
            agent,
            params: Vec::new(),
            last: StepReport::default(),
            local_steps: 0,
            metrics: WorkerMetrics::default(),
        }
    }

    /// Drives the session until a stop condition holds or the runner is done.
    ///
    /// # Arguments
    /// * `session` - The active session.
    /// * `runner` - The running stepping thread, it is joined before returning.
    /// * `stop` - The local stop token.
    ///
    /// # Errors
    /// Session failures, agent failures and failures inside the stepping thread.
    pub async fn run<S: Session>(
        mut self,
        session: &mut S,
        mut runner: RunnerHandle<A::Action>,
        stop: &AtomicBool,
    ) -> Result<LoopReport> {
        let outcome = self.drive(session, &mut runner, stop).await;
        let joined = runner.join().await;

        let reason = outcome?;
        joined?;

        info!(
            global_step = self.last.value,
            local_steps = self.local_steps;
            "worker loop finished: {reason}"
        );

        Ok(LoopReport {
            reason,
            global_step: self.last.value,
            local_steps: self.local_steps,
            metrics: self.metrics,
        })
    }

    async fn drive<S: Session>(
        &mut self,
        session: &mut S,
        runner: &mut RunnerHandle<A::Action>,
        stop: &AtomicBool,
    ) -> Result<StopReason> {
        self.last = session.read_global_step().await?;

        loop {
            if let Some(reason) = self.should_stop(stop) {
                return Ok(reason);
            }

            session.maybe_save().await?;

            let idle = Instant::now();
            let unit = match time::timeout(self.cfg.poll_interval, runner.next()).await {
                Ok(Some(unit)) => unit,
                Ok(None) => return Ok(StopReason::EpisodesExhausted),
                Err(_) => {
                    self.metrics.idle_time += idle.elapsed();
                    self.last = session.read_global_step().await?;
                    continue;
                }
            };

            match unit {
                Unit::Transition(transition) => self.step(session, transition).await?,
                Unit::EpisodeFinished {
                    episode,
                    timesteps,
                    reward,
                } => {
                    self.metrics.add_episode(reward);
                    let summary = EpisodeSummary {
                        episode,
                        timesteps,
                        reward,
                        global_step: self.last.value,
                    };
                    session.record_episode(&summary).await?;
                }
            }
        }
    }

    async fn step<S: Session>(
        &mut self,
        session: &mut S,
        transition: Transition<A::Action>,
    ) -> Result<()> {
        let start = Instant::now();
        let agent = Arc::clone(&self.agent);
        let delta = task::spawn_blocking(move || agent.lock().observe(&transition))
            .await
            .map_err(|e| WorkerErr::RunnerPanicked(e.to_string()))?
            .map_err(WorkerErr::Agent)?;
        self.metrics.observe_time += start.elapsed();

        let start = Instant::now();
        if let Some(delta) = delta {
            session.push_delta(&delta).await?;
            self.metrics.bump_delta();
        }

        session.pull_params(&mut self.params).await?;
        self.agent
            .lock()
            .load_params(&self.params)
            .map_err(WorkerErr::Agent)?;
        self.metrics.sync_time += start.elapsed();

        self.last = session.increment_global_step().await?;
        self.local_steps += 1;
        self.metrics.bump_step();

        trace!(global_step = self.last.value; "step done");
        Ok(())
    }

    fn should_stop(&self, stop: &AtomicBool) -> Option<StopReason> {
        if stop.load(Ordering::Acquire) {
            return Some(StopReason::Cancelled);
        }

        if self.last.stop {
            return Some(StopReason::StopRequested);
        }

        let steps = match self.cfg.step_scope {
            StepScope::Global => self.last.value,
            StepScope::Local => self.local_steps,
        };

        self.cfg
            .ceiling_reached(steps)
            .then_some(StopReason::CeilingReached { steps })
    }
}

use std::sync::{Arc, atomic::AtomicBool};

use comms::specs::{Identity, Role, RunSpec, Topology};
use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    Agent, Environment, Result, WorkerConfig, WorkerErr,
    driver::{LoopReport, StopReason, WorkerLoop},
    metrics::WorkerMetrics,
    runner::Runner,
    supervisor::Supervisor,
};

/// A single worker process: an agent, its private environment and the way to the
/// parameter servers.
pub struct Worker<A, E> {
    identity: Identity,
    topology: Topology,
    cfg: WorkerConfig,
    agent: A,
    env: E,
}

impl<A, E> Worker<A, E>
where
    A: Agent,
    E: Environment<Action = A::Action>,
{
    /// Creates a new worker.
    ///
    /// # Arguments
    /// * `identity` - This worker's identity, must be a worker one.
    /// * `topology` - The cluster's topology.
    /// * `cfg` - The worker's execution bounds.
    /// * `agent` - The agent, scoped to this worker.
    /// * `env` - This worker's own environment.
    ///
    /// # Errors
    /// A `Config` error if `identity` isn't a worker of `topology`.
    pub fn new(
        identity: Identity,
        topology: Topology,
        cfg: WorkerConfig,
        agent: A,
        env: E,
    ) -> Result<Self> {
        if identity.role != Role::Worker || topology.endpoint(identity).is_none() {
            return Err(WorkerErr::Config(format!(
                "{identity} is not a worker of the topology"
            )));
        }

        Ok(Self {
            identity,
            topology,
            cfg,
            agent,
            env,
        })
    }

    /// Builds the worker `index` of the run described by `spec`.
    ///
    /// The agent is built for this worker only and the environment is deserialized
    /// into a value no other worker shares.
    pub fn from_spec(spec: &RunSpec, index: usize) -> Result<Self> {
        let identity = Identity::new(Role::Worker, index);
        let agent = A::build(&spec.agent_config, identity).map_err(WorkerErr::Agent)?;
        let env = serde_json::from_value(spec.environment.clone()).map_err(|e| {
            WorkerErr::Config(format!(
                "invalid {} environment: {e}",
                spec.environment_type
            ))
        })?;

        Self::new(
            identity,
            spec.topology.clone(),
            WorkerConfig::from_spec(spec),
            agent,
            env,
        )
    }

    /// Runs the worker to completion.
    ///
    /// Connects the session, steps the environment until a stop condition holds and
    /// always closes the session, even when stepping failed.
    ///
    /// # Arguments
    /// * `stop` - The local stop token, observed within one poll interval.
    ///
    /// # Errors
    /// The first error among connecting, running and closing.
    pub async fn run(self, stop: Arc<AtomicBool>) -> Result<LoopReport> {
        let Self {
            identity,
            topology,
            cfg,
            mut agent,
            env,
        } = self;

        info!(identity:% = identity; "worker starting");

        let mut supervisor = Supervisor::new(identity, topology, cfg.clone());
        let Some(mut session) = supervisor.connect(&mut agent, &stop).await? else {
            info!(identity:% = identity; "worker stopped before the session became active");
            return Ok(LoopReport {
                reason: StopReason::Cancelled,
                global_step: 0,
                local_steps: 0,
                metrics: WorkerMetrics::default(),
            });
        };

        let agent = Arc::new(Mutex::new(agent));
        let runner = Runner::new(Arc::clone(&agent), env, &cfg).start();
        let outcome = WorkerLoop::new(cfg, agent)
            .run(&mut session, runner, &stop)
            .await;

        if let Err(e) = &outcome {
            warn!(identity:% = identity; "worker loop failed: {e}");
        }

        let closed = supervisor.stop(session).await;
        let report = outcome?;
        closed?;

        info!(
            identity:% = identity,
            global_step = report.global_step,
            episodes = report.metrics.episodes;
            "worker stopped: {}",
            report.reason
        );

        Ok(report)
    }
}

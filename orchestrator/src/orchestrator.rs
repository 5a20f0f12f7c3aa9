use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use comms::{
    ready,
    specs::{Identity, Role, RunSpec},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::{fs, time};

use crate::{
    OrchestratorError, Result,
    cluster::{Cluster, Slot},
    health::{RestartPolicy, SlotStatus},
    spawner::{ProcessHandle, Spawner},
};

/// How the orchestrator supervises the processes it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// The longest the parameter servers may take to report ready.
    pub ready_timeout_secs: u64,
    pub health_interval_ms: u64,
    pub restart: RestartPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 30,
            health_interval_ms: 500,
            restart: RestartPolicy::Never,
        }
    }
}

impl OrchestratorConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Starts one process per slot of the run's topology.
pub struct Orchestrator<S> {
    spec: RunSpec,
    run_dir: PathBuf,
    spawner: S,
    cfg: OrchestratorConfig,
}

impl<S: Spawner> Orchestrator<S> {
    /// The file every process reads the run specification from.
    pub const SPEC_FILE: &'static str = "run.json";

    /// Creates a new `Orchestrator`.
    ///
    /// # Arguments
    /// * `spec` - The run specification, carrying the cluster's topology.
    /// * `run_dir` - Where the specification and the readiness markers are written.
    /// * `spawner` - Starts the processes.
    ///
    /// # Returns
    /// A new `Orchestrator` instance with the default supervision settings.
    pub fn new(spec: RunSpec, run_dir: impl Into<PathBuf>, spawner: S) -> Self {
        Self {
            spec,
            run_dir: run_dir.into(),
            spawner,
            cfg: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: OrchestratorConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn spec_path(&self) -> PathBuf {
        self.run_dir.join(Self::SPEC_FILE)
    }

    /// Writes the run specification, starts every parameter server, waits until all
    /// of them are ready and then starts every worker.
    ///
    /// # Returns
    /// The running cluster.
    ///
    /// # Errors
    /// An invalid configuration, a failed spawn or parameter servers that don't get
    /// ready in time. Processes started so far are killed when the error is returned.
    pub async fn run(mut self) -> Result<Cluster<S>> {
        self.validate()?;

        let spec_path = self.spec_path();
        fs::create_dir_all(&self.run_dir).await?;
        fs::create_dir_all(&self.spec.log_dir).await?;

        let spec = serde_json::to_vec_pretty(&self.spec).map_err(io::Error::from)?;
        fs::write(&spec_path, spec).await?;
        ready::clear(&self.run_dir).await?;

        let topology = self.spec.topology.clone();
        info!(
            param_servers = topology.param_servers(),
            workers = topology.workers();
            "starting cluster from {}",
            spec_path.display()
        );

        let mut slots = Vec::with_capacity(topology.param_servers() + topology.workers());
        for identity in topology.identities().filter(|id| id.role == Role::ParameterServer) {
            slots.push(self.spawn(&spec_path, identity)?);
        }

        self.wait_ready(&mut slots).await?;

        for identity in topology.identities().filter(|id| id.role == Role::Worker) {
            slots.push(self.spawn(&spec_path, identity)?);
        }

        info!("all {} processes started", slots.len());

        Ok(Cluster::new(
            self.spawner,
            spec_path,
            topology,
            slots,
            self.cfg.restart,
            self.cfg.health_interval(),
        ))
    }

    fn validate(&self) -> Result<()> {
        let spec = &self.spec;

        if spec.global_steps == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "the global step ceiling must be positive".into(),
            ));
        }

        if spec.poll_interval_ms == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "the poll interval must be positive".into(),
            ));
        }

        if self.cfg.health_interval_ms == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "the health interval must be positive".into(),
            ));
        }

        Ok(())
    }

    fn spawn(&mut self, spec_path: &Path, identity: Identity) -> Result<Slot<S::Handle>> {
        let handle = self
            .spawner
            .spawn(spec_path, identity)
            .map_err(|source| OrchestratorError::SpawnFailed { identity, source })?;

        debug!(identity:% = identity; "started with pid {:?}", handle.id());
        Ok(Slot::new(identity, handle))
    }

    /// Polls the readiness markers of every parameter server.
    async fn wait_ready(&self, slots: &mut [Slot<S::Handle>]) -> Result<()> {
        let start = Instant::now();
        let timeout = self.cfg.ready_timeout();
        let interval = self.cfg.health_interval().min(Duration::from_millis(50));

        loop {
            let mut missing = Vec::new();
            for slot in slots.iter_mut() {
                if ready::is_ready(&self.run_dir, slot.identity()).await? {
                    continue;
                }

                if let Some(exit) = slot.handle_mut().try_wait()? {
                    let status = SlotStatus::from(exit);
                    return Err(OrchestratorError::ServerError(format!(
                        "{} {status} before getting ready",
                        slot.identity()
                    )));
                }

                missing.push(slot.identity());
            }

            if missing.is_empty() {
                info!(waited:? = start.elapsed(); "parameter servers ready");
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(OrchestratorError::ReadinessTimeout { missing, waited });
            }

            time::sleep(interval).await;
        }
    }
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use comms::specs::RunSpec;
use log::{info, warn};
use orchestrator::{Orchestrator, OrchestratorConfig, ProcessSpawner, RunReport, TopologyBuilder};
use serde::Deserialize;
use tokio::{signal, sync::oneshot};

use crate::registry;

const DEFAULT_RUN_DIR: &str = "/tmp/rl-orchestra";

/// Starts a whole run on this machine.
#[derive(Debug, Clone, Default, Args)]
pub struct LaunchArgs {
    /// A JSON launch configuration, flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub param_servers: Option<usize>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub base_port: Option<u16>,
    /// Where the run specification and readiness markers are written.
    #[arg(long)]
    pub run_dir: Option<PathBuf>,
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long)]
    pub environment: Option<String>,
    #[arg(long)]
    pub global_steps: Option<u64>,
}

/// The cluster's shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub param_servers: usize,
    pub workers: usize,
    pub host: String,
    pub base_port: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            param_servers: 1,
            workers: 2,
            host: TopologyBuilder::DEFAULT_HOST.to_string(),
            base_port: TopologyBuilder::DEFAULT_BASE_PORT,
        }
    }
}

/// The contents of a launch configuration file.
///
/// Every field besides `cluster`, `run_dir` and `orchestrator` is a field of the run
/// specification, which gets its topology from `cluster`.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default = "LaunchConfig::default_run_dir")]
    pub run_dir: PathBuf,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(flatten)]
    pub run: serde_json::Map<String, serde_json::Value>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let mut run = serde_json::Map::new();
        run.insert("agent_type".into(), "mean-reward".into());
        run.insert("environment_type".into(), "corridor".into());
        run.insert("environment".into(), serde_json::json!({}));

        Self {
            cluster: ClusterConfig::default(),
            run_dir: Self::default_run_dir(),
            orchestrator: OrchestratorConfig::default(),
            run,
        }
    }
}

impl LaunchConfig {
    fn default_run_dir() -> PathBuf {
        PathBuf::from(DEFAULT_RUN_DIR)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Reads the configuration file named by `args`, if any, and applies the flags.
    pub fn from_args(args: &LaunchArgs) -> anyhow::Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        let cluster = &mut cfg.cluster;
        cluster.param_servers = args.param_servers.unwrap_or(cluster.param_servers);
        cluster.workers = args.workers.unwrap_or(cluster.workers);
        cluster.base_port = args.base_port.unwrap_or(cluster.base_port);
        if let Some(host) = &args.host {
            cluster.host = host.clone();
        }

        if let Some(run_dir) = &args.run_dir {
            cfg.run_dir = run_dir.clone();
        }

        let overrides: [(&str, Option<serde_json::Value>); 4] = [
            ("agent_type", args.agent.clone().map(Into::into)),
            ("environment_type", args.environment.clone().map(Into::into)),
            ("global_steps", args.global_steps.map(Into::into)),
            (
                "log_dir",
                args.log_dir
                    .as_ref()
                    .map(|dir| dir.to_string_lossy().into_owned().into()),
            ),
        ];

        for (key, value) in overrides {
            if let Some(value) = value {
                cfg.run.insert(key.to_string(), value);
            }
        }

        Ok(cfg)
    }

    /// Builds the topology and the run specification every process reads.
    ///
    /// # Errors
    /// An invalid cluster shape, missing or malformed run fields, or agent and
    /// environment types the registry doesn't know.
    pub fn run_spec(&self) -> anyhow::Result<RunSpec> {
        let cluster = &self.cluster;
        let topology = TopologyBuilder::new(cluster.param_servers, cluster.workers)
            .host(cluster.host.clone())
            .base_port(cluster.base_port)
            .build()?;

        let mut run = self.run.clone();
        run.insert("topology".into(), serde_json::to_value(&topology)?);

        let spec: RunSpec =
            serde_json::from_value(run.into()).context("invalid run specification")?;
        registry::validate(&spec)?;
        Ok(spec)
    }
}

/// Runs the whole cluster until every worker is done.
///
/// Ctrl-C raises the shared stop flag so workers wind down and save.
pub async fn launch(args: LaunchArgs) -> anyhow::Result<RunReport> {
    let cfg = LaunchConfig::from_args(&args)?;
    let spec = cfg.run_spec()?;

    info!(
        param_servers = spec.topology.param_servers(),
        workers = spec.topology.workers(),
        global_steps = spec.global_steps;
        "launching {} on {}, logs in {}",
        spec.agent_type,
        spec.environment_type,
        spec.log_dir.display()
    );

    // Listen before spawning, an interrupt during startup is delivered once the cluster is up.
    let (interrupt_tx, interrupted) = oneshot::channel();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            let _ = interrupt_tx.send(());
        }
    });

    let spawner = ProcessSpawner::current_exe()?;
    let cluster = Orchestrator::new(spec, &cfg.run_dir, spawner)
        .with_config(cfg.orchestrator.clone())
        .run()
        .await?;

    let stopper = cluster.stop_handle();
    tokio::spawn(async move {
        if interrupted.await.is_ok() {
            info!("interrupted, asking workers to stop");
            if let Err(e) = stopper.stop().await {
                warn!("failed to request a stop: {e}");
            }
        }
    });

    Ok(cluster.wait().await?)
}

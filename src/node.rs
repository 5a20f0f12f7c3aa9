use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use clap::Args;
use comms::{
    ready,
    specs::{Identity, Role, RunSpec},
};
use log::{info, warn};
use parameter_server::ParameterServer;
use tokio::signal;

use crate::{logging, registry};

/// The entry point of every spawned process.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// The run specification written by the orchestrator.
    #[arg(long)]
    pub spec: PathBuf,
    /// `ps` or `worker`.
    #[arg(long)]
    pub role: Role,
    #[arg(long)]
    pub index: usize,
}

impl NodeArgs {
    pub fn identity(&self) -> Identity {
        Identity::new(self.role, self.index)
    }
}

/// Reads the run specification and plays the role of `args.identity()` in it.
///
/// Log output goes to `<log_dir>/<role>_<index>.out`.
pub async fn run(args: NodeArgs) -> anyhow::Result<()> {
    let spec = read_spec(&args.spec)?;
    let identity = args.identity();

    let log_path = spec.log_dir.join(format!("{identity}.out"));
    logging::init_file(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    info!(identity:% = identity; "starting from {}", args.spec.display());

    let run_dir = args.spec.parent().unwrap_or(Path::new("."));
    let res = match identity.role {
        Role::ParameterServer => serve(&spec, run_dir, identity).await,
        Role::Worker => work(&spec, identity).await,
    };

    if let Err(e) = &res {
        warn!(identity:% = identity; "exiting with error: {e:#}");
    }

    res
}

pub fn read_spec(path: &Path) -> anyhow::Result<RunSpec> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid run spec {}", path.display()))
}

/// Serves the parameter server's shard until the process is told to stop.
async fn serve(spec: &RunSpec, run_dir: &Path, identity: Identity) -> anyhow::Result<()> {
    let endpoint = spec
        .topology
        .endpoint(identity)
        .with_context(|| format!("{identity} is not part of the topology"))?;

    let server = ParameterServer::bind(endpoint.to_string(), identity)
        .await
        .with_context(|| format!("failed to bind {endpoint}"))?;

    let addr = server.local_addr()?;
    ready::publish(run_dir, identity, &addr.to_string()).await?;

    server
        .serve(async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Runs the worker, Ctrl-C cancels it within one poll interval.
async fn work(spec: &RunSpec, identity: Identity) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            flag.store(true, Ordering::Release);
        }
    });

    let report = registry::run_worker(spec, identity.index, stop).await?;
    info!(
        global_step = report.global_step,
        local_steps = report.local_steps,
        episodes = report.metrics.episodes;
        "done: {}",
        report.reason
    );

    Ok(())
}

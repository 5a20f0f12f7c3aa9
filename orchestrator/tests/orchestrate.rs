use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use comms::{
    ready,
    specs::{Endpoint, Identity, Role, RunSpec, Topology},
};
use orchestrator::{
    Exit, Orchestrator, OrchestratorConfig, OrchestratorError, ProcessHandle, RestartPolicy,
    SlotStatus, Spawner, TopologyBuilder,
};
use parameter_server::ParameterServer;
use tokio::sync::oneshot;

/// What a stubbed process does once started.
#[derive(Debug, Clone, Copy)]
enum Plan {
    /// Runs until killed.
    Serve,
    /// Exits after being polled `polls` times.
    ExitAfter { polls: u32, exit: Exit },
}

struct StubProcess {
    pid: u32,
    plan: Plan,
    polls: u32,
    killed: bool,
}

impl ProcessHandle for StubProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<Exit>> {
        if self.killed {
            return Ok(Some(Exit::Failure { code: None }));
        }

        self.polls += 1;
        match self.plan {
            Plan::ExitAfter { polls, exit } if self.polls >= polls => Ok(Some(exit)),
            _ => Ok(None),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed = true;
        Ok(())
    }
}

/// Records every spawn and publishes ready markers on behalf of parameter servers.
#[derive(Clone, Default)]
struct StubSpawner {
    spawned: Arc<Mutex<Vec<Identity>>>,
    plans: HashMap<Identity, Plan>,
    /// How many times a slot can be spawned before spawning it fails.
    spawn_limits: HashMap<Identity, usize>,
    servers_get_ready: bool,
}

impl StubSpawner {
    fn new() -> Self {
        Self {
            servers_get_ready: true,
            ..Default::default()
        }
    }

    fn plan(mut self, identity: Identity, plan: Plan) -> Self {
        self.plans.insert(identity, plan);
        self
    }

    fn spawn_limit(mut self, identity: Identity, limit: usize) -> Self {
        self.spawn_limits.insert(identity, limit);
        self
    }

    fn spawned(&self) -> Vec<Identity> {
        self.spawned.lock().unwrap().clone()
    }
}

impl Spawner for StubSpawner {
    type Handle = StubProcess;

    fn spawn(&mut self, spec_path: &Path, identity: Identity) -> io::Result<StubProcess> {
        let mut spawned = self.spawned.lock().unwrap();
        let previous = spawned.iter().filter(|id| **id == identity).count();
        spawned.push(identity);

        if self.spawn_limits.get(&identity).is_some_and(|limit| previous >= *limit) {
            return Err(io::Error::other(format!("cannot start {identity}")));
        }

        if identity.role == Role::ParameterServer && self.servers_get_ready {
            let run_dir = spec_path.parent().unwrap();
            let marker = ready::marker_path(run_dir, identity);
            std::fs::create_dir_all(marker.parent().unwrap())?;
            std::fs::write(marker, "127.0.0.1:0")?;
        }

        let plan = self.plans.get(&identity).copied().unwrap_or(match identity.role {
            Role::ParameterServer => Plan::Serve,
            Role::Worker => Plan::ExitAfter {
                polls: 2,
                exit: Exit::Success,
            },
        });

        Ok(StubProcess {
            pid: 1000 + spawned.len() as u32,
            plan,
            polls: 0,
            killed: false,
        })
    }
}

fn spec(topology: Topology, log_dir: &Path) -> RunSpec {
    let mut spec = RunSpec::new(
        topology,
        "random",
        "corridor",
        serde_json::json!({ "length": 4 }),
    );
    spec.log_dir = log_dir.to_path_buf();
    spec
}

fn fast() -> OrchestratorConfig {
    OrchestratorConfig {
        ready_timeout_secs: 1,
        health_interval_ms: 5,
        restart: RestartPolicy::Never,
    }
}

fn run_dir(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("run")
}

#[tokio::test]
async fn every_slot_is_spawned_servers_first() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(2, 3).build().unwrap();
    let spawner = StubSpawner::new();

    let cluster = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner.clone())
        .with_config(fast())
        .run()
        .await
        .unwrap();

    let spawned = spawner.spawned();
    assert_eq!(spawned.len(), 5);
    assert!(spawned[..2].iter().all(|id| id.role == Role::ParameterServer));
    assert!(spawned[2..].iter().all(|id| id.role == Role::Worker));

    assert_eq!(cluster.slots().len(), 5);
    assert_eq!(cluster.alive(), 5);
    assert!(cluster.slots().iter().all(|slot| slot.pid().is_some()));

    // Every process reads the same specification.
    let written = std::fs::read(run_dir(&dir).join(Orchestrator::<StubSpawner>::SPEC_FILE)).unwrap();
    let written: RunSpec = serde_json::from_slice(&written).unwrap();
    assert_eq!(written.topology.workers(), 3);

    let report = cluster.wait().await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.slots.len(), 5);
    assert!(
        report
            .slots
            .iter()
            .filter(|slot| slot.identity.role == Role::ParameterServer)
            .all(|slot| slot.status == SlotStatus::Terminated)
    );
}

#[tokio::test]
async fn workers_are_not_spawned_until_servers_are_ready() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(2, 2).build().unwrap();
    let mut spawner = StubSpawner::new();
    spawner.servers_get_ready = false;

    let res = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner.clone())
        .with_config(fast())
        .run()
        .await;

    match res {
        Err(OrchestratorError::ReadinessTimeout { missing, .. }) => assert_eq!(
            missing,
            [
                Identity::new(Role::ParameterServer, 0),
                Identity::new(Role::ParameterServer, 1)
            ]
        ),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("the run started without ready servers"),
    }

    assert!(spawner.spawned().iter().all(|id| id.role == Role::ParameterServer));
}

#[tokio::test]
async fn a_server_dying_before_getting_ready_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(1, 1).build().unwrap();
    let ps = Identity::new(Role::ParameterServer, 0);

    let mut spawner = StubSpawner::new().plan(
        ps,
        Plan::ExitAfter {
            polls: 1,
            exit: Exit::Failure { code: Some(101) },
        },
    );
    spawner.servers_get_ready = false;

    let res = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner)
        .with_config(fast())
        .run()
        .await;

    assert!(matches!(res, Err(OrchestratorError::ServerError(_))));
}

#[tokio::test]
async fn a_failed_worker_leaves_every_other_process_alive() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(2, 3).build().unwrap();
    let broken = Identity::new(Role::Worker, 1);

    let spawner = StubSpawner::new()
        .plan(Identity::new(Role::Worker, 0), Plan::Serve)
        .plan(Identity::new(Role::Worker, 2), Plan::Serve)
        .plan(
            broken,
            Plan::ExitAfter {
                polls: 1,
                exit: Exit::Failure { code: Some(1) },
            },
        );

    let mut cluster = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner)
        .with_config(fast())
        .run()
        .await
        .unwrap();

    cluster.poll().unwrap();
    cluster.poll().unwrap();

    for (identity, status) in cluster.statuses() {
        if identity == broken {
            assert_eq!(status, SlotStatus::Failed { code: Some(1) });
        } else {
            assert_eq!(status, SlotStatus::Running, "{identity}");
        }
    }
    assert_eq!(cluster.alive(), 4);
    assert!(!cluster.is_finished());
}

#[tokio::test]
async fn failed_workers_restart_at_most_max_restarts_times() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(1, 2).build().unwrap();
    let broken = Identity::new(Role::Worker, 1);

    let spawner = StubSpawner::new().plan(
        broken,
        Plan::ExitAfter {
            polls: 1,
            exit: Exit::Failure { code: Some(3) },
        },
    );

    let mut cfg = fast();
    cfg.restart = RestartPolicy::Bounded { max_restarts: 2 };

    let cluster = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner.clone())
        .with_config(cfg)
        .run()
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), cluster.wait())
        .await
        .unwrap()
        .unwrap();

    let slot = report
        .slots
        .iter()
        .find(|slot| slot.identity == broken)
        .unwrap();
    assert_eq!(slot.restarts, 2);
    assert_eq!(slot.status, SlotStatus::Failed { code: Some(3) });
    assert!(!report.succeeded());

    let spawns = spawner.spawned().iter().filter(|id| **id == broken).count();
    assert_eq!(spawns, 3);

    let healthy = report
        .slots
        .iter()
        .find(|slot| slot.identity == Identity::new(Role::Worker, 0))
        .unwrap();
    assert_eq!(healthy.status, SlotStatus::Exited);
    assert_eq!(healthy.restarts, 0);
}

#[tokio::test]
async fn restarts_that_cannot_be_spawned_only_fail_their_slot() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(1, 2).build().unwrap();
    let broken = Identity::new(Role::Worker, 1);

    let spawner = StubSpawner::new()
        .plan(
            broken,
            Plan::ExitAfter {
                polls: 1,
                exit: Exit::Failure { code: Some(3) },
            },
        )
        .spawn_limit(broken, 1);

    let mut cfg = fast();
    cfg.restart = RestartPolicy::Bounded { max_restarts: 2 };

    let cluster = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner.clone())
        .with_config(cfg)
        .run()
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), cluster.wait())
        .await
        .unwrap()
        .unwrap();

    let slot = report
        .slots
        .iter()
        .find(|slot| slot.identity == broken)
        .unwrap();
    assert_eq!(slot.restarts, 2);
    assert_eq!(slot.status, SlotStatus::Failed { code: None });

    let attempts = spawner.spawned().iter().filter(|id| **id == broken).count();
    assert_eq!(attempts, 3);

    let healthy = report
        .slots
        .iter()
        .find(|slot| slot.identity == Identity::new(Role::Worker, 0))
        .unwrap();
    assert_eq!(healthy.status, SlotStatus::Exited);

    let server = report
        .slots
        .iter()
        .find(|slot| slot.identity.role == Role::ParameterServer)
        .unwrap();
    assert_eq!(server.status, SlotStatus::Terminated);
}

#[tokio::test]
async fn invalid_runs_fail_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(1, 1).build().unwrap();
    let spawner = StubSpawner::new();

    let mut spec = spec(topology, dir.path());
    spec.global_steps = 0;

    let res = Orchestrator::new(spec, run_dir(&dir), spawner.clone())
        .run()
        .await;

    assert!(matches!(res, Err(OrchestratorError::InvalidConfig(_))));
    assert!(spawner.spawned().is_empty());
}

#[tokio::test]
async fn stopping_the_cluster_raises_the_shared_stop_flag() {
    let dir = tempfile::tempdir().unwrap();

    let server = ParameterServer::bind("127.0.0.1:0", Identity::new(Role::ParameterServer, 0))
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let state = server.state();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async {
        let _ = shutdown_rx.await;
    }));

    let topology = Topology::from_endpoints(
        vec![Endpoint::new("127.0.0.1", port)],
        vec![Endpoint::new("127.0.0.1", 1)],
    )
    .unwrap();

    let spawner = StubSpawner::new().plan(Identity::new(Role::Worker, 0), Plan::Serve);
    let cluster = Orchestrator::new(spec(topology, dir.path()), run_dir(&dir), spawner)
        .with_config(fast())
        .run()
        .await
        .unwrap();

    assert!(!state.status().stop);
    cluster.stop().await.unwrap();
    assert!(state.status().stop);

    shutdown_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();
}

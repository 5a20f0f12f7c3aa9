use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use comms::{
    msg::{Command, Msg},
    specs::{Endpoint, Identity, Role, Topology},
};
use log::{error, info, warn};
use tokio::{net::TcpStream, time};

use crate::{
    OrchestratorError, Result,
    health::{RestartPolicy, RunReport, SlotReport, SlotStatus},
    spawner::{ProcessHandle, Spawner},
};

/// How long terminated parameter servers get to go away before they're left behind.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A process of the cluster together with what's known about it.
pub struct Slot<H> {
    identity: Identity,
    handle: H,
    pid: Option<u32>,
    restarts: u32,
    status: SlotStatus,
}

impl<H: ProcessHandle> Slot<H> {
    pub(crate) fn new(identity: Identity, handle: H) -> Self {
        Self {
            identity,
            pid: handle.id(),
            handle,
            restarts: 0,
            status: SlotStatus::Running,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub(crate) fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    fn report(&self) -> SlotReport {
        SlotReport {
            identity: self.identity,
            pid: self.pid,
            restarts: self.restarts,
            status: self.status,
        }
    }
}

/// The running processes of a run, as left by `Orchestrator::run`.
pub struct Cluster<S: Spawner> {
    spawner: S,
    spec_path: PathBuf,
    topology: Topology,
    slots: Vec<Slot<S::Handle>>,
    restart: RestartPolicy,
    health_interval: Duration,
}

impl<S: Spawner> Cluster<S> {
    pub(crate) fn new(
        spawner: S,
        spec_path: PathBuf,
        topology: Topology,
        slots: Vec<Slot<S::Handle>>,
        restart: RestartPolicy,
        health_interval: Duration,
    ) -> Self {
        Self {
            spawner,
            spec_path,
            topology,
            slots,
            restart,
            health_interval,
        }
    }

    pub fn slots(&self) -> &[Slot<S::Handle>] {
        &self.slots
    }

    pub fn statuses(&self) -> Vec<(Identity, SlotStatus)> {
        self.slots
            .iter()
            .map(|slot| (slot.identity, slot.status))
            .collect()
    }

    /// Returns how many slots currently have a live process.
    pub fn alive(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.status == SlotStatus::Running)
            .count()
    }

    /// Whether every worker slot reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.slots
            .iter()
            .filter(|slot| slot.identity.role == Role::Worker)
            .all(|slot| slot.status.is_terminal())
    }

    /// Checks every slot without blocking, updating its status and restarting failed
    /// workers as the restart policy allows.
    ///
    /// A restart that cannot be spawned still counts against the slot's budget, once
    /// the budget is spent the slot is failed and the others keep being supervised.
    ///
    /// # Errors
    /// Failing to inspect a process.
    pub fn poll(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            match slot.status {
                SlotStatus::Restarting => {
                    slot.restarts += 1;
                    match self.spawner.spawn(&self.spec_path, slot.identity) {
                        Ok(handle) => {
                            slot.pid = handle.id();
                            slot.handle = handle;
                            slot.status = SlotStatus::Running;
                            info!(identity:% = slot.identity, restarts = slot.restarts; "restarted");
                        }
                        Err(e) if self.restart.allows(slot.restarts) => {
                            warn!(
                                identity:% = slot.identity,
                                restarts = slot.restarts;
                                "failed to restart: {e}"
                            );
                        }
                        Err(e) => {
                            error!(
                                identity:% = slot.identity,
                                restarts = slot.restarts;
                                "failed to restart: {e}, giving up"
                            );
                            slot.status = SlotStatus::Failed { code: None };
                        }
                    }
                }
                SlotStatus::Running => {
                    let Some(exit) = slot.handle.try_wait()? else {
                        continue;
                    };

                    slot.status = SlotStatus::from(exit);
                    match (slot.identity.role, slot.status) {
                        (_, SlotStatus::Exited) => info!(identity:% = slot.identity; "exited"),
                        (Role::Worker, status) if self.restart.allows(slot.restarts) => {
                            warn!(identity:% = slot.identity; "{status}, restarting");
                            slot.status = SlotStatus::Restarting;
                        }
                        (Role::Worker, status) => warn!(identity:% = slot.identity; "{status}"),
                        (Role::ParameterServer, status) => {
                            error!(identity:% = slot.identity; "{status}, its state is lost")
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Polls the cluster every health interval until all workers are done, then
    /// terminates the parameter servers.
    ///
    /// # Returns
    /// The run report, which is logged as well.
    pub async fn wait(mut self) -> Result<RunReport> {
        loop {
            self.poll()?;
            if self.is_finished() {
                break;
            }

            time::sleep(self.health_interval).await;
        }

        self.terminate_servers().await?;

        let report = RunReport {
            slots: self.slots.iter().map(Slot::report).collect(),
        };
        report.log();
        Ok(report)
    }

    /// Returns a handle raising the shared stop flag, usable while the cluster is awaited.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            counter: self.topology.endpoints(Role::ParameterServer)[0].clone(),
        }
    }

    /// Asks every worker to stop through the shared stop flag.
    pub async fn stop(&self) -> Result<()> {
        self.stop_handle().stop().await
    }

    async fn terminate_servers(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if slot.identity.role == Role::ParameterServer && !slot.status.is_terminal() {
                slot.handle.kill()?;
            }
        }

        let start = Instant::now();
        loop {
            let mut pending = 0;
            for slot in &mut self.slots {
                if slot.identity.role != Role::ParameterServer || slot.status.is_terminal() {
                    continue;
                }

                match slot.handle.try_wait()? {
                    Some(_) => slot.status = SlotStatus::Terminated,
                    None => pending += 1,
                }
            }

            if pending == 0 {
                return Ok(());
            }

            if start.elapsed() >= TERMINATE_GRACE {
                warn!("{pending} parameter server(s) still alive after {TERMINATE_GRACE:?}");
                return Ok(());
            }

            time::sleep(self.health_interval.min(Duration::from_millis(50))).await;
        }
    }
}

/// Raises the stop flag hosted by the first parameter server.
#[derive(Debug, Clone)]
pub struct StopHandle {
    counter: Endpoint,
}

impl StopHandle {
    pub async fn stop(&self) -> Result<()> {
        let addr = self.counter.to_string();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| OrchestratorError::ConnectionFailed {
                addr: addr.clone(),
                source,
            })?;

        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);
        let mut rx_buf: Vec<f32> = Vec::new();

        tx.send(&Msg::Control(Command::RequestStop)).await?;
        match rx.recv_into(&mut rx_buf).await? {
            Msg::Control(Command::Ack) => {}
            Msg::Err(detail) => return Err(OrchestratorError::ServerError(detail.into_owned())),
            other => {
                return Err(OrchestratorError::ServerError(format!(
                    "unexpected {} reply to a stop request",
                    other.kind()
                )));
            }
        }

        tx.send(&Msg::Control(Command::Disconnect)).await?;
        let _: Msg = rx.recv_into(&mut rx_buf).await?;

        info!("stop requested at {addr}");
        Ok(())
    }
}

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use comms::specs::{Identity, Role, Topology};
use log::{info, warn};
use tokio::{net::TcpStream, time};

use crate::{
    Agent, Result, WorkerConfig, WorkerErr,
    checkpoint::Checkpoint,
    net::PsClient,
    session::{ClusterSession, NetClient, Saver, ShardLayout},
    summary::SummaryWriter,
};

/// The lifecycle of a worker's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active,
    Stopping,
    Stopped,
}

impl SessionState {
    /// Moves to `next`, only the forward transitions of the lifecycle are allowed.
    ///
    /// A session may stop while still connecting, in which case it never becomes active.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        use SessionState::*;

        let valid = matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, Active)
                | (Connecting, Stopping)
                | (Active, Stopping)
                | (Stopping, Stopped)
        );

        if !valid {
            return Err(WorkerErr::InvalidTransition {
                from: *self,
                to: next,
            });
        }

        info!("session {:?} -> {:?}", *self, next);
        *self = next;
        Ok(())
    }
}

/// Manages the lifetime of a worker's session: connecting, initializing or attaching
/// to the shared state and tearing everything down.
pub struct Supervisor {
    identity: Identity,
    topology: Topology,
    cfg: WorkerConfig,
    state: SessionState,
}

impl Supervisor {
    pub fn new(identity: Identity, topology: Topology, cfg: WorkerConfig) -> Self {
        Self {
            identity,
            topology,
            cfg,
            state: SessionState::Disconnected,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.identity.is_leader()
    }

    /// Connects to every parameter server and prepares the shared state.
    ///
    /// The leader seeds the servers, restoring the checkpoint found in the log dir
    /// when there is one. Every other worker waits for the leader and attaches.
    /// In both cases `agent` ends up holding the shared parameters.
    ///
    /// # Arguments
    /// * `agent` - The worker's agent.
    /// * `stop` - The local stop token, a follower gives up waiting once it is set.
    ///
    /// # Returns
    /// The active session, or `None` if the stop token was set before the shared
    /// state was ready. The supervisor is then already stopped.
    ///
    /// # Errors
    /// Connection failures are not retried, they propagate to the caller.
    pub async fn connect<A: Agent>(
        &mut self,
        agent: &mut A,
        stop: &AtomicBool,
    ) -> Result<Option<ClusterSession>> {
        self.state.advance(SessionState::Connecting)?;

        let mut clients = Vec::with_capacity(self.topology.param_servers());
        let mut initialized = Vec::with_capacity(self.topology.param_servers());

        for (shard, endpoint) in self
            .topology
            .endpoints(Role::ParameterServer)
            .iter()
            .enumerate()
        {
            info!(shard = shard; "connecting to {endpoint}");
            let stream = TcpStream::connect(endpoint.to_string()).await?;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            let mut client = PsClient::new(shard, rx, tx);

            initialized.push(client.hello(self.identity).await?);
            clients.push(client);
        }

        let initial = agent.initial_params();
        let layout = ShardLayout::new(initial.len(), clients.len());

        if self.is_leader() {
            self.seed(&mut clients, &layout, &initialized, initial).await?;
        } else if !self.wait_initialized(&mut clients, stop).await? {
            self.abort(clients).await?;
            return Ok(None);
        }

        let mut params = Vec::with_capacity(layout.len());
        for client in &mut clients {
            client.pull_into(&mut params).await?;
        }

        if params.len() != layout.len() {
            return Err(WorkerErr::ParamsLengthMismatch {
                got: params.len(),
                expected: layout.len(),
            });
        }

        agent.load_params(&params).map_err(WorkerErr::Agent)?;

        let saver = self
            .is_leader()
            .then(|| Saver::new(self.cfg.log_dir.clone(), self.cfg.checkpoint_interval));
        let summaries = SummaryWriter::open(&self.cfg.log_dir, self.identity).await?;
        let session = ClusterSession::new(self.identity, clients, layout, saver, Some(summaries));

        self.state.advance(SessionState::Active)?;
        Ok(Some(session))
    }

    /// Tears the session down, flushing summaries and the leader's checkpoint.
    pub async fn stop(&mut self, session: ClusterSession) -> Result<()> {
        self.state.advance(SessionState::Stopping)?;
        let res = session.close().await;
        self.state.advance(SessionState::Stopped)?;
        res
    }

    /// Stops a session that never became active.
    async fn abort(&mut self, clients: Vec<NetClient>) -> Result<()> {
        self.state.advance(SessionState::Stopping)?;
        for mut client in clients {
            if let Err(e) = client.disconnect().await {
                warn!("failed to disconnect from parameter server {}: {e}", client.shard());
            }
        }
        self.state.advance(SessionState::Stopped)
    }

    /// Seeds every uninitialized server with its shard.
    async fn seed(
        &self,
        clients: &mut [NetClient],
        layout: &ShardLayout,
        initialized: &[bool],
        initial: Vec<f32>,
    ) -> Result<()> {
        if initialized.iter().all(|init| *init) {
            info!("shared state already initialized, attaching");
            return Ok(());
        }

        let checkpoint = match Checkpoint::load(&self.cfg.log_dir).await {
            Ok(checkpoint) => checkpoint,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
                ) =>
            {
                warn!(
                    "ignoring unreadable checkpoint {}: {e}",
                    Checkpoint::path(&self.cfg.log_dir).display()
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        let (global_step, params) = match checkpoint {
            Some(checkpoint) if checkpoint.params.len() == layout.len() => {
                info!(global_step = checkpoint.global_step; "restoring shared state from checkpoint");
                (checkpoint.global_step, checkpoint.params)
            }
            Some(checkpoint) => {
                warn!(
                    "ignoring checkpoint with {} params, the model has {}",
                    checkpoint.params.len(),
                    layout.len()
                );
                (0, initial)
            }
            None => {
                info!("initializing shared state from scratch");
                (0, initial)
            }
        };

        for (client, init) in clients.iter_mut().zip(initialized) {
            if !*init {
                let range = layout.range(client.shard());
                client.initialize(global_step, &params[range]).await?;
            }
        }

        Ok(())
    }

    /// Polls the servers until the leader initialized all of them.
    ///
    /// # Returns
    /// `false` if the stop token was set first.
    async fn wait_initialized(&self, clients: &mut [NetClient], stop: &AtomicBool) -> Result<bool> {
        let start = Instant::now();

        loop {
            if stop.load(Ordering::Acquire) {
                info!("stopped while waiting for the leader");
                return Ok(false);
            }

            let mut ready = true;
            for client in clients.iter_mut() {
                ready &= client.status().await?.initialized;
            }

            if ready {
                info!("shared state initialized by the leader, attaching");
                return Ok(true);
            }

            let waited = start.elapsed();
            if waited >= self.cfg.init_timeout {
                return Err(WorkerErr::InitTimeout { waited });
            }

            time::sleep(self.cfg.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut state = SessionState::Disconnected;
        state.advance(SessionState::Connecting).unwrap();
        state.advance(SessionState::Active).unwrap();

        let err = state.advance(SessionState::Connecting).unwrap_err();
        assert!(matches!(
            err,
            WorkerErr::InvalidTransition {
                from: SessionState::Active,
                to: SessionState::Connecting
            }
        ));

        state.advance(SessionState::Stopping).unwrap();
        state.advance(SessionState::Stopped).unwrap();
        assert_eq!(state, SessionState::Stopped);
    }

    #[test]
    fn lifecycle_can_stop_before_becoming_active() {
        let mut state = SessionState::Disconnected;
        state.advance(SessionState::Connecting).unwrap();
        state.advance(SessionState::Stopping).unwrap();
        state.advance(SessionState::Stopped).unwrap();
        assert!(state.advance(SessionState::Active).is_err());
    }

    #[test]
    fn lifecycle_cannot_skip_connecting() {
        let mut state = SessionState::Disconnected;
        assert!(state.advance(SessionState::Active).is_err());
        assert_eq!(state, SessionState::Disconnected);
    }
}

#![allow(dead_code)]

use std::{io, num::NonZeroUsize, path::Path, sync::Arc, time::Duration};

use comms::specs::{Endpoint, Identity, Role, StepScope, Topology};
use parameter_server::{ParameterServer, ServerState};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};
use worker::{Agent, BoxError, Environment, Step, Transition, WorkerConfig};

/// Proposes the same delta for every parameter after each transition.
#[derive(Debug)]
pub struct StepAgent {
    len: usize,
    delta: f32,
    pub params: Vec<f32>,
}

impl StepAgent {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            delta: 1.0,
            params: vec![0.0; len],
        }
    }
}

impl Agent for StepAgent {
    type Action = u8;

    fn build(config: &serde_json::Value, _identity: Identity) -> Result<Self, BoxError> {
        let len = config["params"].as_u64().ok_or("missing params")? as usize;
        let mut agent = Self::new(len);
        if let Some(delta) = config["delta"].as_f64() {
            agent.delta = delta as f32;
        }
        Ok(agent)
    }

    fn initial_params(&self) -> Vec<f32> {
        vec![0.0; self.len]
    }

    fn load_params(&mut self, params: &[f32]) -> Result<(), BoxError> {
        if params.len() != self.len {
            return Err(format!("expected {} params, got {}", self.len, params.len()).into());
        }
        self.params.clear();
        self.params.extend_from_slice(params);
        Ok(())
    }

    fn act(&mut self, _state: &[f32]) -> u8 {
        1
    }

    fn observe(&mut self, _transition: &Transition<u8>) -> Result<Option<Vec<f32>>, BoxError> {
        Ok(Some(vec![self.delta; self.len]))
    }
}

/// Walks forward until the end of a corridor, optionally breaking on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub len: usize,
    #[serde(default)]
    pub fail_at: Option<usize>,
    #[serde(default)]
    pub pos: usize,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Corridor {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            fail_at: None,
            pos: 0,
            delay_ms: 0,
        }
    }
}

impl Environment for Corridor {
    type Action = u8;

    fn reset(&mut self) -> Result<Vec<f32>, BoxError> {
        self.pos = 0;
        Ok(vec![0.0])
    }

    fn execute(&mut self, action: &u8) -> Result<Step, BoxError> {
        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }

        self.pos += *action as usize;
        if self.fail_at == Some(self.pos) {
            return Err(format!("corridor broke at {}", self.pos).into());
        }

        Ok(Step {
            state: vec![self.pos as f32],
            reward: 1.0,
            terminal: self.pos >= self.len,
        })
    }
}

pub fn config(log_dir: &Path, global_steps: u64) -> WorkerConfig {
    WorkerConfig {
        episodes: 1_000_000,
        max_timesteps: 0,
        repeat_actions: NonZeroUsize::MIN,
        preprocessor: None,
        global_steps,
        step_scope: StepScope::Global,
        log_dir: log_dir.to_path_buf(),
        checkpoint_interval: Duration::from_secs(600),
        poll_interval: Duration::from_millis(20),
        init_timeout: Duration::from_secs(5),
    }
}

/// Parameter servers serving on loopback for the duration of a test.
pub struct Cluster {
    pub topology: Topology,
    pub states: Vec<Arc<ServerState>>,
    shutdown: Vec<oneshot::Sender<()>>,
    serving: Vec<JoinHandle<parameter_server::Result<()>>>,
}

impl Cluster {
    pub async fn start(param_servers: usize, workers: usize) -> io::Result<Self> {
        let mut ps = Vec::new();
        let mut states = Vec::new();
        let mut shutdown = Vec::new();
        let mut serving = Vec::new();

        for index in 0..param_servers {
            let identity = Identity::new(Role::ParameterServer, index);
            let server = ParameterServer::bind("127.0.0.1:0", identity).await?;
            ps.push(Endpoint::new("127.0.0.1", server.local_addr()?.port()));
            states.push(server.state());

            let (tx, rx) = oneshot::channel::<()>();
            shutdown.push(tx);
            serving.push(tokio::spawn(server.serve(async {
                let _ = rx.await;
            })));
        }

        // Workers never listen, their endpoints only need to be unique.
        let worker = (1..=workers as u16)
            .map(|port| Endpoint::new("127.0.0.1", port))
            .collect();

        let topology = Topology::from_endpoints(ps, worker)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Ok(Self {
            topology,
            states,
            shutdown,
            serving,
        })
    }

    pub fn global_step(&self) -> u64 {
        self.states[0].read_step().unwrap().0
    }

    /// The full parameter vector, concatenated over every shard.
    pub fn params(&self) -> Vec<f32> {
        let mut params = Vec::new();
        let mut shard = Vec::new();
        for state in &self.states {
            state.pull(&mut shard).unwrap();
            params.extend_from_slice(&shard);
        }
        params
    }

    pub async fn shutdown(self) {
        for tx in self.shutdown {
            let _ = tx.send(());
        }
        for serving in self.serving {
            serving.await.unwrap().unwrap();
        }
    }
}

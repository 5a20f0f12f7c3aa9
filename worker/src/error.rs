use std::{error::Error, fmt, io, time::Duration};

use crate::supervisor::SessionState;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// The error type external collaborators (agents, environments) report with.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    /// A parameter server answered with an error message.
    Server {
        shard: usize,
        detail: String,
    },
    UnexpectedMessage {
        shard: usize,
        got: &'static str,
    },
    ParamsLengthMismatch {
        got: usize,
        expected: usize,
    },
    InitTimeout {
        waited: Duration,
    },
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    Agent(BoxError),
    Environment(BoxError),
    Config(String),
    RunnerPanicked(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Server { shard, detail } => {
                write!(f, "parameter server {shard} failed: {detail}")
            }
            WorkerErr::UnexpectedMessage { shard, got } => {
                write!(f, "unexpected message from parameter server {shard}: got {got}")
            }
            WorkerErr::ParamsLengthMismatch { got, expected } => {
                write!(f, "params length mismatch: got {got}, expected {expected}")
            }
            WorkerErr::InitTimeout { waited } => {
                write!(f, "shared state not initialized after {waited:?}")
            }
            WorkerErr::InvalidTransition { from, to } => {
                write!(f, "invalid session transition from {from:?} to {to:?}")
            }
            WorkerErr::Agent(e) => write!(f, "agent error: {e}"),
            WorkerErr::Environment(e) => write!(f, "environment error: {e}"),
            WorkerErr::Config(msg) => write!(f, "invalid config: {msg}"),
            WorkerErr::RunnerPanicked(msg) => write!(f, "stepping thread panicked: {msg}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Agent(e) | WorkerErr::Environment(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

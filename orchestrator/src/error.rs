use std::{fmt, io, time::Duration};

use comms::specs::{Identity, TopologyErr};

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before spawning anything.
    InvalidConfig(String),
    /// A process could not be started.
    SpawnFailed {
        identity: Identity,
        source: io::Error,
    },
    /// Some parameter servers never reported ready.
    ReadinessTimeout {
        missing: Vec<Identity>,
        waited: Duration,
    },
    /// Failed to reach a parameter server.
    ConnectionFailed { addr: String, source: io::Error },
    /// A parameter server answered with something unexpected.
    ServerError(String),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::SpawnFailed { identity, source } => {
                write!(f, "failed to spawn {identity}: {source}")
            }
            Self::ReadinessTimeout { missing, waited } => {
                let missing: Vec<_> = missing.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "{} not ready after {waited:?}",
                    missing.join(", ")
                )
            }
            Self::ConnectionFailed { addr, source } => {
                write!(f, "connection failed to {addr}: {source}")
            }
            Self::ServerError(msg) => write!(f, "server error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SpawnFailed { source, .. } | Self::ConnectionFailed { source, .. } => {
                Some(source)
            }
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<TopologyErr> for OrchestratorError {
    fn from(e: TopologyErr) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

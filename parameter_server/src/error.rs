use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The parameter server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Failures of a single request against the shared state.
///
/// These are reported back to the requesting worker and never stop the server.
#[derive(Debug, PartialEq, Eq)]
pub enum StateErr {
    AlreadyInitialized,
    NotInitialized,
    NoGlobalStep { shard: usize },
    SizeMismatch { got: usize, expected: usize },
}

impl Display for StateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateErr::AlreadyInitialized => f.write_str("shard was already initialized"),
            StateErr::NotInitialized => f.write_str("shard is not initialized yet"),
            StateErr::NoGlobalStep { shard } => {
                write!(f, "parameter server {shard} does not host the global step")
            }
            StateErr::SizeMismatch { got, expected } => {
                write!(f, "shard size mismatch: got {got}, expected {expected}")
            }
        }
    }
}

impl Error for StateErr {}

/// Parameter server runtime failures.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    UnexpectedMessage { peer: String, got: &'static str },
}

impl Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Io(e) => write!(f, "io error: {e}"),
            ServerErr::UnexpectedMessage { peer, got } => {
                write!(f, "unexpected message from {peer}: got {got}")
            }
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

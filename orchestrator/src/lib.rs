mod cluster;
mod error;
mod health;
mod orchestrator;
mod spawner;
mod topology;

pub use cluster::{Cluster, Slot, StopHandle};
pub use error::OrchestratorError;
pub use health::{RestartPolicy, RunReport, SlotReport, SlotStatus};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use spawner::{Exit, ProcessHandle, ProcessSpawner, Spawner};
pub use topology::TopologyBuilder;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

mod run;
mod topology;

pub use run::{PreprocessorSpec, RunSpec, StepScope};
pub use topology::{Endpoint, Identity, Role, Topology, TopologyErr};

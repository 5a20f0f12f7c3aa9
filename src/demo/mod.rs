//! Small agents and environments that make the binary runnable end to end.

mod agents;
mod corridor;

pub use agents::{MeanRewardAgent, RandomAgent};
pub use corridor::Corridor;

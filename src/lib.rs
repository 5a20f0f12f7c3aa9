pub mod demo;
pub mod launch;
pub mod logging;
pub mod node;
pub mod registry;

pub use launch::{LaunchArgs, LaunchConfig};
pub use node::NodeArgs;

mod error;
mod server;
mod state;

pub use error::{Result, ServerErr, StateErr};
pub use server::ParameterServer;
pub use state::ServerState;
mod test;

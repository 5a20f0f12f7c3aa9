pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod net;
pub mod preprocess;
pub mod runner;
pub mod session;
pub mod summary;
pub mod supervisor;
pub mod worker;

pub use agent::{Agent, Transition};
pub use config::WorkerConfig;
pub use driver::{LoopReport, StopReason, WorkerLoop};
pub use environment::{Environment, Step};
pub use error::{BoxError, Result, WorkerErr};
pub use session::{ClusterSession, Session, ShardLayout};
pub use supervisor::{SessionState, Supervisor};
pub use worker::Worker;

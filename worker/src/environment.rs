use serde::{Serialize, de::DeserializeOwned};

use crate::BoxError;

/// The outcome of executing one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: Vec<f32>,
    pub reward: f32,
    pub terminal: bool,
}

/// A simulation a worker steps through.
///
/// `Clone` must produce a fully independent copy, every worker steps its own one.
/// Environments travel to worker processes serialized inside the run specification.
pub trait Environment: Clone + Serialize + DeserializeOwned + Send + 'static {
    type Action;

    /// Starts a new episode and returns its first state.
    fn reset(&mut self) -> Result<Vec<f32>, BoxError>;

    fn execute(&mut self, action: &Self::Action) -> Result<Step, BoxError>;
}

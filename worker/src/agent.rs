use comms::specs::Identity;

use crate::BoxError;

/// One agent timestep, as handed from the stepping thread to the worker loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<A> {
    /// The preprocessed state the action was chosen for.
    pub state: Vec<f32>,
    pub action: A,
    /// The reward accumulated over every repetition of the action.
    pub reward: f32,
    pub terminal: bool,
    pub episode: usize,
    pub timestep: usize,
}

/// The learning side of a worker.
///
/// The model and its update rule live behind this trait, the worker only moves
/// parameters between the agent and the parameter servers.
pub trait Agent: Send + 'static {
    type Action: Clone + Send + 'static;

    /// Builds the agent scoped to a single worker, so its internals are distinct per process.
    ///
    /// # Arguments
    /// * `config` - The agent configuration shared by the whole run.
    /// * `identity` - The identity of the worker hosting the agent.
    fn build(config: &serde_json::Value, identity: Identity) -> Result<Self, BoxError>
    where
        Self: Sized;

    /// Returns freshly initialized parameters, the leader uses these to seed the servers.
    fn initial_params(&self) -> Vec<f32>;

    /// Replaces the agent's parameters with a copy of the shared ones.
    fn load_params(&mut self, params: &[f32]) -> Result<(), BoxError>;

    /// Chooses an action for a (preprocessed) state.
    fn act(&mut self, state: &[f32]) -> Self::Action;

    /// Learns from a single transition.
    ///
    /// # Returns
    /// An additive parameter update to propose to the servers, if any.
    fn observe(&mut self, transition: &Transition<Self::Action>)
    -> Result<Option<Vec<f32>>, BoxError>;
}

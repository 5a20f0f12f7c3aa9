use comms::specs::Identity;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use worker::{Agent, BoxError, Transition};

/// Configuration shared by the demo agents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DemoConfig {
    actions: usize,
    epsilon: f32,
    learning_rate: f32,
    seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            actions: 2,
            epsilon: 0.1,
            learning_rate: 0.1,
            seed: None,
        }
    }
}

impl DemoConfig {
    fn parse(config: &serde_json::Value) -> Result<Self, BoxError> {
        let cfg: Self = if config.is_null() {
            Self::default()
        } else {
            serde_json::from_value(config.clone())?
        };

        if cfg.actions == 0 {
            return Err("agents need at least one action".into());
        }

        Ok(cfg)
    }

    /// Every worker gets its own random stream, derived from the run's seed if any.
    fn rng(&self, identity: Identity) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(identity.index as u64)),
            None => StdRng::from_os_rng(),
        }
    }
}

/// Acts uniformly at random and never learns. Its parameters are only carried around.
#[derive(Debug)]
pub struct RandomAgent {
    actions: usize,
    params: Vec<f32>,
    rng: StdRng,
}

impl Agent for RandomAgent {
    type Action = usize;

    fn build(config: &serde_json::Value, identity: Identity) -> Result<Self, BoxError> {
        let cfg = DemoConfig::parse(config)?;
        Ok(Self {
            actions: cfg.actions,
            params: vec![0.0; cfg.actions],
            rng: cfg.rng(identity),
        })
    }

    fn initial_params(&self) -> Vec<f32> {
        vec![0.0; self.actions]
    }

    fn load_params(&mut self, params: &[f32]) -> Result<(), BoxError> {
        self.params.clear();
        self.params.extend_from_slice(params);
        Ok(())
    }

    fn act(&mut self, _state: &[f32]) -> usize {
        self.rng.random_range(0..self.actions)
    }

    fn observe(&mut self, _transition: &Transition<usize>) -> Result<Option<Vec<f32>>, BoxError> {
        Ok(None)
    }
}

/// An epsilon greedy bandit learner: its parameters are the mean reward estimate of
/// every action, shared by all workers.
#[derive(Debug)]
pub struct MeanRewardAgent {
    epsilon: f32,
    learning_rate: f32,
    values: Vec<f32>,
    rng: StdRng,
}

impl MeanRewardAgent {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn greedy(&self) -> usize {
        self.values
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(action, _)| action)
    }
}

impl Agent for MeanRewardAgent {
    type Action = usize;

    fn build(config: &serde_json::Value, identity: Identity) -> Result<Self, BoxError> {
        let cfg = DemoConfig::parse(config)?;
        Ok(Self {
            epsilon: cfg.epsilon,
            learning_rate: cfg.learning_rate,
            values: vec![0.0; cfg.actions],
            rng: cfg.rng(identity),
        })
    }

    fn initial_params(&self) -> Vec<f32> {
        vec![0.0; self.values.len()]
    }

    fn load_params(&mut self, params: &[f32]) -> Result<(), BoxError> {
        if params.len() != self.values.len() {
            return Err(format!(
                "expected {} action values, got {}",
                self.values.len(),
                params.len()
            )
            .into());
        }

        self.values.copy_from_slice(params);
        Ok(())
    }

    fn act(&mut self, _state: &[f32]) -> usize {
        if self.rng.random::<f32>() < self.epsilon {
            self.rng.random_range(0..self.values.len())
        } else {
            self.greedy()
        }
    }

    fn observe(&mut self, transition: &Transition<usize>) -> Result<Option<Vec<f32>>, BoxError> {
        let action = transition.action;
        let Some(value) = self.values.get(action) else {
            return Err(format!("action {action} out of range").into());
        };

        let mut delta = vec![0.0; self.values.len()];
        delta[action] = self.learning_rate * (transition.reward - value);
        Ok(Some(delta))
    }
}

use serde::{Deserialize, Serialize};
use worker::{BoxError, Environment, Step};

const LEFT: usize = 0;

/// A one dimensional corridor, episodes end when the agent reaches its far end.
///
/// Action `0` moves left, any other action moves right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    #[serde(default = "Corridor::default_length")]
    pub length: usize,
    /// Reward for every step that doesn't reach the end.
    #[serde(default = "Corridor::default_step_penalty")]
    pub step_penalty: f32,
    #[serde(skip)]
    pos: usize,
}

impl Corridor {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            step_penalty: Self::default_step_penalty(),
            pos: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn default_length() -> usize {
        10
    }

    fn default_step_penalty() -> f32 {
        -0.01
    }

    fn state(&self) -> Vec<f32> {
        vec![self.pos as f32, (self.length - self.pos) as f32]
    }
}

impl Environment for Corridor {
    type Action = usize;

    fn reset(&mut self) -> Result<Vec<f32>, BoxError> {
        if self.length == 0 {
            return Err("the corridor needs a positive length".into());
        }

        self.pos = 0;
        Ok(self.state())
    }

    fn execute(&mut self, action: &usize) -> Result<Step, BoxError> {
        if *action == LEFT {
            self.pos = self.pos.saturating_sub(1);
        } else {
            self.pos = (self.pos + 1).min(self.length);
        }

        let terminal = self.pos == self.length;
        Ok(Step {
            state: self.state(),
            reward: if terminal { 1.0 } else { self.step_penalty },
            terminal,
        })
    }
}

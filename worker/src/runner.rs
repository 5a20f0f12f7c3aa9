use std::{
    mem,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};

use crate::{
    Agent, Environment, Result, WorkerConfig, WorkerErr,
    agent::Transition,
    preprocess::{self, Preprocessor},
};

/// How many units the stepping thread may run ahead of the worker loop.
const UNIT_CAPACITY: usize = 1;

/// What the stepping thread hands over to the worker loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit<A> {
    Transition(Transition<A>),
    EpisodeFinished {
        episode: usize,
        timesteps: usize,
        reward: f32,
    },
}

/// Steps a private copy of the environment on a blocking thread.
pub struct Runner<A, E> {
    agent: Arc<Mutex<A>>,
    env: E,
    preprocessor: Option<Box<dyn Preprocessor>>,
    episodes: usize,
    max_timesteps: usize,
    repeat_actions: NonZeroUsize,
}

impl<A, E> Runner<A, E>
where
    A: Agent,
    E: Environment<Action = A::Action>,
{
    pub fn new(agent: Arc<Mutex<A>>, env: E, cfg: &WorkerConfig) -> Self {
        Self {
            agent,
            env,
            preprocessor: cfg.preprocessor.as_ref().map(preprocess::build),
            episodes: cfg.episodes,
            max_timesteps: cfg.max_timesteps,
            repeat_actions: cfg.repeat_actions,
        }
    }

    /// Moves the runner to tokio's blocking pool and starts stepping.
    ///
    /// # Returns
    /// A handle to receive the produced units and to stop the runner.
    pub fn start(self) -> RunnerHandle<A::Action> {
        let (tx, rx) = mpsc::channel(UNIT_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let join = task::spawn_blocking(move || self.run(&tx, &flag));

        RunnerHandle { rx, join, stop }
    }

    fn run(mut self, tx: &mpsc::Sender<Unit<A::Action>>, stop: &AtomicBool) -> Result<()> {
        for episode in 0..self.episodes {
            if stop.load(Ordering::Acquire) {
                break;
            }

            let Some((timesteps, reward)) = self.episode(episode, tx, stop)? else {
                debug!("stepping interrupted during episode {episode}");
                return Ok(());
            };

            let finished = Unit::EpisodeFinished {
                episode,
                timesteps,
                reward,
            };

            if tx.blocking_send(finished).is_err() {
                return Ok(());
            }
        }

        info!(episodes = self.episodes; "stepping finished");
        Ok(())
    }

    /// Runs a single episode.
    ///
    /// # Returns
    /// The number of timesteps and the total reward, or `None` if the episode was
    /// interrupted.
    fn episode(
        &mut self,
        episode: usize,
        tx: &mpsc::Sender<Unit<A::Action>>,
        stop: &AtomicBool,
    ) -> Result<Option<(usize, f32)>> {
        let state = self.env.reset().map_err(WorkerErr::Environment)?;
        let mut state = self.preprocess(state);
        let mut total = 0.0;
        let mut timestep = 0;

        while self.max_timesteps == 0 || timestep < self.max_timesteps {
            if stop.load(Ordering::Acquire) {
                return Ok(None);
            }

            let action = self.agent.lock().act(&state);
            let mut reward = 0.0;
            let mut terminal = false;
            let mut next = None;

            for _ in 0..self.repeat_actions.get() {
                let step = self.env.execute(&action).map_err(WorkerErr::Environment)?;
                reward += step.reward;
                next = Some(step.state);

                if step.terminal {
                    terminal = true;
                    break;
                }
            }

            timestep += 1;
            total += reward;

            let next = next.map_or_else(|| state.clone(), |next| self.preprocess(next));
            let transition = Transition {
                state: mem::replace(&mut state, next),
                action,
                reward,
                terminal,
                episode,
                timestep,
            };

            if tx.blocking_send(Unit::Transition(transition)).is_err() {
                return Ok(None);
            }

            if terminal {
                break;
            }
        }

        Ok(Some((timestep, total)))
    }

    fn preprocess(&self, state: Vec<f32>) -> Vec<f32> {
        match &self.preprocessor {
            Some(preprocessor) => preprocessor.process(&state),
            None => state,
        }
    }
}

/// The worker loop's end of a running stepping thread.
pub struct RunnerHandle<T> {
    rx: mpsc::Receiver<Unit<T>>,
    join: JoinHandle<Result<()>>,
    stop: Arc<AtomicBool>,
}

impl<T> RunnerHandle<T> {
    /// Waits for the next unit, `None` once the runner is done.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Unit<T>> {
        self.rx.recv().await
    }

    /// Asks the runner to stop before its next timestep.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops the runner and waits for its thread to finish.
    ///
    /// # Errors
    /// The error that ended stepping, if any.
    pub async fn join(self) -> Result<()> {
        self.stop();
        drop(self.rx);

        self.join
            .await
            .map_err(|e| WorkerErr::RunnerPanicked(e.to_string()))?
    }
}

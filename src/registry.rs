use std::{
    str::FromStr,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Context, bail};
use comms::specs::{Identity, Role, RunSpec};
use worker::{Agent, Environment, LoopReport, Worker};

use crate::demo::{Corridor, MeanRewardAgent, RandomAgent};

/// The agent types a run can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Random,
    MeanReward,
}

impl FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "mean-reward" => Ok(Self::MeanReward),
            other => bail!("unknown agent type {other}, expected `random` or `mean-reward`"),
        }
    }
}

/// The environment types a run can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Corridor,
}

impl FromStr for EnvironmentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corridor" => Ok(Self::Corridor),
            other => bail!("unknown environment type {other}, expected `corridor`"),
        }
    }
}

/// Checks that every worker of the run will be able to build its agent and environment.
pub fn validate(spec: &RunSpec) -> anyhow::Result<()> {
    let agent: AgentKind = spec.agent_type.parse()?;
    let env: EnvironmentKind = spec.environment_type.parse()?;

    match (agent, env) {
        (AgentKind::Random, EnvironmentKind::Corridor) => check::<RandomAgent, Corridor>(spec),
        (AgentKind::MeanReward, EnvironmentKind::Corridor) => {
            check::<MeanRewardAgent, Corridor>(spec)
        }
    }
}

/// Runs the worker `index` of the run with the agent and environment it names.
pub async fn run_worker(
    spec: &RunSpec,
    index: usize,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<LoopReport> {
    let agent: AgentKind = spec.agent_type.parse()?;
    let env: EnvironmentKind = spec.environment_type.parse()?;

    match (agent, env) {
        (AgentKind::Random, EnvironmentKind::Corridor) => {
            run::<RandomAgent, Corridor>(spec, index, stop).await
        }
        (AgentKind::MeanReward, EnvironmentKind::Corridor) => {
            run::<MeanRewardAgent, Corridor>(spec, index, stop).await
        }
    }
}

fn check<A, E>(spec: &RunSpec) -> anyhow::Result<()>
where
    A: Agent,
    E: Environment<Action = A::Action>,
{
    let identity = Identity::new(Role::Worker, 0);
    A::build(&spec.agent_config, identity)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("invalid {} agent config", spec.agent_type))?;

    serde_json::from_value::<E>(spec.environment.clone())
        .with_context(|| format!("invalid {} environment", spec.environment_type))?;

    Ok(())
}

async fn run<A, E>(spec: &RunSpec, index: usize, stop: Arc<AtomicBool>) -> anyhow::Result<LoopReport>
where
    A: Agent,
    E: Environment<Action = A::Action>,
{
    let worker = Worker::<A, E>::from_spec(spec, index)?;
    Ok(worker.run(stop).await?)
}

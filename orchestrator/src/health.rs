use std::fmt;

use comms::specs::{Identity, Role};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::spawner::Exit;

/// What the orchestrator last observed about a slot's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Running,
    /// Exited successfully.
    Exited,
    Failed { code: Option<i32> },
    /// Failed and waiting to be spawned again.
    Restarting,
    /// Terminated by the orchestrator at the end of the run.
    Terminated,
}

impl SlotStatus {
    /// Whether the slot will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed { .. } | Self::Terminated)
    }
}

impl From<Exit> for SlotStatus {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => Self::Exited,
            Exit::Failure { code } => Self::Failed { code },
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Failed { code: Some(code) } => write!(f, "failed ({code})"),
            Self::Failed { code: None } => write!(f, "failed (signal)"),
            Self::Restarting => write!(f, "restarting"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// What to do with a worker slot whose process failed.
///
/// Parameter servers are never restarted, their state lives in memory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Never,
    Bounded { max_restarts: u32 },
}

impl RestartPolicy {
    /// Whether a worker that already restarted `restarts` times may restart again.
    pub fn allows(&self, restarts: u32) -> bool {
        match self {
            Self::Never => false,
            Self::Bounded { max_restarts } => restarts < *max_restarts,
        }
    }
}

/// The final state of a single slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub identity: Identity,
    pub pid: Option<u32>,
    pub restarts: u32,
    pub status: SlotStatus,
}

/// The aggregated outcome of a run, one entry per slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub slots: Vec<SlotReport>,
}

impl RunReport {
    /// Whether every worker exited successfully.
    pub fn succeeded(&self) -> bool {
        self.workers().all(|slot| slot.status == SlotStatus::Exited)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SlotReport> {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.status, SlotStatus::Failed { .. }))
    }

    pub fn restarts(&self) -> u32 {
        self.slots.iter().map(|slot| slot.restarts).sum()
    }

    fn workers(&self) -> impl Iterator<Item = &SlotReport> {
        self.slots
            .iter()
            .filter(|slot| slot.identity.role == Role::Worker)
    }

    /// Logs the report, one line per slot and a summary line.
    pub fn log(&self) {
        for slot in &self.slots {
            let pid = slot.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string());
            match slot.status {
                SlotStatus::Failed { .. } => warn!(
                    identity:% = slot.identity,
                    restarts = slot.restarts;
                    "pid {pid}: {}", slot.status
                ),
                _ => info!(
                    identity:% = slot.identity,
                    restarts = slot.restarts;
                    "pid {pid}: {}", slot.status
                ),
            }
        }

        let workers = self.workers().count();
        let succeeded = self
            .workers()
            .filter(|slot| slot.status == SlotStatus::Exited)
            .count();

        info!(
            failed = self.failed().count(),
            restarts = self.restarts();
            "run finished: {succeeded}/{workers} workers succeeded"
        );
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} {:>8} {:>8}  status", "slot", "pid", "restarts")?;
        for slot in &self.slots {
            let pid = slot.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string());
            writeln!(
                f,
                "{:<12} {:>8} {:>8}  {}",
                slot.identity.to_string(),
                pid,
                slot.restarts,
                slot.status
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(role: Role, index: usize, status: SlotStatus) -> SlotReport {
        SlotReport {
            identity: Identity::new(role, index),
            pid: Some(100 + index as u32),
            restarts: 0,
            status,
        }
    }

    #[test]
    fn bounded_policy_counts_restarts() {
        let policy = RestartPolicy::Bounded { max_restarts: 2 };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!RestartPolicy::default().allows(0));
    }

    #[test]
    fn policies_read_from_json() {
        let policy: RestartPolicy =
            serde_json::from_str(r#"{"policy": "bounded", "max_restarts": 3}"#).unwrap();
        assert_eq!(policy, RestartPolicy::Bounded { max_restarts: 3 });
    }

    #[test]
    fn report_succeeds_only_if_every_worker_exited() {
        let mut report = RunReport {
            slots: vec![
                slot(Role::ParameterServer, 0, SlotStatus::Terminated),
                slot(Role::Worker, 0, SlotStatus::Exited),
                slot(Role::Worker, 1, SlotStatus::Exited),
            ],
        };
        assert!(report.succeeded());

        report.slots[2].status = SlotStatus::Failed { code: Some(1) };
        assert!(!report.succeeded());
        assert_eq!(report.failed().count(), 1);

        let table = report.to_string();
        assert!(table.contains("worker_1"));
        assert!(table.contains("failed (1)"));
    }
}

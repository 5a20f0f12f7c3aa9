use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use comms::specs::Identity;
use log::debug;
use tokio::process::{Child, Command};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// A non zero exit, `code` is `None` when a signal ended the process.
    Failure { code: Option<i32> },
}

impl Exit {
    pub fn success(&self) -> bool {
        matches!(self, Exit::Success)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Exit::Success
        } else {
            Exit::Failure {
                code: status.code(),
            }
        }
    }
}

/// A started process the orchestrator can inspect and terminate without blocking.
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Returns how the process ended, `None` while it's still running.
    fn try_wait(&mut self) -> io::Result<Option<Exit>>;

    /// Starts terminating the process, `try_wait` reports when it's gone.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts the process of a cluster slot.
pub trait Spawner {
    type Handle: ProcessHandle;

    /// Starts the process for `identity`.
    ///
    /// # Arguments
    /// * `spec_path` - The run specification every process reads at start.
    /// * `identity` - The slot to start.
    fn spawn(&mut self, spec_path: &Path, identity: Identity) -> io::Result<Self::Handle>;
}

/// Spawns slots as child processes of a binary with a `node` subcommand, by default
/// the currently running one.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-executes the running binary for every slot.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Adds an argument passed before the `node` subcommand.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self, spec_path: &Path, identity: Identity) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("node")
            .arg("--spec")
            .arg(spec_path)
            .arg("--role")
            .arg(identity.role.job_name())
            .arg("--index")
            .arg(identity.index.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // A terminal interrupt only reaches the launcher, which stops the run in order.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl Spawner for ProcessSpawner {
    type Handle = Child;

    fn spawn(&mut self, spec_path: &Path, identity: Identity) -> io::Result<Child> {
        let child = self.command(spec_path, identity).spawn()?;
        debug!(identity:% = identity; "spawned {} as pid {:?}", self.program.display(), child.id());
        Ok(child)
    }
}

impl ProcessHandle for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<Exit>> {
        Ok(Child::try_wait(self)?.map(Exit::from))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::Role;

    use super::*;

    #[test]
    fn slots_are_started_through_the_node_entry_point() {
        let spawner = ProcessSpawner::new("/usr/bin/rl-orchestra").arg("--quiet");
        let cmd = spawner.command(Path::new("/tmp/run/run.json"), Identity::new(Role::Worker, 3));

        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(
            args,
            [
                "--quiet",
                "node",
                "--spec",
                "/tmp/run/run.json",
                "--role",
                "worker",
                "--index",
                "3"
            ]
        );
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use comms::msg::ServerStatus;
use parking_lot::RwLock;

use crate::StateErr;

/// The state hosted by a single parameter server.
///
/// Every server holds one contiguous shard of the model parameters, only the
/// first one also hosts the global step counter and the stop flag.
#[derive(Debug)]
pub struct ServerState {
    shard: usize,
    global_step: AtomicU64,
    stop: AtomicBool,
    params: RwLock<Option<Vec<f32>>>,
}

impl ServerState {
    /// Creates a new, uninitialized `ServerState`.
    ///
    /// # Arguments
    /// * `shard` - The index of the parameter server owning this state.
    pub fn new(shard: usize) -> Self {
        Self {
            shard,
            global_step: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            params: RwLock::new(None),
        }
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn hosts_global_step(&self) -> bool {
        self.shard == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.params.read().is_some()
    }

    /// Atomically increments the global step and reads it back.
    ///
    /// # Arguments
    /// * `by` - The amount of steps to add.
    ///
    /// # Returns
    /// The value right after this increment together with the stop flag.
    pub fn increment(&self, by: u64) -> Result<(u64, bool), StateErr> {
        self.check_hosts_step()?;
        let value = self.global_step.fetch_add(by, Ordering::AcqRel) + by;
        Ok((value, self.stop.load(Ordering::Acquire)))
    }

    /// Reads the global step and the stop flag without modifying them.
    pub fn read_step(&self) -> Result<(u64, bool), StateErr> {
        self.check_hosts_step()?;
        Ok((
            self.global_step.load(Ordering::Acquire),
            self.stop.load(Ordering::Acquire),
        ))
    }

    /// Raises the stop flag, it stays raised for the rest of the run.
    pub fn request_stop(&self) -> Result<(), StateErr> {
        self.check_hosts_step()?;
        self.stop.store(true, Ordering::Release);
        Ok(())
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            initialized: self.is_initialized(),
            global_step: self
                .hosts_global_step()
                .then(|| self.global_step.load(Ordering::Acquire)),
            stop: self.stop.load(Ordering::Acquire),
        }
    }

    /// Sets the shard's parameters, this is done once per run by the leader.
    ///
    /// # Arguments
    /// * `global_step` - The step to resume counting from, ignored by servers not hosting it.
    /// * `params` - The initial parameters of this shard.
    ///
    /// # Returns
    /// `StateErr::AlreadyInitialized` if the shard was already set.
    pub fn initialize(&self, global_step: u64, params: &[f32]) -> Result<(), StateErr> {
        let mut guard = self.params.write();
        if guard.is_some() {
            return Err(StateErr::AlreadyInitialized);
        }

        if self.hosts_global_step() {
            self.global_step.store(global_step, Ordering::Release);
        }

        *guard = Some(params.to_vec());
        Ok(())
    }

    /// Copies the current parameters of the shard into `out`.
    pub fn pull(&self, out: &mut Vec<f32>) -> Result<(), StateErr> {
        let guard = self.params.read();
        let params = guard.as_ref().ok_or(StateErr::NotInitialized)?;
        out.clear();
        out.extend_from_slice(params);
        Ok(())
    }

    /// Adds `delta` to the shard's parameters.
    pub fn apply(&self, delta: &[f32]) -> Result<(), StateErr> {
        let mut guard = self.params.write();
        let params = guard.as_mut().ok_or(StateErr::NotInitialized)?;

        if params.len() != delta.len() {
            return Err(StateErr::SizeMismatch {
                got: delta.len(),
                expected: params.len(),
            });
        }

        params.iter_mut().zip(delta).for_each(|(p, d)| *p += d);
        Ok(())
    }

    fn check_hosts_step(&self) -> Result<(), StateErr> {
        if self.hosts_global_step() {
            Ok(())
        } else {
            Err(StateErr::NoGlobalStep { shard: self.shard })
        }
    }
}

use std::{
    ops::Range,
    path::PathBuf,
    time::{Duration, Instant},
};

use comms::specs::Identity;
use log::{debug, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::{
    Result, WorkerErr,
    checkpoint::Checkpoint,
    net::{PsClient, StepReport},
    summary::{EpisodeSummary, SummaryWriter},
};

pub(crate) type NetClient = PsClient<OwnedReadHalf, OwnedWriteHalf>;

/// Splits a flat parameter vector into one contiguous shard per parameter server.
///
/// The first `len % shards` shards hold one extra parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    ranges: Vec<Range<usize>>,
}

impl ShardLayout {
    pub fn new(len: usize, shards: usize) -> Self {
        let base = len / shards;
        let extra = len % shards;

        let mut start = 0;
        let ranges = (0..shards)
            .map(|i| {
                let size = base + usize::from(i < extra);
                let range = start..start + size;
                start += size;
                range
            })
            .collect();

        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.last().map(|r| r.end).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self, shard: usize) -> Range<usize> {
        self.ranges[shard].clone()
    }

    pub fn shards(&self) -> usize {
        self.ranges.len()
    }
}

/// The operations the worker loop needs from an active session.
#[async_trait::async_trait]
pub trait Session: Send {
    /// Atomically increments the global step by one and reads it back.
    async fn increment_global_step(&mut self) -> Result<StepReport>;

    /// Reads the global step without incrementing it.
    async fn read_global_step(&mut self) -> Result<StepReport>;

    /// Proposes an additive update of the shared parameters.
    async fn push_delta(&mut self, delta: &[f32]) -> Result<()>;

    /// Replaces `out` with the current shared parameters.
    async fn pull_params(&mut self, out: &mut Vec<f32>) -> Result<()>;

    /// Records a finished episode into the summary stream.
    async fn record_episode(&mut self, summary: &EpisodeSummary) -> Result<()>;

    /// Gives the session the chance to checkpoint, called once per loop iteration.
    async fn maybe_save(&mut self) -> Result<()>;
}

/// Saves checkpoints of the shared state at a fixed interval, only the leader owns one.
pub(crate) struct Saver {
    log_dir: PathBuf,
    interval: Duration,
    last_save: Instant,
}

impl Saver {
    pub(crate) fn new(log_dir: PathBuf, interval: Duration) -> Self {
        Self {
            log_dir,
            interval,
            last_save: Instant::now(),
        }
    }
}

/// The per worker handle on the cluster, created when connecting and consumed when closing.
///
/// It owns the connections to every parameter server, the checkpoint saver and the
/// summary stream.
pub struct ClusterSession {
    identity: Identity,
    clients: Vec<NetClient>,
    layout: ShardLayout,
    saver: Option<Saver>,
    summaries: Option<SummaryWriter>,
    last_step: u64,
}

impl ClusterSession {
    pub(crate) fn new(
        identity: Identity,
        clients: Vec<NetClient>,
        layout: ShardLayout,
        saver: Option<Saver>,
        summaries: Option<SummaryWriter>,
    ) -> Self {
        Self {
            identity,
            clients,
            layout,
            saver,
            summaries,
            last_step: 0,
        }
    }

    /// Pulls the shared state and writes it as a checkpoint, if this session saves any.
    pub async fn save_checkpoint(&mut self) -> Result<()> {
        if self.saver.is_none() {
            return Ok(());
        }

        let global_step = self.counter().read_step().await?.value;
        let mut params = Vec::with_capacity(self.layout.len());
        self.pull_params(&mut params).await?;

        let Some(saver) = self.saver.as_mut() else {
            return Ok(());
        };

        Checkpoint {
            global_step,
            params,
        }
        .save(&saver.log_dir)
        .await?;
        saver.last_save = Instant::now();

        info!(global_step = global_step; "checkpoint saved into {}", saver.log_dir.display());
        Ok(())
    }

    /// Flushes summaries, writes the final checkpoint and disconnects from every server.
    ///
    /// Every step is attempted even if a previous one failed, the first failure is returned.
    pub async fn close(mut self) -> Result<()> {
        let mut first_err = None;

        if let Some(summaries) = self.summaries.as_mut() {
            if let Err(e) = summaries.flush().await {
                warn!("failed to flush summaries: {e}");
                first_err.get_or_insert(WorkerErr::from(e));
            }
        }

        if let Err(e) = self.save_checkpoint().await {
            warn!("failed to save the final checkpoint: {e}");
            first_err.get_or_insert(e);
        }

        for client in &mut self.clients {
            if let Err(e) = client.disconnect().await {
                warn!("failed to disconnect from parameter server {}: {e}", client.shard());
                first_err.get_or_insert(e);
            }
        }

        debug!(identity:% = self.identity, last_step = self.last_step; "session closed");
        first_err.map_or(Ok(()), Err)
    }

    fn counter(&mut self) -> &mut NetClient {
        // Parameter server 0 always hosts the global step.
        &mut self.clients[0]
    }
}

#[async_trait::async_trait]
impl Session for ClusterSession {
    async fn increment_global_step(&mut self) -> Result<StepReport> {
        let report = self.counter().increment(1).await?;
        self.last_step = report.value;
        Ok(report)
    }

    async fn read_global_step(&mut self) -> Result<StepReport> {
        let report = self.counter().read_step().await?;
        self.last_step = report.value;
        Ok(report)
    }

    async fn push_delta(&mut self, delta: &[f32]) -> Result<()> {
        if delta.len() != self.layout.len() {
            return Err(WorkerErr::ParamsLengthMismatch {
                got: delta.len(),
                expected: self.layout.len(),
            });
        }

        for (shard, client) in self.clients.iter_mut().enumerate() {
            let range = self.layout.range(shard);
            if !range.is_empty() {
                client.push_delta(&delta[range]).await?;
            }
        }

        Ok(())
    }

    async fn pull_params(&mut self, out: &mut Vec<f32>) -> Result<()> {
        out.clear();
        for client in &mut self.clients {
            client.pull_into(out).await?;
        }

        if out.len() != self.layout.len() {
            return Err(WorkerErr::ParamsLengthMismatch {
                got: out.len(),
                expected: self.layout.len(),
            });
        }

        Ok(())
    }

    async fn record_episode(&mut self, summary: &EpisodeSummary) -> Result<()> {
        if let Some(summaries) = self.summaries.as_mut() {
            summaries.record(summary).await?;
        }

        Ok(())
    }

    async fn maybe_save(&mut self) -> Result<()> {
        let due = self
            .saver
            .as_ref()
            .is_some_and(|saver| saver.last_save.elapsed() >= saver.interval);

        if due {
            self.save_checkpoint().await?;
        }

        Ok(())
    }
}

use std::{
    io,
    path::{Path, PathBuf},
};

use comms::specs::Identity;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};

const SUMMARIES_DIR: &str = "summaries";

/// The record written for every finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub timesteps: usize,
    pub reward: f32,
    /// The global step right after the episode ended, filled in by the session.
    #[serde(default)]
    pub global_step: u64,
}

/// A buffered, append only stream of JSON lines, one per finished episode.
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl SummaryWriter {
    pub fn path(log_dir: &Path, identity: Identity) -> PathBuf {
        log_dir
            .join(SUMMARIES_DIR)
            .join(format!("{identity}.jsonl"))
    }

    /// Opens the summary stream of `identity` inside `log_dir`, appending to previous runs.
    pub async fn open(log_dir: &Path, identity: Identity) -> io::Result<Self> {
        let path = Self::path(log_dir, identity);
        fs::create_dir_all(log_dir.join(SUMMARIES_DIR)).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
            written: 0,
        })
    }

    pub async fn record(&mut self, summary: &EpisodeSummary) -> io::Result<()> {
        let mut line = serde_json::to_vec(summary)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        log::debug!("flushing {} summaries into {}", self.written, self.path.display());
        self.out.flush().await
    }
}

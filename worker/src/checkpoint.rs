use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// A snapshot of the shared state, saved by the leader and restored on the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub global_step: u64,
    pub params: Vec<f32>,
}

impl Checkpoint {
    pub fn path(log_dir: &Path) -> PathBuf {
        log_dir.join(CHECKPOINT_FILE)
    }

    /// Loads the checkpoint stored in `log_dir`, if there is one.
    pub async fn load(log_dir: &Path) -> io::Result<Option<Self>> {
        let bytes = match tokio::fs::read(Self::path(log_dir)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let checkpoint = serde_json::from_slice(&bytes)?;
        Ok(Some(checkpoint))
    }

    /// Saves the checkpoint into `log_dir`.
    ///
    /// The file is replaced atomically, readers never observe a partial checkpoint.
    pub async fn save(&self, log_dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(log_dir).await?;

        let path = Self::path(log_dir);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}

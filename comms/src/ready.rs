//! Readiness markers published by parameter servers once they accept connections.
//!
//! The orchestrator polls for these before spawning any worker.

use std::{
    io,
    path::{Path, PathBuf},
};

use crate::specs::Identity;

const READY_DIR: &str = "ready";

/// Returns where the marker of `identity` lives inside `run_dir`.
pub fn marker_path(run_dir: &Path, identity: Identity) -> PathBuf {
    run_dir.join(READY_DIR).join(identity.to_string())
}

/// Publishes the ready marker of `identity`, its content is the bound address.
///
/// # Arguments
/// * `run_dir` - The directory shared with the orchestrator.
/// * `identity` - The identity of the ready process.
/// * `addr` - The address the process is listening at.
///
/// # Returns
/// The path of the written marker or an io error if failed to do so.
pub async fn publish(run_dir: &Path, identity: Identity, addr: &str) -> io::Result<PathBuf> {
    let path = marker_path(run_dir, identity);
    tokio::fs::create_dir_all(run_dir.join(READY_DIR)).await?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, addr).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

/// Checks whether the marker of `identity` was already published.
pub async fn is_ready(run_dir: &Path, identity: Identity) -> io::Result<bool> {
    tokio::fs::try_exists(marker_path(run_dir, identity)).await
}

/// Removes every marker so a new run doesn't observe stale ones.
pub async fn clear(run_dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(run_dir.join(READY_DIR)).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

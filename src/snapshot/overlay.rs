//! The `overlay` backend (§4.4): Linux-only, kernel overlayfs with a fresh
//! upperdir per clone. Feature-detected via `/proc/filesystems` at selector
//! time (§4.4 backend selection).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result, SnapshotError};
use crate::executor::CommandRunner;
use crate::types::{Capabilities, CloneResult};

use super::SnapshotManager;

/// Returns true if the running kernel advertises overlayfs support.
pub async fn is_supported() -> bool {
    tokio::fs::read_to_string("/proc/filesystems")
        .await
        .is_ok_and(|contents| contents.lines().any(|l| l.trim_end().ends_with("overlay")))
}

/// Overlayfs-backed snapshot backend.
#[derive(Debug)]
pub struct OverlayBackend<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> OverlayBackend<R> {
    /// Creates an overlay backend driven by `runner`.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    async fn mount_merged(&self, src: &Path, dest: &Path, read_only: bool, cancel: &CancellationToken) -> Result<PathBuf> {
        let upper = dest.join("upper");
        let work = dest.join("work");
        let merged = dest.join("merged");
        for dir in [&upper, &work, &merged] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| SnapshotError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
        }

        let opts = if read_only {
            format!("lowerdir={},ro", src.display())
        } else {
            format!(
                "lowerdir={},upperdir={},workdir={}",
                src.display(),
                upper.display(),
                work.display()
            )
        };
        let args = vec![
            "-t".to_string(),
            "overlay".to_string(),
            "overlay".to_string(),
            "-o".to_string(),
            opts,
            merged.display().to_string(),
        ];
        self.runner.run("mount", &args, None, cancel).await.map_err(|err| match err {
            Error::Command(cmd) => SnapshotError::Io {
                path: merged.display().to_string(),
                source: std::io::Error::other(cmd.to_string()),
            }
            .into(),
            other => other,
        })?;
        Ok(merged)
    }
}

#[async_trait]
impl<R: CommandRunner> SnapshotManager for OverlayBackend<R> {
    fn kind(&self) -> &'static str {
        "overlay"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_db_stop: false,
            supports_writable_clone: true,
            supports_send_receive: false,
        }
    }

    async fn clone_dir(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<CloneResult> {
        let merged = self.mount_merged(src, dest, false, cancel).await?;
        let dest_owned = dest.to_path_buf();
        Ok(CloneResult {
            mount_dir: merged,
            cleanup: Box::new(move || unmount_and_remove(&dest_owned)),
        })
    }

    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        self.mount_merged(src, dest, true, cancel).await?;
        Ok(())
    }

    async fn destroy(&self, path: &Path, _cancel: &CancellationToken) -> Result<()> {
        unmount_and_remove(path)
    }
}

fn unmount_and_remove(dest: &Path) -> Result<()> {
    let merged = dest.join("merged");
    if merged.exists() {
        let _ = std::process::Command::new("umount").arg(&merged).status();
    }
    match std::fs::remove_dir_all(dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SnapshotError::Io {
            path: dest.display().to_string(),
            source: err,
        }
        .into()),
    }
}

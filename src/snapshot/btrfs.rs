//! The `btrfs` backend (§4.4): Linux-only, subvolume snapshot/delete.
//! Feature-detected against the state-store path at selector time: only
//! available when that path is itself backed by btrfs.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result, SnapshotError};
use crate::executor::CommandRunner;
use crate::types::{Capabilities, CloneResult};

use super::SnapshotManager;

/// Returns true if `path` is mounted on a btrfs filesystem.
pub async fn is_supported_at<R: CommandRunner>(runner: &R, path: &Path, cancel: &CancellationToken) -> bool {
    let args = vec!["-n".to_string(), "-o".to_string(), "FSTYPE".to_string(), "-T".to_string(), path.display().to_string()];
    runner
        .run("findmnt", &args, None, cancel)
        .await
        .is_ok_and(|out| out.combined.lines().next().unwrap_or("").trim() == "btrfs")
}

/// Btrfs subvolume-backed snapshot backend.
#[derive(Debug)]
pub struct BtrfsBackend<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> BtrfsBackend<R> {
    /// Creates a btrfs backend driven by `runner`.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    async fn subvolume_snapshot(&self, src: &Path, dest: &Path, read_only: bool, cancel: &CancellationToken) -> Result<()> {
        let mut args = vec!["subvolume".to_string(), "snapshot".to_string()];
        if read_only {
            args.push("-r".to_string());
        }
        args.push(src.display().to_string());
        args.push(dest.display().to_string());
        self.runner.run("btrfs", &args, None, cancel).await.map_err(|err| match err {
            Error::Command(cmd) => SnapshotError::Io {
                path: dest.display().to_string(),
                source: std::io::Error::other(cmd.to_string()),
            }
            .into(),
            other => other,
        })?;
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> SnapshotManager for BtrfsBackend<R> {
    fn kind(&self) -> &'static str {
        "btrfs"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_db_stop: false,
            supports_writable_clone: true,
            supports_send_receive: true,
        }
    }

    async fn clone_dir(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<CloneResult> {
        self.subvolume_snapshot(src, dest, false, cancel).await?;
        let dest_owned = dest.to_path_buf();
        Ok(CloneResult {
            mount_dir: dest_owned.clone(),
            cleanup: Box::new(move || delete_subvolume(&dest_owned)),
        })
    }

    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        self.subvolume_snapshot(src, dest, true, cancel).await
    }

    async fn destroy(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        self.runner
            .run(
                "btrfs",
                &["subvolume".to_string(), "delete".to_string(), path.display().to_string()],
                None,
                cancel,
            )
            .await
            .map(|_| ())
            .map_err(|err| match err {
                Error::Command(cmd) => SnapshotError::Io {
                    path: path.display().to_string(),
                    source: std::io::Error::other(cmd.to_string()),
                }
                .into(),
                other => other,
            })
    }
}

fn delete_subvolume(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let status = std::process::Command::new("btrfs")
        .args(["subvolume", "delete"])
        .arg(path)
        .status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(SnapshotError::Io {
            path: path.display().to_string(),
            source: std::io::Error::other(format!("btrfs subvolume delete exited with {status}")),
        }
        .into()),
        Err(err) => Err(SnapshotError::Io {
            path: path.display().to_string(),
            source: err,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn is_supported_at_checks_fstype() {
        let runner = ScriptedRunner::new(vec![Ok("btrfs\n".to_string())]);
        assert!(is_supported_at(&runner, Path::new("/store"), &CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn is_supported_at_rejects_other_fstypes() {
        let runner = ScriptedRunner::new(vec![Ok("ext4\n".to_string())]);
        assert!(!is_supported_at(&runner, Path::new("/store"), &CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_on_missing_path() {
        let runner = ScriptedRunner::new(vec![]);
        let backend = BtrfsBackend::new(runner);
        backend
            .destroy(Path::new("/nonexistent/never"), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clone_runs_snapshot_without_readonly_flag() {
        let runner = ScriptedRunner::new(vec![Ok(String::new())]);
        let backend = BtrfsBackend::new(runner);
        backend
            .clone_dir(Path::new("/src"), Path::new("/dest"), &CancellationToken::new())
            .await
            .unwrap();
        let calls = backend.runner.calls();
        assert!(!calls[0].1.contains(&"-r".to_string()));
    }

    #[tokio::test]
    async fn snapshot_includes_readonly_flag() {
        let runner = ScriptedRunner::new(vec![Ok(String::new())]);
        let backend = BtrfsBackend::new(runner);
        backend
            .snapshot(Path::new("/src"), Path::new("/dest"), &CancellationToken::new())
            .await
            .unwrap();
        let calls = backend.runner.calls();
        assert!(calls[0].1.contains(&"-r".to_string()));
    }
}

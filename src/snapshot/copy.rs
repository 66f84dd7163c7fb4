//! The `copy` backend (§4.4): always available, structure-preserving
//! directory copy. Preserves file modes, reproduces symlinks without
//! dereferencing, and refuses to run when the destination is the source or
//! nested beneath it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{CommandError, Result, SnapshotError};
use crate::types::{Capabilities, CloneResult};

use super::SnapshotManager;

/// Directory-copy snapshot backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyBackend;

impl CopyBackend {
    /// Creates a copy backend.
    #[must_use] 
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SnapshotManager for CopyBackend {
    fn kind(&self) -> &'static str {
        "copy"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_db_stop: true,
            supports_writable_clone: true,
            supports_send_receive: false,
        }
    }

    async fn clone_dir(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<CloneResult> {
        copy_tree_checked(src, dest, cancel).await?;
        let dest_owned = dest.to_path_buf();
        Ok(CloneResult {
            mount_dir: dest_owned.clone(),
            cleanup: Box::new(move || remove_dir_idempotent(&dest_owned)),
        })
    }

    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        copy_tree_checked(src, dest, cancel).await
    }

    async fn destroy(&self, path: &Path, _cancel: &CancellationToken) -> Result<()> {
        remove_dir_idempotent(path)
    }
}

fn remove_dir_idempotent(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SnapshotError::Io {
            path: path.display().to_string(),
            source: err,
        }
        .into()),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

async fn copy_tree_checked(src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    let src_abs = absolutize(src);
    let dest_abs = absolutize(dest);
    if dest_abs == src_abs || dest_abs.starts_with(&src_abs) {
        return Err(SnapshotError::DestinationContainment {
            src: src_abs.display().to_string(),
            dest: dest_abs.display().to_string(),
        }
        .into());
    }

    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|_| SnapshotError::InvalidSource(src.display().to_string()))?;
    if !meta.is_dir() {
        return Err(SnapshotError::InvalidSource(src.display().to_string()).into());
    }

    copy_tree(src, dest, cancel).await
}

fn copy_tree<'a>(
    src: &'a Path,
    dest: &'a Path,
    cancel: &'a CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                program: "snapshot-copy".to_string(),
            }
            .into());
        }

        let meta = tokio::fs::symlink_metadata(src)
            .await
            .map_err(|e| io_err(src, e))?;
        tokio::fs::create_dir_all(dest).await.map_err(|e| io_err(dest, e))?;
        set_mode(dest, &meta).await?;

        let mut entries = tokio::fs::read_dir(src).await.map_err(|e| io_err(src, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(src, e))? {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled {
                    program: "snapshot-copy".to_string(),
                }
                .into());
            }
            let file_type = entry.file_type().await.map_err(|e| io_err(&entry.path(), e))?;
            let child_src = entry.path();
            let child_dest = dest.join(entry.file_name());

            if file_type.is_symlink() {
                let target = tokio::fs::read_link(&child_src).await.map_err(|e| io_err(&child_src, e))?;
                symlink(&target, &child_dest).await.map_err(|e| io_err(&child_dest, e))?;
            } else if file_type.is_dir() {
                copy_tree(&child_src, &child_dest, cancel).await?;
            } else {
                tokio::fs::copy(&child_src, &child_dest).await.map_err(|e| io_err(&child_src, e))?;
                let child_meta = entry.metadata().await.map_err(|e| io_err(&child_src, e))?;
                set_mode(&child_dest, &child_meta).await?;
            }
        }
        Ok(())
    })
}

fn io_err(path: &Path, source: std::io::Error) -> crate::errors::Error {
    SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
    .into()
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::copy(target, link).await.map(|_| ())
}

#[cfg(unix)]
async fn set_mode(path: &Path, meta: &std::fs::Metadata) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(meta.permissions().mode());
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _meta: &std::fs::Metadata) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_preserves_symlinks_without_following() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let dest_path = dest.path().join("clone");
        tokio::fs::write(src.path().join("real.txt"), b"hi").await.unwrap();
        #[cfg(unix)]
        tokio::fs::symlink("real.txt", src.path().join("link.txt")).await.unwrap();

        let backend = CopyBackend::new();
        let result = backend
            .clone_dir(src.path(), &dest_path, &CancellationToken::new())
            .await
            .unwrap();

        #[cfg(unix)]
        {
            let link_meta = tokio::fs::symlink_metadata(result.mount_dir.join("link.txt")).await.unwrap();
            assert!(link_meta.file_type().is_symlink());
            let target = tokio::fs::read_link(result.mount_dir.join("link.txt")).await.unwrap();
            assert_eq!(target, Path::new("real.txt"));
        }
    }

    #[tokio::test]
    async fn clone_fails_when_dest_nested_under_src() {
        let src = tempfile::tempdir().unwrap();
        let dest = src.path().join("nested");
        let backend = CopyBackend::new();
        let err = backend
            .clone_dir(src.path(), &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Snapshot(SnapshotError::DestinationContainment { .. })
        ));
    }

    #[tokio::test]
    async fn clone_fails_when_dest_equals_src() {
        let src = tempfile::tempdir().unwrap();
        let backend = CopyBackend::new();
        let err = backend
            .clone_dir(src.path(), src.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Snapshot(SnapshotError::DestinationContainment { .. })
        ));
    }

    #[tokio::test]
    async fn clone_fails_on_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notadir");
        tokio::fs::write(&file, b"x").await.unwrap();
        let dest = dir.path().join("dest");
        let backend = CopyBackend::new();
        let err = backend.clone_dir(&file, &dest, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Snapshot(SnapshotError::InvalidSource(_))
        ));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_on_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-existed");
        let backend = CopyBackend::new();
        backend.destroy(&missing, &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_the_clone() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let dest_path = dest.path().join("clone");
        tokio::fs::write(src.path().join("a.txt"), b"hi").await.unwrap();
        let backend = CopyBackend::new();
        let result = backend
            .clone_dir(src.path(), &dest_path, &CancellationToken::new())
            .await
            .unwrap();
        (result.cleanup)().unwrap();
        assert!(!dest_path.exists());
    }
}

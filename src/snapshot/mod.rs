//! `SnapshotManager` (§4.4): pluggable backends for cloning and snapshotting
//! a PGDATA directory, chosen by explicit selector or auto-probe.

pub mod btrfs;
pub mod copy;
pub mod overlay;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::executor::CommandRunner;
use crate::types::{Capabilities, CloneResult};

/// A pluggable PGDATA snapshot backend.
#[async_trait]
pub trait SnapshotManager: Send + Sync {
    /// The backend's identifier, e.g. `"copy"`, `"overlay"`, `"btrfs"`.
    fn kind(&self) -> &'static str;

    /// The capability set this backend advertises.
    fn capabilities(&self) -> Capabilities;

    /// Produces a writable clone of `src` at `dest`.
    async fn clone_dir(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<CloneResult>;

    /// Produces a (backend-appropriate) snapshot of `src` at `dest`.
    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Destroys `path`. Idempotent: a nonexistent path is not an error.
    async fn destroy(&self, path: &Path, cancel: &CancellationToken) -> Result<()>;
}

/// An explicit or auto-detected backend choice (§4.4 selector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelector {
    /// Prefer overlayfs, falling back to `copy`.
    Overlay,
    /// Prefer btrfs subvolumes, falling back to `copy`.
    Btrfs,
    /// Always use the structure-preserving copy backend.
    Copy,
    /// Probe btrfs, then overlay, then fall back to `copy`.
    Auto,
    /// An unrecognized selector string; treated the same as `Auto`.
    Unknown(String),
}

impl From<&str> for BackendSelector {
    fn from(value: &str) -> Self {
        match value {
            "overlay" => Self::Overlay,
            "btrfs" => Self::Btrfs,
            "copy" => Self::Copy,
            "auto" | "" => Self::Auto,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Chooses a backend. `selector` is the explicit configuration value, if
/// any; absent plus `prefer_overlay=true` is the back-compat path that
/// resolves to [`BackendSelector::Overlay`] (§4.4).
pub async fn select<R: CommandRunner + 'static>(
    selector: Option<&str>,
    prefer_overlay: bool,
    state_store_path: &Path,
    runner: R,
    cancel: &CancellationToken,
) -> Box<dyn SnapshotManager> {
    let resolved = match selector {
        Some(s) => BackendSelector::from(s),
        None if prefer_overlay => BackendSelector::Overlay,
        None => BackendSelector::Auto,
    };

    match resolved {
        BackendSelector::Overlay => {
            if overlay::is_supported().await {
                Box::new(overlay::OverlayBackend::new(runner))
            } else {
                Box::new(copy::CopyBackend::new())
            }
        }
        BackendSelector::Btrfs => {
            if btrfs::is_supported_at(&runner, state_store_path, cancel).await {
                Box::new(btrfs::BtrfsBackend::new(runner))
            } else {
                Box::new(copy::CopyBackend::new())
            }
        }
        BackendSelector::Copy => Box::new(copy::CopyBackend::new()),
        BackendSelector::Auto | BackendSelector::Unknown(_) => {
            if btrfs::is_supported_at(&runner, state_store_path, cancel).await {
                Box::new(btrfs::BtrfsBackend::new(runner))
            } else if overlay::is_supported().await {
                Box::new(overlay::OverlayBackend::new(runner))
            } else {
                Box::new(copy::CopyBackend::new())
            }
        }
    }
}

/// Maps a (state-store root, image id, state id) triple to the canonical
/// on-disk location the store uses for a state's PGDATA tree (§6).
#[must_use] 
pub fn state_dir(root: &Path, image_id: &str, state_id: &str) -> PathBuf {
    root.join(sanitize_component(image_id)).join(sanitize_component(state_id))
}

fn sanitize_component(raw: &str) -> String {
    raw.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn explicit_copy_selector_always_wins() {
        let runner = ScriptedRunner::new(vec![]);
        let backend = select(Some("copy"), true, Path::new("/store"), runner, &CancellationToken::new()).await;
        assert_eq!(backend.kind(), "copy");
    }

    #[tokio::test]
    async fn btrfs_selector_falls_back_to_copy_when_unsupported() {
        let runner = ScriptedRunner::new(vec![Ok("ext4\n".to_string())]);
        let backend = select(Some("btrfs"), false, Path::new("/store"), runner, &CancellationToken::new()).await;
        assert_eq!(backend.kind(), "copy");
    }

    #[tokio::test]
    async fn unset_selector_with_prefer_overlay_resolves_to_overlay_or_copy() {
        let runner = ScriptedRunner::new(vec![]);
        let backend = select(None, true, Path::new("/store"), runner, &CancellationToken::new()).await;
        assert!(backend.kind() == "overlay" || backend.kind() == "copy");
    }

    #[test]
    fn state_dir_joins_root_image_and_state() {
        let dir = state_dir(Path::new("/store"), "postgres:17", "abc123");
        assert_eq!(dir, Path::new("/store/postgres:17/abc123"));
    }

    #[test]
    fn state_dir_sanitizes_path_separators() {
        let dir = state_dir(Path::new("/store"), "repo/postgres:17", "abc");
        assert_eq!(dir, Path::new("/store/repo_postgres:17/abc"));
    }
}

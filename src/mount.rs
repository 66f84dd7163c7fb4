//! `HostMount` / mount preflight (§4.2): verifies, and on WSL2 activates,
//! the filesystem backing the configured state-store path before any
//! container operation runs against it.
//!
//! Grounded in the upstream crate's `DockerPrerequisites::check` — a bounded
//! poll loop probing system state before the real work begins — generalized
//! here from "is Docker installed" to "is the state store mounted as
//! expected".

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{MountError, Result};
use crate::executor::CommandRunner;

const ACTIVATION_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ACTIVATION_POLL_BUDGET: Duration = Duration::from_secs(10);
const MOUNT_PROBE_RETRIES: u32 = 5;
const MOUNT_PROBE_INTERVAL: Duration = Duration::from_millis(200);
const JOURNAL_LINES: u32 = 20;
const DEFAULT_FSTYPE: &str = "btrfs";

/// Configuration recognized by [`HostMount`]; missing fields mean "skip
/// preflight" for that aspect.
#[derive(Debug, Clone, Default)]
pub struct MountConfig {
    /// Name of a systemd unit that mounts the store (WSL2 variant).
    pub mount_unit: Option<String>,
    /// Expected filesystem identifier; defaults to `btrfs` when a unit is
    /// configured but this is empty.
    pub mount_fstype: Option<String>,
    /// The device to mount directly (non-systemd variant).
    pub device: Option<String>,
    /// Path to check; required whenever any of the above is set.
    pub state_store: Option<PathBuf>,
}

impl MountConfig {
    /// Reads `SQLRS_WSL_MOUNT_UNIT`, `SQLRS_WSL_MOUNT_FSTYPE`,
    /// `SQLRS_WSL_MOUNT_DEVICE`, and `SQLRS_STATE_STORE` (§6).
    pub fn from_env() -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            mount_unit: env("SQLRS_WSL_MOUNT_UNIT"),
            mount_fstype: env("SQLRS_WSL_MOUNT_FSTYPE"),
            device: env("SQLRS_WSL_MOUNT_DEVICE"),
            state_store: env("SQLRS_STATE_STORE").map(PathBuf::from),
        }
    }

    fn fstype(&self) -> String {
        self.mount_fstype
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_FSTYPE.to_string())
    }
}

/// Verifies (and on WSL2, activates) the filesystem backing the state
/// store.
#[derive(Debug)]
pub struct HostMount<R: CommandRunner> {
    runner: R,
    config: MountConfig,
}

impl<R: CommandRunner> HostMount<R> {
    /// Creates a preflight checker.
    pub fn new(runner: R, config: MountConfig) -> Self {
        Self { runner, config }
    }

    /// Runs the preflight. A no-op if no mount unit or device is configured.
    pub async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<()> {
        if self.config.mount_unit.is_none() && self.config.device.is_none() {
            debug!("mount preflight skipped: no unit or device configured");
            return Ok(());
        }

        let state_store = self.config.state_store.clone().ok_or_else(|| {
            MountError::ConfigurationMissing(
                "state_store is required when a mount unit or device is configured".to_string(),
            )
        })?;

        tokio::fs::create_dir_all(&state_store)
            .await
            .map_err(|e| MountError::ProbeFailed {
                path: state_store.display().to_string(),
                reason: e.to_string(),
            })?;
        set_store_mode(&state_store).await.map_err(|e| MountError::ProbeFailed {
            path: state_store.display().to_string(),
            reason: e.to_string(),
        })?;

        if let Some(unit) = self.config.mount_unit.clone() {
            self.ensure_unit_active(&unit, cancel).await?;
        } else if let Some(device) = self.config.device.clone() {
            self.mount_device(&device, &state_store, cancel).await?;
        }

        self.probe_mount(&state_store, cancel).await
    }

    async fn ensure_unit_active(&self, unit: &str, cancel: &CancellationToken) -> Result<()> {
        if self.unit_status(unit, cancel).await? == UnitStatus::Active {
            return Ok(());
        }

        let start_result = self
            .runner
            .run(
                "systemctl",
                &[
                    "start".to_string(),
                    "--no-block".to_string(),
                    unit.to_string(),
                ],
                None,
                cancel,
            )
            .await;
        if start_result.is_err() {
            return Err(MountError::UnitStartFailed {
                unit: unit.to_string(),
                journal_tail: self.journal_tail(unit, cancel).await,
            }
            .into());
        }

        let deadline = tokio::time::Instant::now() + ACTIVATION_POLL_BUDGET;
        loop {
            if self.unit_status(unit, cancel).await? == UnitStatus::Active {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MountError::UnitNeverActive {
                    unit: unit.to_string(),
                    journal_tail: self.journal_tail(unit, cancel).await,
                }
                .into());
            }
            sleep(ACTIVATION_POLL_INTERVAL).await;
        }
    }

    async fn unit_status(&self, unit: &str, cancel: &CancellationToken) -> Result<UnitStatus> {
        match self
            .runner
            .run(
                "systemctl",
                &["is-active".to_string(), unit.to_string()],
                None,
                cancel,
            )
            .await
        {
            Ok(out) if out.combined.trim() == "active" => Ok(UnitStatus::Active),
            Ok(_) => Ok(UnitStatus::Inactive),
            Err(crate::errors::Error::Command(crate::errors::CommandError::NonZeroExit {
                exit_code,
                ..
            })) if exit_code == 3 || exit_code == 4 => Ok(UnitStatus::Inactive),
            Err(e) => Err(e),
        }
    }

    async fn journal_tail(&self, unit: &str, cancel: &CancellationToken) -> String {
        self.runner
            .run(
                "journalctl",
                &[
                    "-u".to_string(),
                    unit.to_string(),
                    "-n".to_string(),
                    JOURNAL_LINES.to_string(),
                    "--no-pager".to_string(),
                ],
                None,
                cancel,
            )
            .await
            .map(|out| out.combined)
            .unwrap_or_default()
    }

    async fn mount_device(
        &self,
        device: &str,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.runner
            .run(
                "mount",
                &[
                    "-t".to_string(),
                    self.config.fstype(),
                    device.to_string(),
                    target.display().to_string(),
                ],
                None,
                cancel,
            )
            .await
            .map_err(|e| MountError::ProbeFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn probe_mount(&self, target: &Path, cancel: &CancellationToken) -> Result<()> {
        let expected = self.config.fstype();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.find_fstype(target, cancel).await {
                Ok(Some(actual)) if actual == expected => return Ok(()),
                Ok(Some(actual)) => {
                    return Err(MountError::FstypeMismatch {
                        path: target.display().to_string(),
                        actual,
                        expected,
                    }
                    .into());
                }
                Ok(None) if attempt >= MOUNT_PROBE_RETRIES => {
                    return Err(MountError::NotMounted {
                        path: target.display().to_string(),
                    }
                    .into());
                }
                Err(e) if attempt >= MOUNT_PROBE_RETRIES => return Err(e),
                Ok(None) | Err(_) => sleep(MOUNT_PROBE_INTERVAL).await,
            }
        }
    }

    /// Tries `nsenter -t 1 -m -- findmnt`, falling back to a direct
    /// `findmnt` if `nsenter` is unavailable.
    async fn find_fstype(&self, target: &Path, cancel: &CancellationToken) -> Result<Option<String>> {
        let target = target.display().to_string();
        let findmnt_args = |bin_args: &[&str]| -> Vec<String> {
            bin_args.iter().map(std::string::ToString::to_string).collect()
        };

        let nsenter_result = self
            .runner
            .run(
                "nsenter",
                &findmnt_args(&[
                    "-t", "1", "-m", "--", "findmnt", "-n", "-o", "FSTYPE", "-T", &target,
                ]),
                None,
                cancel,
            )
            .await;

        let output = if let Ok(out) = nsenter_result { out } else {
            debug!("nsenter unavailable, falling back to direct findmnt");
            match self
                .runner
                .run(
                    "findmnt",
                    &findmnt_args(&["-n", "-o", "FSTYPE", "-T", &target]),
                    None,
                    cancel,
                )
                .await
            {
                Ok(out) => out,
                Err(e) => {
                    warn!("findmnt probe failed for {target}: {e}");
                    return Ok(None);
                }
            }
        };

        let fstype = output.combined.lines().next().map(str::trim).filter(|s| !s.is_empty());
        Ok(fstype.map(str::to_string))
    }
}

#[cfg(unix)]
async fn set_store_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn set_store_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum UnitStatus {
    Active,
    Inactive,
}

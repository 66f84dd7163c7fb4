//! Error types for the container-runtime lifecycle layer.
//!
//! Mirrors the structure the upstream docker wrapper uses for its own
//! `DockerError`: one `thiserror`-derived enum per failure domain, composed
//! into a crate-wide [`Error`] via `#[from]`, so callers can both match on a
//! specific variant (`Error::Runtime(RuntimeError::DockerUnavailable { .. })`)
//! and get a single propagate-with-`?` type.

use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the container-runtime lifecycle layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`crate::executor::CommandRunner`] failure.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A [`crate::mount::HostMount`] preflight failure.
    #[error(transparent)]
    Mount(#[from] MountError),

    /// A [`crate::runtime::DockerRuntime`] failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A [`crate::snapshot::SnapshotManager`] backend failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// A store or connection-tracker failure, propagated verbatim.
    #[error("store error: {0}")]
    Store(String),

    /// Invalid input supplied by the caller (blank id, blank path, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure modes for [`crate::executor::CommandRunner`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// The child process could not be spawned (fork/exec failure).
    #[error("failed to start {program}: {source}")]
    StartFailed {
        /// Program that failed to start.
        program: String,
        #[source]
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Stdin/stdout/stderr pipe setup failed.
    #[error("pipe setup failed for {program}: {source}")]
    PipeSetupFailed {
        /// Program whose pipes failed to set up.
        program: String,
        #[source]
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The process exited with a non-zero status.
    #[error("{program} exited with status {exit_code}")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit code (or -1 if the process was killed by a signal).
        exit_code: i32,
        /// Combined stdout+stderr captured before the failure.
        output: String,
    },

    /// The caller's cancellation token fired before the process exited.
    #[error("command cancelled: {program}")]
    Cancelled {
        /// Program that was cancelled.
        program: String,
    },
}

/// Failure modes for [`crate::mount::HostMount`].
#[derive(Debug, Error)]
pub enum MountError {
    /// Required configuration is missing or inconsistent (e.g. a mount unit
    /// configured without a state-store path).
    #[error("mount preflight misconfigured: {0}")]
    ConfigurationMissing(String),

    /// `systemctl start` failed to activate the unit.
    #[error("failed to start mount unit {unit}: {journal_tail}")]
    UnitStartFailed {
        /// The unit that failed to start.
        unit: String,
        /// Last lines of the unit's journal.
        journal_tail: String,
    },

    /// The unit never reported "active" within the polling budget.
    #[error("mount unit {unit} never became active: {journal_tail}")]
    UnitNeverActive {
        /// The unit that never activated.
        unit: String,
        /// Last lines of the unit's journal.
        journal_tail: String,
    },

    /// The mount probe (`findmnt`, possibly via `nsenter`) failed outright.
    #[error("failed to probe mount at {path}: {reason}")]
    ProbeFailed {
        /// Path that could not be probed.
        path: String,
        /// Underlying reason.
        reason: String,
    },

    /// The path is mounted, but with the wrong filesystem type.
    #[error("{path} is mounted as {actual}, expected {expected}")]
    FstypeMismatch {
        /// Path that was checked.
        path: String,
        /// Filesystem type actually found.
        actual: String,
        /// Filesystem type that was expected.
        expected: String,
    },

    /// The path is not mounted at all.
    #[error("{path} is not mounted")]
    NotMounted {
        /// Path that was checked.
        path: String,
    },
}

/// Failure modes for [`crate::runtime::DockerRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container engine daemon is unreachable.
    #[error("docker daemon unavailable: {hint}")]
    DockerUnavailable {
        /// Human-readable remediation hint chosen by output heuristics.
        hint: &'static str,
        /// The underlying command error, for introspection.
        #[source]
        source: Box<CommandError>,
    },

    /// Initdb or chown/chmod reported a permissions problem the filesystem
    /// does not support (common on some Docker Desktop bind-mount setups).
    #[error(
        "data directory permissions are not supported on this filesystem; use WSL2/ext4 or a docker volume"
    )]
    PermissionNotSupported,

    /// `Start` found no `PG_VERSION` and `allow_initdb` was false.
    #[error("missing PG_VERSION in {data_dir}")]
    MissingPgVersion {
        /// The data directory that was probed.
        data_dir: String,
    },

    /// `WaitForReady` timed out.
    #[error("container {id} did not become ready within {timeout:?}")]
    ReadinessTimeout {
        /// The container id that never became ready.
        id: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// `docker port` output could not be parsed.
    #[error("could not parse host port from: {output:?}")]
    PortParse {
        /// The raw output that failed to parse.
        output: String,
    },

    /// A generic, non-reclassified failure from the underlying command.
    #[error("docker operation failed: {0}")]
    Other(String),
}

/// Failure modes for [`crate::snapshot::SnapshotManager`] backends.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The destination is the source, or nested beneath it.
    #[error("destination {dest} is the same as or nested under source {src}")]
    DestinationContainment {
        /// Source path.
        src: String,
        /// Destination path.
        dest: String,
    },

    /// The source does not exist, or is not a directory.
    #[error("source {0} does not exist or is not a directory")]
    InvalidSource(String),

    /// An I/O error occurred while walking or copying the tree.
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: String,
        #[source]
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The requested backend is unsupported at the given path.
    #[error("backend {backend} is unsupported at {path}")]
    BackendUnsupported {
        /// Backend that was requested.
        backend: String,
        /// Path the backend was probed against.
        path: String,
    },
}

impl From<CommandError> for RuntimeError {
    fn from(err: CommandError) -> Self {
        RuntimeError::Other(err.to_string())
    }
}

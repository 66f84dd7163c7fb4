//! Public surface types for the container-runtime lifecycle layer.
//!
//! These are the value types every other module in this crate exchanges:
//! requests going into [`crate::runtime::DockerRuntime`] and
//! [`crate::snapshot::SnapshotManager`], and the plan/result types coming out
//! of [`crate::deletion::DeletionManager`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A running container handle returned by `Start`.
///
/// Not persisted by this crate; the caller's store is responsible for
/// remembering `id` alongside the on-disk data directory it was started
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Container identifier assigned by the container engine.
    pub id: String,
    /// Always the loopback address; the container's port is published there.
    pub host: String,
    /// Host TCP port dynamically bound to the container's 5432.
    pub port: u16,
}

impl Instance {
    pub(crate) fn new(id: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: "127.0.0.1".to_string(),
            port,
        }
    }
}

/// A single bind mount to attach to a container.
///
/// Silently dropped by [`StartRequest`]/[`RunRequest`] consumers if either
/// path is blank — see [`Mount::is_usable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host.
    pub host_path: String,
    /// Path inside the container.
    pub container_path: String,
    /// Whether the mount should be read-only.
    pub read_only: bool,
}

impl Mount {
    /// Creates a mount.
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Marks the mount as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// A mount is usable only if both paths are non-blank.
    pub(crate) fn is_usable(&self) -> bool {
        !self.host_path.trim().is_empty() && !self.container_path.trim().is_empty()
    }
}

/// Request to start a long-lived `PostgreSQL` container against a data
/// directory.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Image to run (must be resolvable by the container engine).
    pub image_id: String,
    /// Absolute host path backing the container's PGDATA volume.
    pub data_dir: String,
    /// Optional container name.
    pub name: Option<String>,
    /// Extra bind mounts, in order.
    pub mounts: Vec<Mount>,
    /// Whether `initdb` may run inside the container if PGDATA is absent.
    pub allow_initdb: bool,
}

impl StartRequest {
    /// Creates a request with no extra mounts and `allow_initdb = false`.
    pub fn new(image_id: impl Into<String>, data_dir: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            data_dir: data_dir.into(),
            name: None,
            mounts: Vec::new(),
            allow_initdb: false,
        }
    }

    /// Sets the container name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Permits `initdb` to run inside the container if PGDATA is absent.
    #[must_use]
    pub fn with_allow_initdb(mut self, allow: bool) -> Self {
        self.allow_initdb = allow;
        self
    }
}

/// Request to execute a command inside a running container.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// User to run the command as.
    pub user: Option<String>,
    /// Command and arguments, in order. Must be non-empty.
    pub args: Vec<String>,
    /// Environment variables; blank keys are dropped.
    pub env: std::collections::HashMap<String, String>,
    /// Working directory inside the container.
    pub dir: Option<String>,
    /// Payload written to the command's stdin, if any.
    ///
    /// Presence implies a stdin channel is allocated (`docker exec -i`).
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    /// Creates a request from an argument list.
    #[must_use] 
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }
}

/// Request to run a one-shot, foreground, auto-removed container.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Image to run.
    pub image_id: String,
    /// Command and arguments.
    pub args: Vec<String>,
    /// Network to attach to, if any.
    pub network: Option<String>,
    /// User to run as.
    pub user: Option<String>,
    /// Working directory inside the container.
    pub dir: Option<String>,
    /// Environment variables; blank keys are dropped.
    pub env: std::collections::HashMap<String, String>,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Optional container name.
    pub name: Option<String>,
}

/// The writable or read-only clone produced by a [`crate::snapshot::SnapshotManager`].
pub struct CloneResult {
    /// Path to bind-mount into the container.
    pub mount_dir: PathBuf,
    /// Releases backend-specific resources for this clone.
    ///
    /// Calling this more than once is harmless; later calls are no-ops.
    pub cleanup: Box<dyn FnOnce() -> crate::errors::Result<()> + Send>,
}

impl std::fmt::Debug for CloneResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneResult")
            .field("mount_dir", &self.mount_dir)
            .finish_non_exhaustive()
    }
}

/// Capability set advertised by a snapshot backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the database must be stopped before this backend can act.
    pub requires_db_stop: bool,
    /// Whether `clone` produces a writable copy.
    pub supports_writable_clone: bool,
    /// Whether the backend supports send/receive-style replication.
    pub supports_send_receive: bool,
}

/// Tagged node kind in a [`DeleteNode`] tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteNodeKind {
    /// A running (or stopped) instance.
    Instance,
    /// An immutable base state.
    State,
}

/// A closed-set tag explaining why a node cannot be destroyed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The instance has one or more live connections and `force` was not set.
    ActiveConnections,
    /// The instance has active background tasks (reserved for the outer engine).
    ActiveTasks,
    /// The state has instance or child-state descendants.
    HasDescendants,
    /// A descendant of this node is blocked.
    BlockedByDescendant,
}

/// A transient, in-memory node in a deletion plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNode {
    /// Whether this node is an instance or a state.
    pub kind: DeleteNodeKind,
    /// The instance or state id.
    pub id: String,
    /// Live connection count, populated for instance nodes.
    pub connections: Option<u64>,
    /// Why this node cannot be destroyed now, if at all.
    pub blocked: Option<BlockReason>,
    /// The container id backing an instance node, if known.
    pub runtime_id: Option<String>,
    /// The on-disk directory backing this node, if known.
    pub runtime_dir: Option<String>,
    /// The base image id, for state nodes.
    pub image_id: Option<String>,
    /// Child nodes: instances are listed before state children, each group
    /// sorted by id ascending.
    pub children: Vec<DeleteNode>,
}

impl DeleteNode {
    pub(crate) fn instance(id: impl Into<String>) -> Self {
        Self {
            kind: DeleteNodeKind::Instance,
            id: id.into(),
            connections: None,
            blocked: None,
            runtime_id: None,
            runtime_dir: None,
            image_id: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn state(id: impl Into<String>) -> Self {
        Self {
            kind: DeleteNodeKind::State,
            id: id.into(),
            connections: None,
            blocked: None,
            runtime_id: None,
            runtime_dir: None,
            image_id: None,
            children: Vec::new(),
        }
    }

    /// True if this node or any descendant is blocked.
    #[must_use] 
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

/// The outcome of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Destruction was performed.
    Deleted,
    /// Dry-run: destruction would have been performed.
    WouldDelete,
    /// The root or a descendant is blocked; nothing was destroyed.
    Blocked,
}

/// Options controlling a deletion request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// For state deletion: also delete descendant instances and states.
    pub recurse: bool,
    /// Destroy instances with active connections anyway.
    pub force: bool,
    /// Compute the plan but never destroy anything.
    pub dry_run: bool,
}

/// The full result of a deletion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Whether this was a dry-run.
    pub dry_run: bool,
    /// The terminal outcome.
    pub outcome: DeleteOutcome,
    /// The computed plan.
    pub root: DeleteNode,
}

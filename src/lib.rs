//! # sqlrs-core
//!
//! The container-runtime lifecycle, snapshot, and deletion-graph core for an
//! engine that manages ephemeral `PostgreSQL` instances cloned from immutable
//! base states.
//!
//! This crate owns three concerns:
//!
//! - [`runtime`] — drives the container engine CLI (`docker run`, `exec`,
//!   `stop`, `port`, `pull`, `image inspect`) to realize the `Instance`
//!   lifecycle: init a base PGDATA, start a container against it, wait for
//!   readiness, exec commands, and stop.
//! - [`snapshot`] — pluggable backends (`copy`, `overlay`, `btrfs`) that
//!   clone or snapshot a PGDATA directory.
//! - [`deletion`] — computes and executes cascading deletion plans over
//!   instances and states, tagging why a node can't be destroyed yet.
//!
//! The [`store::Store`] and [`store::ConnectionTracker`] traits are
//! contracts only; the outer engine that embeds this crate supplies the
//! implementations.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sqlrs_core::executor::ProcessRunner;
//! use sqlrs_core::runtime::{DockerRuntime, DockerRuntimeConfig};
//! use sqlrs_core::types::StartRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sqlrs_core::errors::Error> {
//!     let runtime = DockerRuntime::new(ProcessRunner::new(), None, DockerRuntimeConfig::default());
//!     let cancel = CancellationToken::new();
//!
//!     runtime.init_base("postgres:17", "/var/lib/sqlrs/base/postgres17", &cancel).await?;
//!     let req = StartRequest::new("postgres:17", "/var/lib/sqlrs/base/postgres17");
//!     let instance = runtime.start(&req, &cancel).await?;
//!     println!("listening on {}:{}", instance.host, instance.port);
//!
//!     runtime.stop(&instance.id, &cancel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub use deletion::DeletionManager;
pub use errors::{Error, Result};
pub use executor::{CommandRunner, ProcessRunner};
pub use mount::{HostMount, MountConfig};
pub use runtime::{DockerRuntime, DockerRuntimeConfig};
pub use snapshot::SnapshotManager;
pub use store::{ConnectionTracker, Store};
pub use types::{
    DeleteNode, DeleteOptions, DeleteOutcome, DeleteResult, ExecRequest, Instance, Mount as BindMount,
    RunRequest, StartRequest,
};

pub mod deletion;
pub mod errors;
pub mod executor;
pub mod mount;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testing;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default budget for [`runtime::DockerRuntime::wait_for_ready`].
pub const DEFAULT_READINESS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_readiness_timeout() {
        assert!(DEFAULT_READINESS_TIMEOUT > std::time::Duration::from_secs(0));
    }
}

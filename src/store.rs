//! External interfaces consumed by [`crate::deletion::DeletionManager`]: the
//! persistent metadata store and the connection tracker (§6). Both are
//! out of scope for this crate's implementation — only the contracts live
//! here, the way the upstream docker wrapper's manager types (`ImageManager`,
//! `NetworkManager`, ...) hold a reference to the thing they drive rather
//! than owning its implementation.

use serde::{Deserialize, Serialize};

/// A persisted instance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    /// The instance id.
    pub instance_id: String,
    /// The state this instance was cloned from.
    pub state_id: String,
    /// The container id, if the instance has been started.
    pub runtime_id: Option<String>,
    /// The host directory backing this instance, if materialized.
    pub runtime_dir: Option<String>,
}

/// A persisted state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// The state id.
    pub state_id: String,
    /// The base image this state was built from.
    pub image_id: String,
    /// The parent state this was cloned from, if any.
    pub parent_state_id: Option<String>,
}

/// Filter for [`Store::list_instances`] / [`Store::list_states`].
#[derive(Debug, Clone, Default)]
pub struct StoreFilter {
    /// Restrict to instances backed by this state id.
    pub state_id: Option<String>,
    /// Restrict to states whose parent is this state id.
    pub parent_id: Option<String>,
}

impl StoreFilter {
    /// A filter matching instances of a given state.
    pub fn by_state(state_id: impl Into<String>) -> Self {
        Self {
            state_id: Some(state_id.into()),
            parent_id: None,
        }
    }

    /// A filter matching states whose parent is the given state.
    pub fn by_parent(parent_id: impl Into<String>) -> Self {
        Self {
            state_id: None,
            parent_id: Some(parent_id.into()),
        }
    }
}

/// The persistent metadata store (§6). Implemented by the outer engine;
/// this crate only consumes it.
pub trait Store: Send + Sync {
    /// Looks up an instance by id.
    fn get_instance(&self, id: &str) -> Option<InstanceEntry>;
    /// Looks up a state by id.
    fn get_state(&self, id: &str) -> Option<StateEntry>;
    /// Lists instances matching `filter`.
    fn list_instances(&self, filter: StoreFilter) -> Vec<InstanceEntry>;
    /// Lists states matching `filter`.
    fn list_states(&self, filter: StoreFilter) -> Vec<StateEntry>;
    /// Deletes an instance record. Idempotent.
    fn delete_instance(&self, id: &str);
    /// Deletes a state record. Idempotent.
    fn delete_state(&self, id: &str);
}

/// Reports live connection counts per instance (§6). A `None` tracker
/// behaves as if every instance had zero connections.
pub trait ConnectionTracker: Send + Sync {
    /// Returns the number of active connections to `instance_id`.
    fn active_connections(&self, instance_id: &str) -> u64;
}

/// The "no tracker configured" default: always reports zero connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConnectionTracker;

impl ConnectionTracker for NoopConnectionTracker {
    fn active_connections(&self, _instance_id: &str) -> u64 {
        0
    }
}

//! `DeletionManager` (§4.5): computes and optionally executes a cascading
//! deletion plan over instances and states.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::executor::CommandRunner;
use crate::runtime::DockerRuntime;
use crate::snapshot::SnapshotManager;
use crate::store::{ConnectionTracker, Store, StoreFilter};
use crate::types::{BlockReason, DeleteNode, DeleteNodeKind, DeleteOptions, DeleteOutcome, DeleteResult};

/// Computes and executes deletion plans against a [`Store`], a
/// [`ConnectionTracker`], and optionally a [`DockerRuntime`] /
/// [`SnapshotManager`] pair.
///
/// A missing runtime means "skip container stop"; a missing snapshot
/// manager means "skip directory removal".
pub struct DeletionManager<R: CommandRunner> {
    store: Arc<dyn Store>,
    connections: Arc<dyn ConnectionTracker>,
    runtime: Option<Arc<DockerRuntime<R>>>,
    snapshots: Option<(Arc<dyn SnapshotManager>, std::path::PathBuf)>,
}

impl<R: CommandRunner> DeletionManager<R> {
    /// Creates a deletion manager. `snapshots` pairs a backend with the
    /// state-store root used to resolve state directories.
    pub fn new(
        store: Arc<dyn Store>,
        connections: Arc<dyn ConnectionTracker>,
        runtime: Option<Arc<DockerRuntime<R>>>,
        snapshots: Option<(Arc<dyn SnapshotManager>, std::path::PathBuf)>,
    ) -> Self {
        Self {
            store,
            connections,
            runtime,
            snapshots,
        }
    }

    /// `DeleteInstance(instance_id, opts)` (§4.5).
    pub async fn delete_instance(
        &self,
        instance_id: &str,
        opts: DeleteOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<DeleteResult>> {
        let Some(entry) = self.store.get_instance(instance_id) else {
            return Ok(None);
        };

        let mut node = DeleteNode::instance(instance_id);
        node.runtime_id = entry.runtime_id.clone();
        node.runtime_dir = entry.runtime_dir.clone();

        let connections = self.connections.active_connections(instance_id);
        node.connections = Some(connections);
        if connections > 0 && !opts.force {
            node.blocked = Some(BlockReason::ActiveConnections);
            return Ok(Some(DeleteResult {
                dry_run: opts.dry_run,
                outcome: DeleteOutcome::Blocked,
                root: node,
            }));
        }

        if opts.dry_run {
            return Ok(Some(DeleteResult {
                dry_run: true,
                outcome: DeleteOutcome::WouldDelete,
                root: node,
            }));
        }

        self.destroy_instance(entry.runtime_id.as_deref(), entry.runtime_dir.as_deref(), cancel)
            .await?;
        self.store.delete_instance(instance_id);

        Ok(Some(DeleteResult {
            dry_run: false,
            outcome: DeleteOutcome::Deleted,
            root: node,
        }))
    }

    /// `DeleteState(state_id, opts)` (§4.5). Non-recursive unless
    /// `opts.recurse` is set.
    pub async fn delete_state(
        &self,
        state_id: &str,
        opts: DeleteOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<DeleteResult>> {
        let Some(entry) = self.store.get_state(state_id) else {
            return Ok(None);
        };

        if opts.recurse {
            let mut root = self.build_state_tree(state_id, &entry.image_id, opts.force);
            let blocked = propagate_blocked(&mut root);

            if blocked {
                return Ok(Some(DeleteResult {
                    dry_run: opts.dry_run,
                    outcome: DeleteOutcome::Blocked,
                    root,
                }));
            }
            if opts.dry_run {
                return Ok(Some(DeleteResult {
                    dry_run: true,
                    outcome: DeleteOutcome::WouldDelete,
                    root,
                }));
            }

            self.delete_tree(&root, cancel).await?;
            return Ok(Some(DeleteResult {
                dry_run: false,
                outcome: DeleteOutcome::Deleted,
                root,
            }));
        }

        let mut node = DeleteNode::state(state_id);
        node.image_id = Some(entry.image_id.clone());

        let has_instances = !self.store.list_instances(StoreFilter::by_state(state_id)).is_empty();
        let has_children = !self.store.list_states(StoreFilter::by_parent(state_id)).is_empty();
        if has_instances || has_children {
            node.blocked = Some(BlockReason::HasDescendants);
            return Ok(Some(DeleteResult {
                dry_run: opts.dry_run,
                outcome: DeleteOutcome::Blocked,
                root: node,
            }));
        }

        if opts.dry_run {
            return Ok(Some(DeleteResult {
                dry_run: true,
                outcome: DeleteOutcome::WouldDelete,
                root: node,
            }));
        }

        self.destroy_state_dir(&entry.image_id, state_id, cancel).await?;
        self.store.delete_state(state_id);

        Ok(Some(DeleteResult {
            dry_run: false,
            outcome: DeleteOutcome::Deleted,
            root: node,
        }))
    }

    fn build_state_tree(&self, state_id: &str, image_id: &str, force: bool) -> DeleteNode {
        let mut node = DeleteNode::state(state_id);
        node.image_id = Some(image_id.to_string());

        let mut instances = self.store.list_instances(StoreFilter::by_state(state_id));
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        for inst in instances {
            let connections = self.connections.active_connections(&inst.instance_id);
            let mut child = DeleteNode::instance(&inst.instance_id);
            child.runtime_id = inst.runtime_id;
            child.runtime_dir = inst.runtime_dir;
            child.connections = Some(connections);
            if connections > 0 && !force {
                child.blocked = Some(BlockReason::ActiveConnections);
            }
            node.children.push(child);
        }

        let mut child_states = self.store.list_states(StoreFilter::by_parent(state_id));
        child_states.sort_by(|a, b| a.state_id.cmp(&b.state_id));
        for state in child_states {
            node.children.push(self.build_state_tree(&state.state_id, &state.image_id, force));
        }

        node
    }

    async fn delete_tree(&self, node: &DeleteNode, cancel: &CancellationToken) -> Result<()> {
        for child in &node.children {
            Box::pin(self.delete_tree(child, cancel)).await?;
        }

        match node.kind {
            DeleteNodeKind::Instance => {
                self.destroy_instance(node.runtime_id.as_deref(), node.runtime_dir.as_deref(), cancel)
                    .await?;
                self.store.delete_instance(&node.id);
            }
            DeleteNodeKind::State => {
                if let Some(image_id) = &node.image_id {
                    self.destroy_state_dir(image_id, &node.id, cancel).await?;
                }
                self.store.delete_state(&node.id);
            }
        }
        Ok(())
    }

    async fn destroy_instance(
        &self,
        runtime_id: Option<&str>,
        runtime_dir: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let (Some(runtime), Some(id)) = (&self.runtime, runtime_id) {
            match runtime.stop(id, cancel).await {
                Ok(()) | Err(crate::errors::Error::Runtime(crate::errors::RuntimeError::DockerUnavailable { .. })) => {}
                Err(err) => return Err(err),
            }
        }

        if let Some(dir) = runtime_dir {
            let path = Path::new(dir);
            if let Some((backend, _)) = &self.snapshots {
                backend.destroy(path, cancel).await?;
            } else if path.exists() {
                tokio::fs::remove_dir_all(path)
                    .await
                    .map_err(|e| crate::errors::Error::Store(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn destroy_state_dir(&self, image_id: &str, state_id: &str, cancel: &CancellationToken) -> Result<()> {
        let Some((backend, root)) = &self.snapshots else {
            return Ok(());
        };
        let dir = crate::snapshot::state_dir(root, image_id, state_id);
        backend.destroy(&dir, cancel).await
    }
}

/// Propagates `blocked_by_descendant` bottom-up; returns whether the tree
/// (including `node` itself) ended up blocked anywhere.
fn propagate_blocked(node: &mut DeleteNode) -> bool {
    let mut any_child_blocked = false;
    for child in &mut node.children {
        if propagate_blocked(child) {
            any_child_blocked = true;
        }
    }
    if node.blocked.is_none() && any_child_blocked {
        node.blocked = Some(BlockReason::BlockedByDescendant);
    }
    node.blocked.is_some()
}

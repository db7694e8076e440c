//! Filesystem storage backend.
//!
//! Selected by `file://` database URLs. Every entity is one JSON document:
//!
//! ```text
//! <root>/workflows/<workflow_id>.json
//! <root>/executions/<execution_id>.json
//! <root>/input_coordination/<execution_id>_<node_id>_<iteration>.json
//! ```
//!
//! Input-coordination records live in their own directory, so their keys
//! cannot collide with execution-context keys. Trigger matching scans the
//! published workflows; that is linear in the number of workflows and
//! acceptable for the development backend only.

use crate::error::{RepositoryError, WorkflowGroupError};
use crate::traits::{
    ConnectionRepository, ExecutionContextRepository, InputCoordinationRepository,
    InputCoordinationState, ListWorkflowsOptions, NodeRepository, SortField, TriggerNodeMatch,
    WorkflowRepository,
};
use async_trait::async_trait;
use operion_core::{ConnectionId, ExecutionId, WorkflowGroupId, WorkflowId};
use operion_workflow::{
    Connection, ExecutionContext, ExecutionStatus, NodeId, Workflow, WorkflowNode, WorkflowStatus,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const WORKFLOWS_DIR: &str = "workflows";
const EXECUTIONS_DIR: &str = "executions";
const INPUT_COORDINATION_DIR: &str = "input_coordination";

fn transient(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Transient {
        message: e.to_string(),
    }
}

fn corrupt(path: &Path, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt {
        message: format!("{}: {e}", path.display()),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RepositoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupt(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(transient(e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| RepositoryError::Corrupt {
        message: e.to_string(),
    })?;
    tokio::fs::write(path, bytes).await.map_err(transient)
}

/// Filesystem-backed implementation of all repository contracts.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at the given directory, creating the layout
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        for dir in [WORKFLOWS_DIR, EXECUTIONS_DIR, INPUT_COORDINATION_DIR] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(transient)?;
        }
        Ok(Self { root })
    }

    fn workflow_path(&self, id: WorkflowId) -> PathBuf {
        self.root.join(WORKFLOWS_DIR).join(format!("{id}.json"))
    }

    fn execution_path(&self, id: ExecutionId) -> PathBuf {
        self.root.join(EXECUTIONS_DIR).join(format!("{id}.json"))
    }

    fn input_state_path(&self, execution_id: ExecutionId, node_id: NodeId, iteration: u64) -> PathBuf {
        self.root
            .join(INPUT_COORDINATION_DIR)
            .join(format!("{execution_id}_{node_id}_{iteration}.json"))
    }

    async fn load_dir<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(self.root.join(dir))
            .await
            .map_err(transient)?;

        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(transient)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(value) = read_json(&path).await? {
                loaded.push(value);
            }
        }
        Ok(loaded)
    }

    async fn load_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        self.load_dir(WORKFLOWS_DIR).await
    }

    async fn load_group(&self, group_id: WorkflowGroupId) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self
            .load_workflows()
            .await?
            .into_iter()
            .filter(|w| w.group_id == group_id)
            .collect())
    }

    async fn require_workflow(&self, id: WorkflowId) -> Result<Workflow, RepositoryError> {
        read_json(&self.workflow_path(id))
            .await?
            .ok_or_else(|| RepositoryError::workflow_not_found(id))
    }

    async fn mutate_workflow(
        &self,
        id: WorkflowId,
        apply: impl FnOnce(&mut Workflow) + Send,
    ) -> Result<(), RepositoryError> {
        let mut workflow = self.require_workflow(id).await?;
        apply(&mut workflow);
        workflow.touch();
        write_json(&self.workflow_path(id), &workflow).await
    }
}

#[async_trait]
impl WorkflowRepository for FileStore {
    async fn get_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        read_json(&self.workflow_path(id)).await
    }

    async fn get_all(&self) -> Result<Vec<Workflow>, RepositoryError> {
        self.load_workflows().await
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        write_json(&self.workflow_path(workflow.id), workflow).await
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, RepositoryError> {
        match tokio::fs::remove_file(self.workflow_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(transient(e)),
        }
    }

    async fn get_published_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .load_group(group_id)
            .await?
            .into_iter()
            .find(Workflow::is_published))
    }

    async fn get_draft_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .load_group(group_id)
            .await?
            .into_iter()
            .find(|w| w.status == WorkflowStatus::Draft))
    }

    async fn get_current_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let group = self.load_group(group_id).await?;
        if let Some(published) = group.iter().find(|w| w.is_published()) {
            return Ok(Some(published.clone()));
        }
        if let Some(draft) = group.iter().find(|w| w.status == WorkflowStatus::Draft) {
            return Ok(Some(draft.clone()));
        }
        Ok(group.into_iter().max_by_key(|w| w.updated_at))
    }

    async fn publish_workflow(&self, id: WorkflowId) -> Result<Workflow, RepositoryError> {
        let mut target = self.require_workflow(id).await?;

        // Unpublish peers before publishing the target so a crash between
        // writes can leave the group with no published version but never
        // with two.
        for mut peer in self.load_group(target.group_id).await? {
            if peer.id != target.id && peer.is_published() {
                peer.mark_unpublished();
                write_json(&self.workflow_path(peer.id), &peer).await?;
            }
        }

        target.mark_published();
        write_json(&self.workflow_path(target.id), &target).await?;
        Ok(target)
    }

    async fn create_draft_from_published(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Workflow, RepositoryError> {
        let published = self
            .get_published_workflow(group_id)
            .await?
            .ok_or(WorkflowGroupError::NoPublishedWorkflow { group_id })?;

        let now = chrono::Utc::now();
        let mut draft = published;
        draft.id = WorkflowId::new();
        draft.status = WorkflowStatus::Draft;
        draft.created_at = now;
        draft.updated_at = now;

        write_json(&self.workflow_path(draft.id), &draft).await?;
        Ok(draft)
    }

    async fn list_workflows(
        &self,
        opts: ListWorkflowsOptions,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let sort = match opts.sort_by.as_deref() {
            Some(field) => SortField::parse(field)?,
            None => SortField::CreatedAt,
        };

        let mut workflows: Vec<Workflow> = self
            .load_workflows()
            .await?
            .into_iter()
            .filter(|w| opts.owner.as_deref().is_none_or(|owner| w.owner == owner))
            .filter(|w| opts.status.is_none_or(|status| w.status == status))
            .collect();

        match sort {
            SortField::Name => workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
            SortField::CreatedAt => workflows.sort_by_key(|w| (w.created_at, w.id)),
            SortField::UpdatedAt => workflows.sort_by_key(|w| (w.updated_at, w.id)),
        }

        let skipped = workflows.into_iter().skip(opts.offset as usize);
        Ok(match opts.limit {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        })
    }
}

#[async_trait]
impl NodeRepository for FileStore {
    async fn get_nodes_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowNode>, RepositoryError> {
        Ok(self.require_workflow(workflow_id).await?.nodes)
    }

    async fn get_node_by_workflow(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Option<WorkflowNode>, RepositoryError> {
        Ok(self
            .require_workflow(workflow_id)
            .await?
            .nodes
            .into_iter()
            .find(|n| n.id == node_id))
    }

    async fn save_node(
        &self,
        workflow_id: WorkflowId,
        node: &WorkflowNode,
    ) -> Result<(), RepositoryError> {
        let node = node.clone();
        self.mutate_workflow(workflow_id, move |workflow| {
            match workflow.nodes.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => *existing = node,
                None => workflow.nodes.push(node),
            }
        })
        .await
    }

    async fn delete_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<bool, RepositoryError> {
        let mut removed = false;
        let mut workflow = self.require_workflow(workflow_id).await?;
        workflow.nodes.retain(|n| {
            let keep = n.id != node_id;
            removed |= !keep;
            keep
        });
        if removed {
            workflow.touch();
            write_json(&self.workflow_path(workflow_id), &workflow).await?;
        }
        Ok(removed)
    }

    async fn find_trigger_nodes(
        &self,
        source_id: &str,
        event_type: &str,
        provider_id: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<TriggerNodeMatch>, RepositoryError> {
        let mut matches = Vec::new();
        for workflow in self.load_workflows().await? {
            if workflow.status != status {
                continue;
            }
            for node in &workflow.nodes {
                if node.matches_source(source_id, event_type, provider_id) {
                    matches.push(TriggerNodeMatch {
                        workflow_id: workflow.id,
                        trigger_node: node.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl ConnectionRepository for FileStore {
    async fn get_connections_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Connection>, RepositoryError> {
        Ok(self.require_workflow(workflow_id).await?.connections)
    }

    async fn get_connections_by_source_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Vec<Connection>, RepositoryError> {
        Ok(self
            .require_workflow(workflow_id)
            .await?
            .connections
            .into_iter()
            .filter(|c| c.source_port.node_id == node_id)
            .collect())
    }

    async fn get_connections_by_target_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Vec<Connection>, RepositoryError> {
        Ok(self
            .require_workflow(workflow_id)
            .await?
            .connections
            .into_iter()
            .filter(|c| c.target_port.node_id == node_id)
            .collect())
    }

    async fn save_connection(
        &self,
        workflow_id: WorkflowId,
        connection: &Connection,
    ) -> Result<(), RepositoryError> {
        let connection = connection.clone();
        self.mutate_workflow(workflow_id, move |workflow| {
            match workflow
                .connections
                .iter_mut()
                .find(|c| c.id == connection.id)
            {
                Some(existing) => *existing = connection,
                None => workflow.connections.push(connection),
            }
        })
        .await
    }

    async fn delete_connection(
        &self,
        workflow_id: WorkflowId,
        connection_id: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        let mut removed = false;
        let mut workflow = self.require_workflow(workflow_id).await?;
        workflow.connections.retain(|c| {
            let keep = c.id != connection_id;
            removed |= !keep;
            keep
        });
        if removed {
            workflow.touch();
            write_json(&self.workflow_path(workflow_id), &workflow).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ExecutionContextRepository for FileStore {
    async fn save_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError> {
        write_json(&self.execution_path(context.id), context).await
    }

    async fn get_execution_context(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionContext>, RepositoryError> {
        read_json(&self.execution_path(id)).await
    }

    async fn update_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError> {
        let path = self.execution_path(context.id);
        if read_json::<ExecutionContext>(&path).await?.is_none() {
            return Err(RepositoryError::NotFound {
                entity: "execution context",
                id: context.id.to_string(),
            });
        }
        write_json(&path, context).await
    }

    async fn get_executions_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionContext>, RepositoryError> {
        Ok(self
            .load_dir::<ExecutionContext>(EXECUTIONS_DIR)
            .await?
            .into_iter()
            .filter(|c| c.published_workflow_id == workflow_id)
            .collect())
    }

    async fn get_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionContext>, RepositoryError> {
        Ok(self
            .load_dir::<ExecutionContext>(EXECUTIONS_DIR)
            .await?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }
}

#[async_trait]
impl InputCoordinationRepository for FileStore {
    async fn get_input_state(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        iteration: u64,
    ) -> Result<Option<InputCoordinationState>, RepositoryError> {
        read_json(&self.input_state_path(execution_id, node_id, iteration)).await
    }

    async fn save_input_state(
        &self,
        state: &InputCoordinationState,
    ) -> Result<(), RepositoryError> {
        write_json(
            &self.input_state_path(state.execution_id, state.node_id, state.iteration),
            state,
        )
        .await
    }

    async fn delete_input_states(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, RepositoryError> {
        let prefix = format!("{execution_id}_");
        let mut entries = tokio::fs::read_dir(self.root.join(INPUT_COORDINATION_DIR))
            .await
            .map_err(transient)?;

        let mut deleted = 0;
        while let Some(entry) = entries.next_entry().await.map_err(transient)? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                tokio::fs::remove_file(entry.path()).await.map_err(transient)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operion_workflow::WorkflowNode;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).await.expect("open store");
        (dir, store)
    }

    fn workflow_with_trigger(owner: &str) -> Workflow {
        Workflow::new("Morning report", owner).with_node(WorkflowNode::trigger(
            "Schedule",
            "trigger:scheduler",
            "sched-1",
            "scheduler",
            "ScheduleDue",
        ))
    }

    #[tokio::test]
    async fn workflow_save_get_delete_roundtrip() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");

        store.save(&workflow).await.unwrap();
        let loaded = store.get_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded, workflow);

        assert!(store.delete(workflow.id).await.unwrap());
        assert!(store.get_by_id(workflow.id).await.unwrap().is_none());
        assert!(!store.delete(workflow.id).await.unwrap());
    }

    #[tokio::test]
    async fn publish_swaps_published_peer() {
        let (_dir, store) = store().await;
        let v1 = workflow_with_trigger("alice");
        let mut v2 = workflow_with_trigger("alice");
        v2.group_id = v1.group_id;

        store.save(&v1).await.unwrap();
        store.save(&v2).await.unwrap();

        store.publish_workflow(v1.id).await.unwrap();
        store.publish_workflow(v2.id).await.unwrap();

        let group = store.load_group(v1.group_id).await.unwrap();
        let published: Vec<_> = group.iter().filter(|w| w.is_published()).collect();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, v2.id);

        let v1_after = store.get_by_id(v1.id).await.unwrap().unwrap();
        assert_eq!(v1_after.status, WorkflowStatus::Unpublished);
    }

    #[tokio::test]
    async fn publish_missing_workflow_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.publish_workflow(WorkflowId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn current_workflow_prefers_published_then_draft() {
        let (_dir, store) = store().await;
        let draft = workflow_with_trigger("alice");
        let mut published = workflow_with_trigger("alice");
        published.group_id = draft.group_id;

        store.save(&draft).await.unwrap();
        store.save(&published).await.unwrap();

        let current = store
            .get_current_workflow(draft.group_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, WorkflowStatus::Draft);

        store.publish_workflow(published.id).await.unwrap();
        let current = store
            .get_current_workflow(draft.group_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, published.id);
    }

    #[tokio::test]
    async fn draft_from_published_clones_the_graph() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");
        store.save(&workflow).await.unwrap();
        store.publish_workflow(workflow.id).await.unwrap();

        let draft = store
            .create_draft_from_published(workflow.group_id)
            .await
            .unwrap();
        assert_ne!(draft.id, workflow.id);
        assert_eq!(draft.group_id, workflow.group_id);
        assert_eq!(draft.status, WorkflowStatus::Draft);
        assert_eq!(draft.nodes, workflow.nodes);
    }

    #[tokio::test]
    async fn draft_from_unpublished_group_fails() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");
        store.save(&workflow).await.unwrap();

        let err = store
            .create_draft_from_published(workflow.group_id)
            .await
            .unwrap_err();
        assert!(err.is_group_error());
    }

    #[tokio::test]
    async fn list_filters_by_owner_and_status() {
        let (_dir, store) = store().await;
        let alice = workflow_with_trigger("alice");
        let bob = workflow_with_trigger("bob");
        store.save(&alice).await.unwrap();
        store.save(&bob).await.unwrap();
        store.publish_workflow(bob.id).await.unwrap();

        let drafts = store
            .list_workflows(ListWorkflowsOptions {
                status: Some(WorkflowStatus::Draft),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, alice.id);

        let bobs = store
            .list_workflows(ListWorkflowsOptions {
                owner: Some("bob".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, bob.id);
    }

    #[tokio::test]
    async fn list_rejects_disallowed_sort_field() {
        let (_dir, store) = store().await;
        let err = store
            .list_workflows(ListWorkflowsOptions {
                sort_by: Some("owner".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_invalid_sort_field());
    }

    #[tokio::test]
    async fn list_sorts_by_name_and_paginates() {
        let (_dir, store) = store().await;
        for name in ["charlie", "alpha", "bravo"] {
            let mut workflow = workflow_with_trigger("alice");
            workflow.name = name.to_string();
            store.save(&workflow).await.unwrap();
        }

        let page = store
            .list_workflows(ListWorkflowsOptions {
                sort_by: Some("name".to_string()),
                offset: 1,
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "bravo");
    }

    #[tokio::test]
    async fn trigger_match_requires_published_status() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");
        store.save(&workflow).await.unwrap();

        let matches = store
            .find_trigger_nodes("sched-1", "ScheduleDue", "scheduler", WorkflowStatus::Published)
            .await
            .unwrap();
        assert!(matches.is_empty());

        store.publish_workflow(workflow.id).await.unwrap();
        let matches = store
            .find_trigger_nodes("sched-1", "ScheduleDue", "scheduler", WorkflowStatus::Published)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].workflow_id, workflow.id);
    }

    #[tokio::test]
    async fn trigger_match_skips_disabled_nodes() {
        let (_dir, store) = store().await;
        let mut workflow = workflow_with_trigger("alice");
        workflow.nodes[0].enabled = false;
        store.save(&workflow).await.unwrap();
        store.publish_workflow(workflow.id).await.unwrap();

        let matches = store
            .find_trigger_nodes("sched-1", "ScheduleDue", "scheduler", WorkflowStatus::Published)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn trigger_match_is_exact_on_all_three_fields() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");
        store.save(&workflow).await.unwrap();
        store.publish_workflow(workflow.id).await.unwrap();

        for (source, event, provider) in [
            ("sched-2", "ScheduleDue", "scheduler"),
            ("sched-1", "Other", "scheduler"),
            ("sched-1", "ScheduleDue", "webhook"),
        ] {
            let matches = store
                .find_trigger_nodes(source, event, provider, WorkflowStatus::Published)
                .await
                .unwrap();
            assert!(matches.is_empty(), "unexpected match for {source}/{event}/{provider}");
        }
    }

    #[tokio::test]
    async fn node_repository_mutates_workflow_document() {
        let (_dir, store) = store().await;
        let workflow = workflow_with_trigger("alice");
        store.save(&workflow).await.unwrap();

        let action = WorkflowNode::action("Log", "log");
        store.save_node(workflow.id, &action).await.unwrap();

        let nodes = store.get_nodes_by_workflow(workflow.id).await.unwrap();
        assert_eq!(nodes.len(), 2);

        assert!(store.delete_node(workflow.id, action.id).await.unwrap());
        let nodes = store.get_nodes_by_workflow(workflow.id).await.unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn connection_queries_filter_by_endpoint() {
        let (_dir, store) = store().await;
        let trigger = WorkflowNode::trigger("t", "trigger:scheduler", "s", "p", "E");
        let action = WorkflowNode::action("a", "log");
        let connection = Connection::with_default_ports(trigger.id, action.id);
        let workflow = Workflow::new("wf", "alice")
            .with_node(trigger.clone())
            .with_node(action.clone())
            .with_connection(connection.clone());
        store.save(&workflow).await.unwrap();

        let from_trigger = store
            .get_connections_by_source_node(workflow.id, trigger.id)
            .await
            .unwrap();
        assert_eq!(from_trigger, vec![connection.clone()]);

        let into_trigger = store
            .get_connections_by_target_node(workflow.id, trigger.id)
            .await
            .unwrap();
        assert!(into_trigger.is_empty());

        assert!(
            store
                .delete_connection(workflow.id, connection.id)
                .await
                .unwrap()
        );
        let remaining = store.get_connections_by_workflow(workflow.id).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn execution_context_lifecycle() {
        let (_dir, store) = store().await;
        let workflow_id = WorkflowId::new();
        let mut context =
            ExecutionContext::new(ExecutionId::new(), workflow_id, serde_json::Map::new());

        store.save_execution_context(&context).await.unwrap();
        let loaded = store
            .get_execution_context(context.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);

        context.complete();
        store.update_execution_context(&context).await.unwrap();

        let by_status = store
            .get_executions_by_status(ExecutionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);

        let by_workflow = store.get_executions_by_workflow(workflow_id).await.unwrap();
        assert_eq!(by_workflow.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unsaved_context_is_not_found() {
        let (_dir, store) = store().await;
        let context =
            ExecutionContext::new(ExecutionId::new(), WorkflowId::new(), serde_json::Map::new());
        let err = store.update_execution_context(&context).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn input_states_roundtrip_and_cleanup() {
        let (_dir, store) = store().await;
        let execution_id = ExecutionId::new();
        let node_id = NodeId::new();

        let mut state = InputCoordinationState::new(execution_id, node_id);
        state
            .received
            .insert("item".to_string(), serde_json::json!(1));
        store.save_input_state(&state).await.unwrap();

        let loaded = store
            .get_input_state(execution_id, node_id, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, state);

        // A second iteration is a distinct record.
        state.iteration = 1;
        store.save_input_state(&state).await.unwrap();

        assert_eq!(store.delete_input_states(execution_id).await.unwrap(), 2);
        assert!(
            store
                .get_input_state(execution_id, node_id, 0)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn input_states_do_not_touch_execution_documents() {
        let (_dir, store) = store().await;
        let context =
            ExecutionContext::new(ExecutionId::new(), WorkflowId::new(), serde_json::Map::new());
        store.save_execution_context(&context).await.unwrap();

        let state = InputCoordinationState::new(context.id, NodeId::new());
        store.save_input_state(&state).await.unwrap();
        store.delete_input_states(context.id).await.unwrap();

        assert!(
            store
                .get_execution_context(context.id)
                .await
                .unwrap()
                .is_some()
        );
    }
}

//! Postgres storage backend.
//!
//! Workflows and execution contexts are stored as JSONB documents with the
//! filterable columns (status, owner, timestamps) denormalized alongside.
//! Trigger nodes are additionally denormalized into the `trigger_nodes`
//! table on every workflow write, so
//! [`find_trigger_nodes`](crate::traits::NodeRepository::find_trigger_nodes)
//! is a single indexed lookup regardless of how many workflows exist.

use crate::error::{RepositoryError, WorkflowGroupError};
use crate::traits::{
    ConnectionRepository, ExecutionContextRepository, InputCoordinationRepository,
    InputCoordinationState, ListWorkflowsOptions, NodeRepository, SortField, TriggerNodeMatch,
    WorkflowRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use operion_core::{ConnectionId, ExecutionId, WorkflowGroupId, WorkflowId};
use operion_workflow::{
    Connection, ExecutionContext, ExecutionStatus, NodeId, Workflow, WorkflowNode, WorkflowStatus,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;

fn db_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => RepositoryError::Corrupt {
            message: e.to_string(),
        },
        other => RepositoryError::Transient {
            message: other.to_string(),
        },
    }
}

fn sort_column(sort: SortField) -> &'static str {
    match sort {
        SortField::Name => "name",
        SortField::CreatedAt => "created_at",
        SortField::UpdatedAt => "updated_at",
    }
}

#[derive(FromRow)]
struct WorkflowRow {
    document: Json<Workflow>,
}

#[derive(FromRow)]
struct TriggerNodeRow {
    workflow_id: String,
    node: Json<WorkflowNode>,
}

#[derive(FromRow)]
struct ExecutionRow {
    document: Json<ExecutionContext>,
}

#[derive(FromRow)]
struct InputStateRow {
    state: Json<InputCoordinationState>,
}

/// Postgres-backed implementation of all repository contracts.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at the given URL.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool))
    }

    /// Runs the schema migrations.
    ///
    /// # Errors
    ///
    /// Returns a transient error if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Transient {
                message: e.to_string(),
            })
    }

    /// Writes a workflow row and rebuilds its trigger index within `tx`.
    async fn write_workflow(
        tx: &mut Transaction<'_, Postgres>,
        workflow: &Workflow,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, group_id, name, status, owner, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                group_id = EXCLUDED.group_id,
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                owner = EXCLUDED.owner,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.group_id.to_string())
        .bind(&workflow.name)
        .bind(workflow.status.as_str())
        .bind(&workflow.owner)
        .bind(Json(workflow))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;

        sqlx::query("DELETE FROM trigger_nodes WHERE workflow_id = $1")
            .bind(workflow.id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;

        for node in workflow.trigger_nodes() {
            if !node.has_source_binding() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO trigger_nodes
                    (workflow_id, node_id, source_id, provider_id, event_type, enabled, workflow_status, node)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(workflow.id.to_string())
            .bind(node.id.to_string())
            .bind(node.source_id.as_deref().unwrap_or_default())
            .bind(node.provider_id.as_deref().unwrap_or_default())
            .bind(node.event_type.as_deref().unwrap_or_default())
            .bind(node.enabled)
            .bind(workflow.status.as_str())
            .bind(Json(node))
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        }

        Ok(())
    }

    async fn fetch_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row: Option<WorkflowRow> =
            sqlx::query_as("SELECT document FROM workflows WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|r| r.document.0))
    }

    async fn require_workflow(&self, id: WorkflowId) -> Result<Workflow, RepositoryError> {
        self.fetch_workflow(id)
            .await?
            .ok_or_else(|| RepositoryError::workflow_not_found(id))
    }

    async fn fetch_group_workflow(
        &self,
        group_id: WorkflowGroupId,
        status: WorkflowStatus,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            "SELECT document FROM workflows WHERE group_id = $1 AND status = $2 LIMIT 1",
        )
        .bind(group_id.to_string())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(|r| r.document.0))
    }

    /// Loads, mutates, and rewrites one workflow document in a
    /// transaction, refreshing its trigger index.
    async fn mutate_workflow(
        &self,
        id: WorkflowId,
        apply: impl FnOnce(&mut Workflow) + Send,
    ) -> Result<Workflow, RepositoryError> {
        let mut workflow = self.require_workflow(id).await?;
        apply(&mut workflow);
        workflow.touch();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        Self::write_workflow(&mut tx, &workflow).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(workflow)
    }
}

#[async_trait]
impl WorkflowRepository for PgStore {
    async fn get_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        self.fetch_workflow(id).await
    }

    async fn get_all(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let rows: Vec<WorkflowRow> =
            sqlx::query_as("SELECT document FROM workflows ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        Self::write_workflow(&mut tx, workflow).await?;
        tx.commit().await.map_err(db_error)
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_published_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        self.fetch_group_workflow(group_id, WorkflowStatus::Published)
            .await
    }

    async fn get_draft_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        self.fetch_group_workflow(group_id, WorkflowStatus::Draft)
            .await
    }

    async fn get_current_workflow(
        &self,
        group_id: WorkflowGroupId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        if let Some(published) = self.get_published_workflow(group_id).await? {
            return Ok(Some(published));
        }
        if let Some(draft) = self.get_draft_workflow(group_id).await? {
            return Ok(Some(draft));
        }

        let row: Option<WorkflowRow> = sqlx::query_as(
            "SELECT document FROM workflows WHERE group_id = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(|r| r.document.0))
    }

    async fn publish_workflow(&self, id: WorkflowId) -> Result<Workflow, RepositoryError> {
        let mut target = self.require_workflow(id).await?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let peers: Vec<WorkflowRow> = sqlx::query_as(
            "SELECT document FROM workflows WHERE group_id = $1 AND status = $2 AND id <> $3",
        )
        .bind(target.group_id.to_string())
        .bind(WorkflowStatus::Published.as_str())
        .bind(target.id.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        for row in peers {
            let mut peer = row.document.0;
            peer.mark_unpublished();
            Self::write_workflow(&mut tx, &peer).await?;
        }

        target.mark_published();
        Self::write_workflow(&mut tx, &target).await?;

        tx.commit().await.map_err(db_error)?;
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

        let now = Utc::now();
        let mut draft = published;
        draft.id = WorkflowId::new();
        draft.status = WorkflowStatus::Draft;
        draft.created_at = now;
        draft.updated_at = now;

        self.save(&draft).await?;
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

        // The sort column comes from the closed allowlist, never from the
        // caller's string.
        let query = format!(
            r#"
            SELECT document FROM workflows
            WHERE ($1::text IS NULL OR owner = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY {}, id
            OFFSET $3 LIMIT $4
            "#,
            sort_column(sort)
        );

        let rows: Vec<WorkflowRow> = sqlx::query_as(&query)
            .bind(opts.owner)
            .bind(opts.status.map(|s| s.as_str().to_string()))
            .bind(opts.offset as i64)
            .bind(opts.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }
}

#[async_trait]
impl NodeRepository for PgStore {
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
        .await?;
        Ok(())
    }

    async fn delete_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<bool, RepositoryError> {
        let before = self.require_workflow(workflow_id).await?.nodes.len();
        let after = self
            .mutate_workflow(workflow_id, move |workflow| {
                workflow.nodes.retain(|n| n.id != node_id);
            })
            .await?
            .nodes
            .len();
        Ok(after < before)
    }

    async fn find_trigger_nodes(
        &self,
        source_id: &str,
        event_type: &str,
        provider_id: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<TriggerNodeMatch>, RepositoryError> {
        let rows: Vec<TriggerNodeRow> = sqlx::query_as(
            r#"
            SELECT workflow_id, node FROM trigger_nodes
            WHERE source_id = $1
              AND event_type = $2
              AND provider_id = $3
              AND enabled
              AND workflow_status = $4
            "#,
        )
        .bind(source_id)
        .bind(event_type)
        .bind(provider_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|row| {
                let workflow_id =
                    WorkflowId::from_str(&row.workflow_id).map_err(|e| RepositoryError::Corrupt {
                        message: format!("invalid workflow id '{}': {e}", row.workflow_id),
                    })?;
                Ok(TriggerNodeMatch {
                    workflow_id,
                    trigger_node: row.node.0,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConnectionRepository for PgStore {
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
        .await?;
        Ok(())
    }

    async fn delete_connection(
        &self,
        workflow_id: WorkflowId,
        connection_id: ConnectionId,
    ) -> Result<bool, RepositoryError> {
        let before = self.require_workflow(workflow_id).await?.connections.len();
        let after = self
            .mutate_workflow(workflow_id, move |workflow| {
                workflow.connections.retain(|c| c.id != connection_id);
            })
            .await?
            .connections
            .len();
        Ok(after < before)
    }
}

#[async_trait]
impl ExecutionContextRepository for PgStore {
    async fn save_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO execution_contexts
                (id, published_workflow_id, status, document, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                document = EXCLUDED.document,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(context.id.to_string())
        .bind(context.published_workflow_id.to_string())
        .bind(status_str(context.status))
        .bind(Json(context))
        .bind(context.created_at)
        .bind(context.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_execution_context(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionContext>, RepositoryError> {
        let row: Option<ExecutionRow> =
            sqlx::query_as("SELECT document FROM execution_contexts WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|r| r.document.0))
    }

    async fn update_execution_context(
        &self,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE execution_contexts
            SET status = $2, document = $3, completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(context.id.to_string())
        .bind(status_str(context.status))
        .bind(Json(context))
        .bind(context.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "execution context",
                id: context.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_executions_by_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionContext>, RepositoryError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT document FROM execution_contexts
            WHERE published_workflow_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }

    async fn get_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionContext>, RepositoryError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT document FROM execution_contexts
            WHERE status = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(status_str(status))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }
}

#[async_trait]
impl InputCoordinationRepository for PgStore {
    async fn get_input_state(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        iteration: u64,
    ) -> Result<Option<InputCoordinationState>, RepositoryError> {
        let row: Option<InputStateRow> = sqlx::query_as(
            r#"
            SELECT state FROM input_coordination
            WHERE execution_id = $1 AND node_id = $2 AND iteration = $3
            "#,
        )
        .bind(execution_id.to_string())
        .bind(node_id.to_string())
        .bind(iteration as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(|r| r.state.0))
    }

    async fn save_input_state(
        &self,
        state: &InputCoordinationState,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO input_coordination (execution_id, node_id, iteration, state, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (execution_id, node_id, iteration) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.execution_id.to_string())
        .bind(state.node_id.to_string())
        .bind(state.iteration as i64)
        .bind(Json(state))
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_input_states(
        &self,
        execution_id: ExecutionId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM input_coordination WHERE execution_id = $1")
            .bind(execution_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
        ExecutionStatus::Timeout => "timeout",
        ExecutionStatus::Paused => "paused",
    }
}

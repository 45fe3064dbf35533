//! # PostgreSQL Store
//!
//! SQLx-backed [`TransactionalStore`]. Schema lives in `migrations/`.
//!
//! Snapshot ordering relies on `sequence BIGSERIAL`, which PostgreSQL hands
//! out monotonically, and on `created_at` being written by the engine rather
//! than defaulted per statement.

use super::store::{StoreTransaction, TransactionalStore};
use super::{StoreError, StoreResult};
use crate::constants::ExecutionStatus;
use crate::models::{
    CompletedWaitpoint, ExecutionSnapshot, NewExecutionSnapshot, RuntimeEnvironmentType, TaskRun,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;

const SNAPSHOT_COLUMNS: &str = r#"
    id, sequence, run_id, execution_status, description, created_at,
    batch_id, checkpoint_id, worker_id, runner_id, environment_id, environment_type
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("begin", e))?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: String,
    sequence: i64,
    run_id: String,
    execution_status: String,
    description: String,
    created_at: DateTime<Utc>,
    batch_id: Option<String>,
    checkpoint_id: Option<String>,
    worker_id: Option<String>,
    runner_id: Option<String>,
    environment_id: String,
    environment_type: String,
}

#[derive(Debug, FromRow)]
struct WaitpointRow {
    snapshot_id: String,
    waitpoint_id: String,
    waitpoint_index: Option<i32>,
}

impl SnapshotRow {
    fn into_snapshot(
        self,
        completed_waitpoints: Vec<CompletedWaitpoint>,
    ) -> StoreResult<ExecutionSnapshot> {
        let execution_status = self
            .execution_status
            .parse::<ExecutionStatus>()
            .map_err(|e| StoreError::decode("execution_snapshot", e))?;
        let environment_type = self
            .environment_type
            .parse::<RuntimeEnvironmentType>()
            .map_err(|e| StoreError::decode("execution_snapshot", e))?;

        Ok(ExecutionSnapshot {
            id: self.id,
            sequence: self.sequence,
            run_id: self.run_id,
            execution_status,
            description: self.description,
            created_at: self.created_at,
            batch_id: self.batch_id,
            checkpoint_id: self.checkpoint_id,
            completed_waitpoints,
            worker_id: self.worker_id,
            runner_id: self.runner_id,
            environment_id: self.environment_id,
            environment_type,
        })
    }
}

impl PgStoreTransaction {
    async fn load_waitpoints(
        &mut self,
        snapshot_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<CompletedWaitpoint>>> {
        if snapshot_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, WaitpointRow>(
            r#"
            SELECT snapshot_id, waitpoint_id, waitpoint_index
            FROM task_run_execution_snapshot_waitpoints
            WHERE snapshot_id = ANY($1)
            ORDER BY snapshot_id, position
            "#,
        )
        .bind(snapshot_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("load_waitpoints", e))?;

        let mut grouped: HashMap<String, Vec<CompletedWaitpoint>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.snapshot_id)
                .or_default()
                .push(CompletedWaitpoint {
                    id: row.waitpoint_id,
                    index: row.waitpoint_index,
                });
        }
        Ok(grouped)
    }

    async fn hydrate(&mut self, rows: Vec<SnapshotRow>) -> StoreResult<Vec<ExecutionSnapshot>> {
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut waitpoints = self.load_waitpoints(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let completed = waitpoints.remove(&row.id).unwrap_or_default();
                row.into_snapshot(completed)
            })
            .collect()
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_task_run(&mut self, run: &TaskRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_runs
            (id, runtime_environment_id, organization_id, project_id, task_identifier,
             queue, master_queue, secondary_master_queue, concurrency_key, attempt_number, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&run.id)
        .bind(&run.runtime_environment_id)
        .bind(&run.organization_id)
        .bind(&run.project_id)
        .bind(&run.task_identifier)
        .bind(&run.queue)
        .bind(&run.master_queue)
        .bind(&run.secondary_master_queue)
        .bind(&run.concurrency_key)
        .bind(run.attempt_number)
        .bind(run.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::duplicate("task_run", run.id.clone())
            }
            other => StoreError::database("insert_task_run", other),
        })?;
        Ok(())
    }

    async fn find_task_run(&mut self, run_id: &str) -> StoreResult<Option<TaskRun>> {
        sqlx::query_as::<_, TaskRun>(
            r#"
            SELECT id, runtime_environment_id, organization_id, project_id, task_identifier,
                   queue, master_queue, secondary_master_queue, concurrency_key,
                   attempt_number, created_at
            FROM task_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("find_task_run", e))
    }

    async fn insert_execution_snapshot(
        &mut self,
        snapshot: NewExecutionSnapshot,
    ) -> StoreResult<ExecutionSnapshot> {
        let (sequence, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO task_run_execution_snapshots
            (id, run_id, execution_status, description, created_at, batch_id, checkpoint_id,
             worker_id, runner_id, environment_id, environment_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING sequence, created_at
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.run_id)
        .bind(snapshot.execution_status.as_str())
        .bind(&snapshot.description)
        .bind(snapshot.created_at)
        .bind(&snapshot.batch_id)
        .bind(&snapshot.checkpoint_id)
        .bind(&snapshot.worker_id)
        .bind(&snapshot.runner_id)
        .bind(&snapshot.environment_id)
        .bind(snapshot.environment_type.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("insert_execution_snapshot", e))?;

        for (position, waitpoint) in snapshot.completed_waitpoints.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|e| StoreError::database("insert_snapshot_waitpoint", e))?;
            sqlx::query(
                r#"
                INSERT INTO task_run_execution_snapshot_waitpoints
                (snapshot_id, waitpoint_id, waitpoint_index, position)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&snapshot.id)
            .bind(&waitpoint.id)
            .bind(waitpoint.index)
            .bind(position)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::database("insert_snapshot_waitpoint", e))?;
        }

        let mut stored = ExecutionSnapshot::from_new(snapshot, sequence);
        // PostgreSQL keeps microseconds; report what was stored
        stored.created_at = created_at;
        Ok(stored)
    }

    async fn latest_execution_snapshot(
        &mut self,
        run_id: &str,
    ) -> StoreResult<Option<ExecutionSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM task_run_execution_snapshots \
             WHERE run_id = $1 ORDER BY created_at DESC, sequence DESC LIMIT 1"
        ))
        .bind(run_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("latest_execution_snapshot", e))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn execution_snapshots(&mut self, run_id: &str) -> StoreResult<Vec<ExecutionSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM task_run_execution_snapshots \
             WHERE run_id = $1 ORDER BY created_at ASC, sequence ASC"
        ))
        .bind(run_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("execution_snapshots", e))?;

        self.hydrate(rows).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::database("commit", e))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::database("rollback", e))
    }
}

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::workloads::model::{NewWorkload, TerminationSource, Workload, WorkloadStatus};

/// Persistence for workload rows and their status state machine.
///
/// Every mutation is a single conditional UPDATE keyed on the expected prior
/// status, so two dataplanes racing on the same row resolve at the storage
/// layer: exactly one statement matches, the loser gets `None` back. A `None`
/// is not an error; callers re-read current state if they care why.
#[derive(Clone)]
pub struct WorkloadsRepo {
    pool: PgPool,
}

impl WorkloadsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, workload: NewWorkload) -> anyhow::Result<Workload> {
        let created = sqlx::query_as::<_, Workload>(
            r#"
            INSERT INTO workloads (
                id, workload_type, status,
                dataplane_group, priority, mutex_key,
                input_payload, signal_input, log_path,
                workspace_id, organization_id, labels
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(&workload.id)
        .bind(workload.workload_type.as_str())
        .bind(WorkloadStatus::Pending.as_str())
        .bind(&workload.dataplane_group)
        .bind(workload.priority)
        .bind(&workload.mutex_key)
        .bind(&workload.input_payload)
        .bind(&workload.signal_input)
        .bind(&workload.log_path)
        .bind(workload.workspace_id)
        .bind(workload.organization_id)
        .bind(Json(workload.labels))
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<Workload>> {
        let workload = sqlx::query_as::<_, Workload>("SELECT * FROM workloads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(workload)
    }

    /// Exclusive assignment of a pending workload to one dataplane.
    ///
    /// Re-claiming by the owner is idempotent and does NOT refresh the
    /// deadline: the original lease stands. A claim held by another dataplane,
    /// or any status past CLAIMED, matches nothing.
    pub async fn claim(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> anyhow::Result<Option<Workload>> {
        let claimed = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = 'claimed',
                dataplane_id = $2,
                deadline = CASE WHEN status = 'pending' THEN $3 ELSE deadline END,
                updated_at = now()
            WHERE id = $1
              AND (status = 'pending' OR (status = 'claimed' AND dataplane_id = $2))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(dataplane_id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    pub async fn launch(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> anyhow::Result<Option<Workload>> {
        let launched = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = 'launched',
                deadline = $2,
                updated_at = now()
            WHERE id = $1
              AND status IN ('claimed', 'launched')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await?;

        Ok(launched)
    }

    /// LAUNCHED is not a prerequisite here: a fast orchestrator can report
    /// running straight out of CLAIMED.
    pub async fn running(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> anyhow::Result<Option<Workload>> {
        let running = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = 'running',
                deadline = $2,
                updated_at = now()
            WHERE id = $1
              AND status IN ('claimed', 'launched', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await?;

        Ok(running)
    }

    /// As `running`, plus a heartbeat stamp. A heartbeat against a terminal
    /// workload matches nothing, which is how cooperative cancellation stops
    /// a runner that missed the cancel.
    pub async fn heartbeat(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> anyhow::Result<Option<Workload>> {
        let beat = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = 'running',
                deadline = $2,
                last_heartbeat_at = now(),
                updated_at = now()
            WHERE id = $1
              AND status IN ('claimed', 'launched', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await?;

        Ok(beat)
    }

    pub async fn succeed(&self, id: &str) -> anyhow::Result<Option<Workload>> {
        let done = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = 'success',
                deadline = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(non_terminal_statuses())
        .fetch_optional(&self.pool)
        .await?;

        Ok(done)
    }

    pub async fn fail(
        &self,
        id: &str,
        reason: &str,
        source: TerminationSource,
    ) -> anyhow::Result<Option<Workload>> {
        self.terminate(id, WorkloadStatus::Failure, reason, source)
            .await
    }

    pub async fn cancel(
        &self,
        id: &str,
        reason: &str,
        source: TerminationSource,
    ) -> anyhow::Result<Option<Workload>> {
        self.terminate(id, WorkloadStatus::Cancelled, reason, source)
            .await
    }

    async fn terminate(
        &self,
        id: &str,
        status: WorkloadStatus,
        reason: &str,
        source: TerminationSource,
    ) -> anyhow::Result<Option<Workload>> {
        let terminated = sqlx::query_as::<_, Workload>(
            r#"
            UPDATE workloads
            SET status = $2,
                deadline = NULL,
                termination_reason = $3,
                termination_source = $4,
                updated_at = now()
            WHERE id = $1
              AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason)
        .bind(source.as_str())
        .bind(non_terminal_statuses())
        .fetch_optional(&self.pool)
        .await?;

        Ok(terminated)
    }

    /// Sweep claimed/launched/running workloads whose lease expired without a
    /// heartbeat and fail them. Bounded per invocation so the sweep never
    /// monopolizes the table.
    pub async fn fail_expired(&self, limit: i64) -> anyhow::Result<Vec<Workload>> {
        let expired = sqlx::query_as::<_, Workload>(
            r#"
            WITH expired AS (
                SELECT id
                FROM workloads
                WHERE status = ANY($1)
                  AND deadline IS NOT NULL
                  AND deadline < now()
                ORDER BY deadline ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE workloads w
            SET status = 'failure',
                deadline = NULL,
                termination_reason = 'deadline exceeded without heartbeat',
                termination_source = $3,
                updated_at = now()
            FROM expired e
            WHERE w.id = e.id
            RETURNING w.*
            "#,
        )
        .bind(active_statuses())
        .bind(limit)
        .bind(TerminationSource::Monitor.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(expired)
    }

    /// In-flight workloads competing for the same exclusive resource.
    pub async fn list_active_with_mutex_key(&self, key: &str) -> anyhow::Result<Vec<Workload>> {
        let rows = sqlx::query_as::<_, Workload>(
            r#"
            SELECT *
            FROM workloads
            WHERE mutex_key = $1
              AND status = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(key)
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

fn active_statuses() -> Vec<String> {
    WorkloadStatus::active().iter().map(|s| s.to_string()).collect()
}

fn non_terminal_statuses() -> Vec<String> {
    WorkloadStatus::non_terminal()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

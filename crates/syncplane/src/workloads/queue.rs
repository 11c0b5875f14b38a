use sqlx::PgPool;

use crate::workloads::model::Workload;

/// How long acknowledged entries linger before the cleanup sweep may delete
/// them.
const DEFAULT_RETENTION_DAYS: i32 = 7;

/// Lease queue layered on top of workload rows.
///
/// Queue membership lives in its own table keyed by workload id. An entry is
/// a poll candidate while it is unacknowledged and its poll deadline (if any)
/// has lapsed; delivery is therefore at-least-once. Partitioning is always by
/// the exact (dataplane_group, priority) pair.
#[derive(Clone)]
pub struct WorkloadQueueRepo {
    pool: PgPool,
    retention_days: i32,
}

impl WorkloadQueueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(pool: PgPool, retention_days: i32) -> Self {
        Self {
            pool,
            retention_days,
        }
    }

    /// Insert a queue entry for a workload.
    ///
    /// Idempotent per workload id: re-enqueueing a queued, un-acked entry is
    /// a no-op and never duplicates delivery. An already-acked entry is
    /// re-armed instead, so a finished workload can be queued again.
    /// Returns whether the entry is newly live.
    pub async fn enqueue(
        &self,
        dataplane_group: &str,
        priority: i32,
        workload_id: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO workload_queue (workload_id, dataplane_group, priority)
            VALUES ($1, $2, $3)
            ON CONFLICT (workload_id) DO UPDATE
            SET dataplane_group = EXCLUDED.dataplane_group,
                priority = EXCLUDED.priority,
                enqueued_at = now(),
                poll_deadline = NULL,
                acked_at = NULL
            WHERE workload_queue.acked_at IS NOT NULL
            "#,
        )
        .bind(workload_id)
        .bind(dataplane_group)
        .bind(priority)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Deliver up to `quantity` workloads from one (group, priority)
    /// partition.
    ///
    /// Selected entries are withheld from other pollers for
    /// `redelivery_window_secs`; with a window of 0 they are eligible again
    /// on the very next poll. Unacknowledged entries whose window lapsed are
    /// redelivered. Candidates are locked with SKIP LOCKED so concurrent
    /// pollers on the same partition never receive the same entry within one
    /// window.
    pub async fn poll(
        &self,
        dataplane_group: &str,
        priority: i32,
        quantity: i64,
        redelivery_window_secs: i64,
    ) -> anyhow::Result<Vec<Workload>> {
        let delivered = sqlx::query_as::<_, Workload>(
            r#"
            WITH candidates AS (
                SELECT workload_id
                FROM workload_queue
                WHERE dataplane_group = $1
                  AND priority = $2
                  AND acked_at IS NULL
                  AND (poll_deadline IS NULL OR poll_deadline < now())
                ORDER BY enqueued_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $3
            ),
            delivered AS (
                UPDATE workload_queue q
                SET poll_deadline = now() + make_interval(secs => $4::double precision)
                FROM candidates c
                WHERE q.workload_id = c.workload_id
                RETURNING q.workload_id, q.enqueued_at
            )
            SELECT w.*
            FROM workloads w
            JOIN delivered d ON d.workload_id = w.id
            ORDER BY d.enqueued_at ASC
            "#,
        )
        .bind(dataplane_group)
        .bind(priority)
        .bind(quantity)
        .bind(redelivery_window_secs)
        .fetch_all(&self.pool)
        .await?;

        Ok(delivered)
    }

    /// Acknowledge a delivered entry: it leaves the candidate pool for good,
    /// regardless of window state. Returns false when there was nothing
    /// un-acked to acknowledge.
    pub async fn ack(&self, workload_id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE workload_queue
            SET acked_at = now()
            WHERE workload_id = $1
              AND acked_at IS NULL
            "#,
        )
        .bind(workload_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Delete up to `limit` acknowledged entries older than the retention
    /// window. Un-acked entries are never touched, whatever the limit.
    pub async fn clean_up_acked_entries(&self, limit: i64) -> anyhow::Result<u64> {
        let deleted = sqlx::query(
            r#"
            WITH victims AS (
                SELECT workload_id
                FROM workload_queue
                WHERE acked_at IS NOT NULL
                  AND acked_at < now() - make_interval(days => $1)
                ORDER BY acked_at ASC
                LIMIT $2
            )
            DELETE FROM workload_queue q
            USING victims v
            WHERE q.workload_id = v.workload_id
            "#,
        )
        .bind(self.retention_days)
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }

    /// Poll-candidate count for one partition, for backlog visibility.
    pub async fn depth(&self, dataplane_group: &str, priority: i32) -> anyhow::Result<i64> {
        let depth: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM workload_queue
            WHERE dataplane_group = $1
              AND priority = $2
              AND acked_at IS NULL
              AND (poll_deadline IS NULL OR poll_deadline < now())
            "#,
        )
        .bind(dataplane_group)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;

        Ok(depth)
    }
}

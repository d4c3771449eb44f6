//! The async-dispatch facade: the thin entry point callers use to enqueue
//! fire-and-forget work, without needing to know about claiming, retries,
//! or any other Worker Pool concern.

use chrono::{DateTime, Utc};
use serde::Serialize;

use queue_core::{JobId, NewJob, PgQueueStore, StoreResult};

/// A thin wrapper around `PgQueueStore` exposing only what a caller
/// enqueueing work needs: no claim, complete, fail, retry, or cancel.
#[derive(Clone)]
pub struct AsyncDispatcher {
    queue: String,
    store: PgQueueStore,
}

impl AsyncDispatcher {
    pub fn new(queue: impl Into<String>, store: PgQueueStore) -> Self {
        Self {
            queue: queue.into(),
            store,
        }
    }

    /// Enqueue `job_type` with `payload` at default priority, eligible
    /// immediately.
    pub async fn execute<P: Serialize>(&self, job_type: &str, payload: &P) -> StoreResult<JobId> {
        let job = NewJob::from_payload(&self.queue, job_type, payload)?;
        self.store.enqueue(job).await
    }

    /// Enqueue with an explicit priority, eligible immediately.
    pub async fn execute_with_priority<P: Serialize>(
        &self,
        job_type: &str,
        payload: &P,
        priority: i32,
    ) -> StoreResult<JobId> {
        let job = NewJob::from_payload(&self.queue, job_type, payload)?;
        self.store.enqueue_with_priority(job, priority).await
    }

    /// Enqueue eligible no earlier than `run_at`.
    pub async fn execute_at<P: Serialize>(
        &self,
        job_type: &str,
        payload: &P,
        run_at: DateTime<Utc>,
    ) -> StoreResult<JobId> {
        let job = NewJob::from_payload(&self.queue, job_type, payload)?;
        self.store.schedule(job, run_at).await
    }
}

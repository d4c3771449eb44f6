//! A single worker: claims one job at a time from a queue and dispatches it
//! to the handler registered for its job type.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use queue_core::{
    HandlerRegistry, HealthHandle, Job, MetricsRegistry, Outcome, PgQueueStore, StoreError,
};

/// Polls a single queue and runs whichever handler is registered for each
/// claimed job's type. A `WorkerPool` runs many of these concurrently, each
/// with its own identity, so claims never collide (`claim` uses
/// `FOR UPDATE SKIP LOCKED`).
pub struct Worker {
    name: String,
    queue: String,
    poll_interval: Duration,
    store: PgQueueStore,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<MetricsRegistry>,
    liveness: HealthHandle,
}

impl Worker {
    pub fn new(
        name: String,
        queue: String,
        poll_interval: Duration,
        store: PgQueueStore,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<MetricsRegistry>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name,
            queue,
            poll_interval,
            store,
            registry,
            metrics,
            liveness,
        }
    }

    /// Run until `cancel` fires. A job already dispatched to a handler is
    /// allowed to run to completion; cancellation is only observed between
    /// claims and inside cooperative handlers that check the token
    /// themselves.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            match self.wait_for_job(&cancel).await {
                Some(job) => self.process(job, cancel.clone()).await,
                None => return,
            }
        }
    }

    /// Claim a job, retrying every `poll_interval` while none is available
    /// or the store errors. A fresh interval is built on each call, so the
    /// first claim attempt after returning from a prior job fires
    /// immediately rather than waiting out a leftover tick; only repeated
    /// empty/erroring attempts are throttled. Returns `None` once `cancel`
    /// fires.
    async fn wait_for_job(&self, cancel: &CancellationToken) -> Option<Job> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return None;
                }
                _ = interval.tick() => {}
            }

            self.liveness.report_healthy().await;

            match self.store.claim(&self.name, &self.queue).await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => {}
                Err(error) => {
                    error!("worker {} failed to claim a job: {}", self.name, error);
                }
            }
        }
    }

    async fn process(&self, job: Job, cancel: CancellationToken) {
        let job_type = job.job_type.clone();

        let handler = match self.registry.get(&job_type).await {
            Ok(handler) => handler,
            Err(error) => {
                warn!("{}", error);
                if let Err(store_error) = self
                    .store
                    .fail(job.id, &format!("unroutable job: {error}"))
                    .await
                {
                    error!("failed to fail unroutable job {}: {}", job.id, store_error);
                }
                return;
            }
        };

        let started = Instant::now();
        let result = handler.handle(&job.payload.0, cancel).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.metrics.record(&job_type, Outcome::Success, elapsed).await;
                if let Err(error) = self.store.complete(job.id).await {
                    error!("failed to complete job {}: {}", job.id, error);
                }
            }
            Err(handler_error) => {
                self.metrics.record(&job_type, Outcome::Failure, elapsed).await;
                self.finish_failed_attempt(&job, &job_type, &handler_error.message).await;
            }
        }
    }

    async fn finish_failed_attempt(&self, job: &Job, job_type: &str, message: &str) {
        if job.is_gte_max_attempts() {
            if let Err(error) = self.store.fail(job.id, message).await {
                error!("failed to fail job {}: {}", job.id, error);
            }
            return;
        }

        match self.store.retry(job.id).await {
            Ok(()) => self.metrics.record_retry(job_type).await,
            Err(StoreError::NotFound(id)) => {
                // Attempts were exhausted between our check and the retry
                // query (a concurrent claim bumped `attempts`); fall back
                // to failing the job outright.
                if let Err(error) = self.store.fail(id, message).await {
                    error!("failed to fail job {} after a lost retry race: {}", id, error);
                }
            }
            Err(error) => error!("failed to retry job {}: {}", job.id, error),
        }
    }
}

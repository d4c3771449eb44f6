//! The Worker Pool: `worker_count` independent workers claiming from the
//! same queue, started and stopped together.

use std::sync::Arc;
use std::time::Duration;

use time::Duration as HealthDuration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use queue_core::{
    HandlerRegistry, HealthRegistry, JobHandler, MetricsRegistry, PgQueueStore, QueueStats,
    StoreResult,
};

use crate::worker::Worker;

/// Owns a fleet of `Worker`s, all polling the same queue under distinct
/// identities. `register_handler` may be called before or after `start`.
pub struct WorkerPool {
    queue: String,
    worker_count: usize,
    poll_interval: Duration,
    store: PgQueueStore,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<MetricsRegistry>,
    health: HealthRegistry,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: impl Into<String>,
        worker_count: usize,
        poll_interval: Duration,
        store: PgQueueStore,
        health: HealthRegistry,
    ) -> Self {
        Self {
            queue: queue.into(),
            worker_count,
            poll_interval,
            store,
            registry: Arc::new(HandlerRegistry::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            health,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Register (or replace) the handler for a job type. Safe to call at
    /// any point in the pool's lifecycle.
    pub async fn register_handler(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.registry.register(job_type, handler).await;
    }

    /// Spawn `worker_count` workers, each its own task and its own
    /// registered health component. Idempotent only in the sense that
    /// calling it twice spawns a second fleet; callers should call it once.
    pub async fn start(&mut self) {
        for index in 0..self.worker_count {
            let name = format!("worker-{}-{index}", self.queue);
            let liveness = self
                .health
                .register(name.clone(), HealthDuration::seconds(30))
                .await;

            let worker = Worker::new(
                name,
                self.queue.clone(),
                self.poll_interval,
                self.store.clone(),
                self.registry.clone(),
                self.metrics.clone(),
                liveness,
            );
            let cancel = self.cancel.clone();

            self.handles
                .push(tokio::spawn(async move { worker.run(cancel).await }));
        }
    }

    /// Signal every worker to stop polling for new jobs and wait for all of
    /// them to return. A worker already running a handler waits for that
    /// handler to finish; nothing is forcibly cancelled.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub async fn get_metrics(&self, job_type: &str) -> queue_core::JobMetrics {
        self.metrics.get_stats(job_type).await
    }

    pub async fn get_all_metrics(&self) -> std::collections::HashMap<String, queue_core::JobMetrics> {
        self.metrics.get_all_stats().await
    }

    pub async fn get_queue_stats(&self) -> StoreResult<QueueStats> {
        self.store.get_queue_stats(&self.queue).await
    }
}

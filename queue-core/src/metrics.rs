//! The Metrics component: per-job-type counters and duration statistics.
//!
//! In-process snapshots (`get_stats`/`get_all_stats`) satisfy the library
//! surface required by the spec; every update additionally emits a
//! `metrics::counter!`/`metrics::histogram!` call so the same data is visible
//! over the Prometheus `/metrics` endpoint set up in `crate::serve`, the same
//! way `hook_worker::worker::process_webhook_job` reports alongside its own
//! bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

/// The outcome of a single handler invocation, as observed by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Per-type counters and duration accumulators.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobMetrics {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    #[serde(skip)]
    total_duration: Duration,
    min_duration: Option<Duration>,
    max_duration: Option<Duration>,
}

impl JobMetrics {
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn min_duration(&self) -> Option<Duration> {
        self.min_duration
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    pub fn average_duration(&self) -> Duration {
        if self.processed == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.processed as u32
        }
    }

    /// `succeeded / processed * 100`; `0` when `processed` is `0`.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.processed as f64 * 100.0
        }
    }

    fn record(&mut self, outcome: Outcome, duration: Duration) {
        self.processed += 1;
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure => self.failed += 1,
        }
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |m| m.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |m| m.max(duration)));
    }
}

/// A reader/writer-guarded map of per-type `JobMetrics`. Snapshot reads
/// return copies so callers never hold an interior reference.
#[derive(Default)]
pub struct MetricsRegistry {
    by_type: RwLock<HashMap<String, JobMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically update all of (processed, succeeded|failed, min, max,
    /// total, avg) for one handler invocation.
    pub async fn record(&self, job_type: &str, outcome: Outcome, duration: Duration) {
        {
            let mut guard = self.by_type.write().await;
            guard.entry(job_type.to_owned()).or_default().record(outcome, duration);
        }

        let labels = [("job_type", job_type.to_owned())];
        metrics::counter!("jobqueue_jobs_processed_total", &labels).increment(1);
        match outcome {
            Outcome::Success => {
                metrics::counter!("jobqueue_jobs_succeeded_total", &labels).increment(1)
            }
            Outcome::Failure => {
                metrics::counter!("jobqueue_jobs_failed_total", &labels).increment(1)
            }
        }
        metrics::histogram!("jobqueue_job_duration_seconds", &labels).record(duration.as_secs_f64());
    }

    /// Bump only the retried counter; does not affect processed/succeeded/failed.
    pub async fn record_retry(&self, job_type: &str) {
        {
            let mut guard = self.by_type.write().await;
            guard.entry(job_type.to_owned()).or_default().retried += 1;
        }

        let labels = [("job_type", job_type.to_owned())];
        metrics::counter!("jobqueue_jobs_retried_total", &labels).increment(1);
    }

    pub async fn get_stats(&self, job_type: &str) -> JobMetrics {
        self.by_type.read().await.get(job_type).copied().unwrap_or_default()
    }

    pub async fn get_all_stats(&self) -> HashMap<String, JobMetrics> {
        self.by_type.read().await.clone()
    }
}

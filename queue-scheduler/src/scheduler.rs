//! The Recurring Scheduler: in-memory schedule entries materialized into
//! Job rows by a single 1-second driver tick.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use queue_core::{NewJob, Payload, PgQueueStore};

use crate::error::ScheduleError;

/// One minute, the smallest granularity the helper constructors express.
pub fn every_n_minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

pub fn every_n_hours(n: i64) -> Duration {
    Duration::hours(n)
}

pub fn daily() -> Duration {
    Duration::days(1)
}

pub fn weekly() -> Duration {
    Duration::weeks(1)
}

/// An in-memory recurring schedule description, not persisted: on restart
/// the application must re-add its schedules.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: Payload,
    pub interval: Duration,
    pub enabled: bool,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

/// A schedule to be added, mirroring `NewJob`'s builder shape. `id`
/// defaults to a generated value if left unset.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub id: Option<String>,
    pub queue: String,
    pub job_type: String,
    pub payload: Payload,
    pub interval: Duration,
}

impl NewSchedule {
    pub fn new(queue: &str, job_type: &str, payload: Payload, interval: Duration) -> Self {
        Self {
            id: None,
            queue: queue.to_owned(),
            job_type: job_type.to_owned(),
            payload,
            interval,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Holds every schedule entry and drives materialization on a 1-second
/// tick once started. Cheaply cloneable: the entry map and store are both
/// handles.
#[derive(Clone)]
pub struct RecurringScheduler {
    store: PgQueueStore,
    entries: Arc<RwLock<HashMap<String, ScheduleEntry>>>,
    cancel: CancellationToken,
}

impl RecurringScheduler {
    pub fn new(store: PgQueueStore) -> Self {
        Self {
            store,
            entries: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Validate and insert a schedule. Assigns an id via `uuid::Uuid`'s
    /// string form if absent; defaults `enabled = true` and
    /// `next_run = now + interval`.
    pub async fn add_schedule(&self, schedule: NewSchedule) -> Result<String, ScheduleError> {
        if schedule.queue.is_empty() {
            return Err(ScheduleError::EmptyQueue);
        }
        if schedule.job_type.is_empty() {
            return Err(ScheduleError::EmptyType);
        }
        if schedule.interval <= Duration::zero() {
            return Err(ScheduleError::NonPositiveInterval);
        }

        let id = schedule.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let entry = ScheduleEntry {
            id: id.clone(),
            queue: schedule.queue,
            job_type: schedule.job_type,
            payload: schedule.payload,
            interval: schedule.interval,
            enabled: true,
            next_run: Utc::now() + schedule.interval,
            last_run: None,
        };

        self.entries.write().await.insert(id.clone(), entry);
        Ok(id)
    }

    pub async fn remove_schedule(&self, id: &str) -> Result<(), ScheduleError> {
        self.entries
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::NotFound(id.to_owned()))
    }

    pub async fn enable(&self, id: &str) -> Result<(), ScheduleError> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: &str) -> Result<(), ScheduleError> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ScheduleError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_owned()))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<ScheduleEntry, ScheduleError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(id.to_owned()))
    }

    /// A snapshot of all currently registered schedule entries.
    pub async fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Spawn the driver task; returns its `JoinHandle` so the caller can
    /// await it if desired. Idempotent call sites should call this once.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Signal the driver to exit. Idempotent: cancelling twice is a no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.tick().await;
        }
    }

    /// Enqueue every due, enabled schedule and advance its `next_run` by
    /// whole intervals until it is back in the future. A schedule paused
    /// for multiple intervals is not caught up: it fires once per tick in
    /// which it is found due, exactly like a clock that jumped forward.
    async fn tick(&self) {
        let now = Utc::now();
        let due_ids: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| entry.enabled && entry.next_run <= now)
                .map(|entry| entry.id.clone())
                .collect()
        };

        for id in due_ids {
            self.fire(&id, now).await;
        }
    }

    #[cfg(test)]
    pub async fn tick_for_test(&self) {
        self.tick().await;
    }

    #[cfg(test)]
    pub async fn force_due_for_test(&self, id: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            entry.next_run = Utc::now() - Duration::seconds(1);
        }
    }

    async fn fire(&self, id: &str, now: DateTime<Utc>) {
        let (queue, job_type, payload, interval) = {
            let entries = self.entries.read().await;
            match entries.get(id) {
                Some(entry) => (
                    entry.queue.clone(),
                    entry.job_type.clone(),
                    entry.payload.clone(),
                    entry.interval,
                ),
                None => return,
            }
        };

        let new_job = NewJob::new(&queue, &job_type, payload);
        if let Err(error) = self.store.enqueue(new_job).await {
            error!("scheduler failed to enqueue due schedule {}: {}", id, error);
            return;
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.last_run = Some(now);
            while entry.next_run <= now {
                entry.next_run += interval;
            }
        }
    }
}

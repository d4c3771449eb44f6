//! The Job Record: the durable entity persisted by the queue store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ParseError, StoreError};

/// A unique id identifying a job. Assigned at creation, never mutated.
pub type JobId = Uuid;

/// Default priority assigned to a job that does not request one explicitly.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Default maximum number of attempts assigned to a job that does not
/// request one explicitly.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Enumeration of the five states a `Job` may be in.
///
/// `Pending` is the only initial state. `Completed`, `Failed`, and
/// `Cancelled` are absorbing: no transition defined on `PgQueueStore` leaves
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            invalid => Err(ParseError::InvalidJobStatus(invalid.to_owned())),
        }
    }
}

/// JSON object payload, stored and read to and from a JSONB column.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A Job as read back from the store: one row in the `job_queue` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: sqlx::types::Json<Payload>,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// True once this job has consumed all of its allotted attempts.
    pub fn is_gte_max_attempts(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// A new job to be enqueued into a `PgQueueStore`. Consumed by `enqueue` to
/// enforce a specific `NewJob` is only ever enqueued once.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub job_type: String,
    pub payload: Payload,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(queue: &str, job_type: &str, payload: Payload) -> Self {
        Self {
            queue: queue.to_owned(),
            job_type: job_type.to_owned(),
            payload,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            run_at: Utc::now(),
        }
    }

    /// Build a `NewJob` from any JSON-serializable payload type, surfacing a
    /// `StoreError::Serialization` if encoding fails. Non-object payloads are
    /// wrapped under a `"value"` key so the stored payload is always a map,
    /// matching the data model's "structured key to value map" contract.
    pub fn from_payload<P: Serialize>(
        queue: &str,
        job_type: &str,
        payload: &P,
    ) -> Result<Self, StoreError> {
        let encoded =
            serde_json::to_value(payload).map_err(|error| StoreError::Serialization { error })?;
        let map = match encoded {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        Ok(Self::new(queue, job_type, map))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let job = NewJob::new("default", "email.send", Payload::new());
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn from_payload_wraps_non_object_values() {
        let job = NewJob::from_payload("default", "email.send", &42).unwrap();
        assert_eq!(job.payload.get("value").unwrap(), &serde_json::json!(42));
    }

    #[test]
    fn from_payload_keeps_object_values_flat() {
        #[derive(Serialize)]
        struct Params {
            to: String,
        }
        let job = NewJob::from_payload(
            "default",
            "email.send",
            &Params {
                to: "u@x".to_owned(),
            },
        )
        .unwrap();
        assert_eq!(job.payload.get("to").unwrap(), "u@x");
    }

    #[test]
    fn job_status_from_str_round_trips() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let s = match status {
                JobStatus::Pending => "pending",
                JobStatus::Running => "running",
                JobStatus::Completed => "completed",
                JobStatus::Failed => "failed",
                JobStatus::Cancelled => "cancelled",
            };
            assert_eq!(JobStatus::from_str(s).unwrap(), status);
        }
        assert!(JobStatus::from_str("bogus").is_err());
    }
}

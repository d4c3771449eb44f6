//! The worker pool: N independent workers dispatching claimed jobs to
//! registered handlers.

pub mod config;
pub mod pool;
pub mod worker;

pub use config::Config;
pub use pool::WorkerPool;
pub use worker::Worker;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlx::PgPool;
    use tokio_util::sync::CancellationToken;

    use queue_core::{HandlerError, HealthRegistry, JobHandler, NewJob, Payload, PgQueueStore};

    use crate::pool::WorkerPool;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(
            &self,
            _payload: &Payload,
            _cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until {
                Err(HandlerError::new("not yet"))
            } else {
                Ok(())
            }
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_pool_dispatches_to_registered_handler(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let health = HealthRegistry::new("liveness");

        let mut payload = Payload::new();
        payload.insert("to".to_owned(), serde_json::json!("u@x"));
        let id = store
            .enqueue(NewJob::new("default", "email.send", payload))
            .await
            .expect("failed to enqueue job");

        let mut pool = WorkerPool::new(
            "default",
            1,
            Duration::from_millis(10),
            store.clone(),
            health,
        );

        let calls = Arc::new(AtomicUsize::new(0));
        pool.register_handler(
            "email.send",
            Arc::new(CountingHandler {
                calls: calls.clone(),
                fail_until: 0,
            }),
        )
        .await;

        pool.start().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = store.get_job(id).await.unwrap();
            if job.status.is_terminal() || tokio::time::Instant::now() > deadline {
                assert_eq!(job.status, queue_core::JobStatus::Completed);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.stop().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_pool_fails_job_once_its_single_attempt_is_spent(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let health = HealthRegistry::new("liveness");

        let mut payload = Payload::new();
        payload.insert("to".to_owned(), serde_json::json!("u@x"));
        // With `max_attempts(1)`, the worker's single failing attempt must
        // fail the job outright rather than schedule a retry that (given
        // the real backoff) this test has no time to wait out.
        let id = store
            .enqueue(NewJob::new("default", "email.send", payload).with_max_attempts(1))
            .await
            .expect("failed to enqueue job");

        let mut pool = WorkerPool::new(
            "default",
            1,
            Duration::from_millis(10),
            store.clone(),
            health,
        );

        pool.register_handler(
            "email.send",
            Arc::new(CountingHandler {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_until: usize::MAX,
            }),
        )
        .await;

        pool.start().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = store.get_job(id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, queue_core::JobStatus::Failed);
                assert_eq!(job.attempts, 1);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never reached a terminal state");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.stop().await;
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_pool_fails_unroutable_job_without_retry(db: PgPool) {
        let store = PgQueueStore::new_from_pool(db);
        let health = HealthRegistry::new("liveness");

        // No handler is ever registered for "nope.nope": the pool must fail
        // the job on its first and only claim, never retry it.
        let id = store
            .enqueue(NewJob::new("default", "nope.nope", Payload::new()))
            .await
            .expect("failed to enqueue job");

        let mut pool = WorkerPool::new(
            "default",
            1,
            Duration::from_millis(10),
            store.clone(),
            health,
        );
        pool.start().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = store.get_job(id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, queue_core::JobStatus::Failed);
                assert_eq!(job.attempts, 1);
                assert!(job.error.unwrap().contains("no handler registered"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never reached a terminal state");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.stop().await;
    }
}

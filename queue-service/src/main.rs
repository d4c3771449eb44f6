//! Runs a worker pool and a recurring scheduler against one queue, with
//! `/metrics`, `/_liveness`, and `/_readiness` HTTP endpoints alongside.

use std::future::ready;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use queue_core::{serve::serve, serve::setup_metrics_router, HealthRegistry, PgQueueStore};
use queue_scheduler::RecurringScheduler;
use queue_worker::WorkerPool;

mod config;

use config::Config;

async fn index() -> &'static str {
    "queue-service"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let store = PgQueueStore::new(&config.database_url, config.max_pg_connections)
        .await
        .expect("failed to connect to the job queue database");

    let liveness = HealthRegistry::new("liveness");

    let mut pool = WorkerPool::new(
        config.queue_name.as_str(),
        config.worker_count,
        config.poll_interval.0,
        store.clone(),
        liveness.clone(),
    );
    pool.start().await;

    let scheduler = RecurringScheduler::new(store);
    scheduler.start();

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = router.merge(setup_metrics_router());

    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving http");
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");

    tracing::info!("shutting down");
    scheduler.stop();
    pool.stop().await;
    // give the scheduler's driver task a moment to observe the cancellation
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//! The Handler Registry: a concurrent mapping from job-type name to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::job::Payload;

/// A user-supplied callable that implements a specific job type.
///
/// `cancel` is cancelled once the owning worker pool or scheduler is
/// stopped; well-behaved handlers should observe it and return early, but
/// nothing forcibly interrupts a handler already running.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &Payload, cancel: CancellationToken) -> Result<(), HandlerError>;
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no handler registered for job type {0}")]
    NoHandler(String),
}

/// Concurrent name -> handler mapping. Register is write-locked; Get is
/// read-locked. Readers may proceed concurrently with each other; writers
/// serialize against readers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type. Last writer wins; safe to call
    /// before or after a worker pool has started.
    pub async fn register(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers
            .write()
            .await
            .insert(job_type.to_owned(), handler);
    }

    pub async fn get(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, RegistryError> {
        self.handlers
            .read()
            .await
            .get(job_type)
            .cloned()
            .ok_or_else(|| RegistryError::NoHandler(job_type.to_owned()))
    }

    /// A snapshot of the currently registered job-type names.
    pub async fn list_types(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

//! Fixed set of workers built once at startup

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tgstore_core::Config;

use crate::error::{StorageError, StorageResult};
use crate::platform::{PlatformClient, TelegramClient};
use crate::worker::{HealthState, Worker};

/// Diagnostic view of one worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub healthy: bool,
    pub state: HealthState,
    pub last_probe: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub in_flight: usize,
    pub budget: usize,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    /// Workers keep the given order; it breaks selection ties.
    pub fn new(workers: Vec<Worker>) -> StorageResult<Self> {
        if workers.is_empty() {
            return Err(StorageError::Config(
                "At least one worker must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for worker in &workers {
            if !names.insert(worker.name().to_string()) {
                return Err(StorageError::Config(format!(
                    "Duplicate worker name: {}",
                    worker.name()
                )));
            }
            if worker.budget() == 0 {
                return Err(StorageError::Config(format!(
                    "Worker {} has a zero concurrency budget",
                    worker.name()
                )));
            }
        }

        Ok(Self {
            workers: workers.into_iter().map(Arc::new).collect(),
        })
    }

    /// One Bot API client per configured token.
    pub fn from_config(config: &Config) -> StorageResult<Self> {
        let budget = config.pool.worker_max_concurrent_requests;
        let workers = config
            .telegram
            .workers()
            .into_iter()
            .map(|(name, token)| -> StorageResult<Worker> {
                let client = TelegramClient::new(
                    token,
                    config.telegram.api_base.clone(),
                    config.proxy.as_ref(),
                )
                .map_err(|e| StorageError::Config(format!("Worker {}: {}", name, e)))?;
                Ok(Worker::new(name, Arc::new(client) as Arc<dyn PlatformClient>, budget))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        tracing::info!(
            workers = workers.len(),
            budget,
            proxied = config.proxy.is_some(),
            "Worker pool created"
        );

        Self::new(workers)
    }

    pub fn all(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Workers whose cached state is healthy. Never waits on a probe.
    pub fn healthy(&self) -> Vec<Arc<Worker>> {
        self.workers
            .iter()
            .filter(|w| w.is_healthy())
            .cloned()
            .collect()
    }

    pub fn has_healthy(&self) -> bool {
        self.workers.iter().any(|w| w.is_healthy())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Worker>> {
        self.workers.iter().find(|w| w.name() == name)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|worker| {
                let health = worker.health();
                WorkerStatus {
                    name: worker.name().to_string(),
                    healthy: health.state == HealthState::Healthy,
                    state: health.state,
                    last_probe: health.last_probe,
                    consecutive_failures: health.consecutive_failures,
                    in_flight: worker.in_flight(),
                    budget: worker.budget(),
                    last_error: health.last_error,
                }
            })
            .collect()
    }
}

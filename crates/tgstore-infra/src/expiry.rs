//! Background removal of expired files
//!
//! Expired files are already refused by the download routes; the sweeper only
//! reclaims them. For each expired record the remote message is deleted first
//! and the catalog row second. A record whose remote delete fails keeps its
//! row and is retried on the next tick.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tgstore_core::{AppError, CatalogRepository};
use tgstore_storage::UploadCoordinator;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub removed: usize,
    pub remote_failures: usize,
}

pub struct ExpirySweeper {
    catalog: Arc<dyn CatalogRepository>,
    coordinator: Arc<UploadCoordinator>,
    interval: Duration,
}

pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
        tracing::info!("Expiry sweeper stopped");
    }
}

impl ExpirySweeper {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        coordinator: Arc<UploadCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            coordinator,
            interval,
        }
    }

    /// Spawn the sweep loop. Returns `None` when the interval is zero.
    pub fn start(self) -> Option<SweeperHandle> {
        if self.interval.is_zero() {
            tracing::info!("Expiry sweeper disabled");
            return None;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let task = tokio::spawn(async move { self.run(loop_token).await });
        Some(SweeperHandle { token, task })
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }
    }

    /// Remove every record expired as of now.
    #[tracing::instrument(skip(self), fields(sweep.operation = "expire_files"))]
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let expired = self.catalog.expired(Utc::now()).await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }

        for record in expired {
            tracing::info!(
                file_id = %record.file_id,
                message_id = record.message_id,
                expires_at = ?record.expires_at,
                "Deleting expired file"
            );

            if let Err(e) = self.coordinator.delete_remote(record.message_ref()).await {
                report.remote_failures += 1;
                tracing::warn!(
                    error = %e,
                    file_id = %record.file_id,
                    "Failed to delete remote message, keeping record for the next sweep"
                );
                continue;
            }

            match self.catalog.delete(&record.file_id).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        file_id = %record.file_id,
                        "Failed to delete catalog record"
                    );
                }
            }
        }

        tracing::info!(
            expired = report.expired,
            removed = report.removed,
            remote_failures = report.remote_failures,
            "Expiry sweep completed"
        );
        Ok(report)
    }
}

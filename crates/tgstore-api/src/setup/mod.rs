//! Application setup
//!
//! Startup order: catalog, worker pool, one blocking round of health probes,
//! background prober, expiry sweeper, router.

pub mod routes;
pub mod server;

use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tgstore_core::{CatalogRepository, Config};
use tgstore_db::SqliteCatalog;
use tgstore_infra::{ExpirySweeper, SweeperHandle};
use tgstore_storage::{HealthProber, ProbeSettings, ProberHandle, WorkerPool};

use crate::state::AppState;

pub struct Application {
    pub state: Arc<AppState>,
    pub router: Router,
    prober: ProberHandle,
    sweeper: Option<SweeperHandle>,
}

impl Application {
    /// Stop background tasks after the server has drained.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.shutdown().await;
        }
        self.prober.shutdown().await;
    }
}

pub async fn initialize_app(config: &Config) -> Result<Application, anyhow::Error> {
    let pool = tgstore_db::connect(&config.base.database_url, config.base.db_max_connections)
        .await
        .context("Failed to open catalog database")?;
    let catalog: Arc<dyn CatalogRepository> = Arc::new(SqliteCatalog::new(pool));
    tracing::info!("Catalog ready");

    let workers = Arc::new(WorkerPool::from_config(config)?);
    let prober = HealthProber::new(workers.clone(), ProbeSettings::from(&config.pool));

    // Nothing is selectable until its first probe has answered
    prober.probe_all().await;
    if !workers.has_healthy() {
        tracing::warn!("No worker passed the initial health probe; requests will fail until one recovers");
    }
    let prober = prober.start();

    let state = Arc::new(AppState::new(config, workers, catalog.clone()));

    let sweeper = ExpirySweeper::new(
        catalog,
        state.uploads.clone(),
        Duration::from_secs(config.expiry_sweep_interval_secs),
    )
    .start();

    let router = routes::setup_routes(config, state.clone())?;

    Ok(Application {
        state,
        router,
        prober,
        sweeper,
    })
}

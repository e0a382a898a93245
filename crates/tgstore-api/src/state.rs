//! Application state shared by every handler

use std::sync::Arc;
use tgstore_core::{CatalogRepository, Config};
use tgstore_storage::{
    BackendSelector, RangeStreamProxy, StreamSettings, UploadCoordinator, UploadSettings,
    WorkerPool,
};

/// Keys accepted by the API. The admin key sees every owner's files.
#[derive(Clone)]
pub struct AuthKeys {
    pub admin_key: String,
    pub api_keys: Vec<String>,
}

impl std::fmt::Debug for AuthKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKeys")
            .field("admin_key", &"<redacted>")
            .field("api_keys", &self.api_keys.len())
            .finish()
    }
}

pub struct AppState {
    pub catalog: Arc<dyn CatalogRepository>,
    pub pool: Arc<WorkerPool>,
    pub selector: Arc<BackendSelector>,
    pub uploads: Arc<UploadCoordinator>,
    pub streams: Arc<RangeStreamProxy>,
    pub auth: AuthKeys,
    /// Prefix of the links returned by uploads, without a trailing slash
    pub base_url: String,
}

impl AppState {
    /// Wire the storage services around an existing pool and catalog.
    pub fn new(
        config: &Config,
        pool: Arc<WorkerPool>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        let selector = Arc::new(BackendSelector::new(
            pool.clone(),
            tgstore_storage::strategy_for(config.pool.selection_strategy),
        ));
        let uploads = Arc::new(UploadCoordinator::new(
            selector.clone(),
            UploadSettings::from_config(config),
        ));
        let streams = Arc::new(RangeStreamProxy::new(
            selector.clone(),
            Some(catalog.clone()),
            StreamSettings::from_config(config),
        ));

        Self {
            catalog,
            pool,
            selector,
            uploads,
            streams,
            auth: AuthKeys {
                admin_key: config.base.admin_api_key.clone(),
                api_keys: config.base.api_keys.clone(),
            },
            base_url: config.base.base_url.trim_end_matches('/').to_string(),
        }
    }
}

//! Route configuration and setup

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tgstore_core::Config;
use tgstore_infra::{request_id_middleware, REQUEST_ID_HEADER};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::API_KEY_HEADER;
use crate::handlers;
use crate::state::AppState;

/// Room for multipart boundaries and the small form fields next to the file
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config)?;
    let body_limit = usize::try_from(config.transfer.max_upload_bytes + MULTIPART_OVERHEAD_BYTES)
        .unwrap_or(usize::MAX);

    let app = Router::new()
        .route("/health/live", get(handlers::health::liveness_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/upload", post(handlers::upload::upload_file))
        .route(
            "/dl/{file_id}/{filename}",
            get(handlers::download::download_file),
        )
        .route(
            "/f/{file_id}/{filename}",
            get(handlers::download::download_file),
        )
        .route("/share/{token}", get(handlers::download::share_file))
        .route("/file/{file_id}", delete(handlers::files::delete_file))
        .route("/files", get(handlers::files::list_files))
        .route("/stats", get(handlers::files::get_stats))
        .route("/pool/status", get(handlers::pool::pool_status))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state);

    Ok(app)
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let exposed = [
        HeaderName::from_static("content-range"),
        HeaderName::from_static("accept-ranges"),
        HeaderName::from_static("content-length"),
        HeaderName::from_static("content-disposition"),
        HeaderName::from_bytes(REQUEST_ID_HEADER.as_bytes())?,
    ];

    let cors = if config.base.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
            .expose_headers(exposed)
    } else {
        let origins = config
            .base
            .cors_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([
                HeaderName::from_bytes(API_KEY_HEADER.as_bytes())?,
                HeaderName::from_static("range"),
                HeaderName::from_static("content-type"),
            ])
            .expose_headers(exposed)
    };
    Ok(cors)
}

//! Shared setup for the HTTP tests: the real router over an in-memory
//! catalog and a pool of scripted platform workers.

#![allow(dead_code)]

use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tgstore_api::setup::routes::setup_routes;
use tgstore_api::AppState;
use tgstore_core::{CatalogRepository, Config};
use tgstore_storage::testing::{healthy_fake_pool, FakePlatform, FakeStore, MemoryCatalog};
use tgstore_storage::WorkerPool;

pub const ADMIN_KEY: &str = "admin-key";
pub const ALICE_KEY: &str = "alice-key";
pub const BOB_KEY: &str = "bob-key";
pub const BASE_URL: &str = "http://files.test";
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

pub struct TestApp {
    pub server: TestServer,
    pub catalog: Arc<MemoryCatalog>,
    pub pool: Arc<WorkerPool>,
    pub fakes: Vec<Arc<FakePlatform>>,
    pub store: FakeStore,
}

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("ADMIN_API_KEY", ADMIN_KEY),
        ("API_KEYS", "alice-key,bob-key"),
        ("TELEGRAM_BOT_TOKENS", "token-a,token-b"),
        ("TELEGRAM_CHANNEL_ID", "-1001"),
        ("BASE_URL", BASE_URL),
        ("MAX_UPLOAD_SIZE_MB", "1"),
        ("RESOLVE_TIMEOUT_SECS", "2"),
        ("UPSTREAM_FETCH_TIMEOUT_SECS", "2"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).expect("valid test config")
}

pub fn spawn_app() -> TestApp {
    let config = test_config();
    let (pool, fakes, store) = healthy_fake_pool(&["bot-1", "bot-2"], 4);
    let catalog = Arc::new(MemoryCatalog::default());
    let state = Arc::new(AppState::new(
        &config,
        pool.clone(),
        catalog.clone() as Arc<dyn CatalogRepository>,
    ));
    let router = setup_routes(&config, state).expect("router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        catalog,
        pool,
        fakes,
        store,
    }
}

impl TestApp {
    pub async fn upload(&self, key: &str, name: &str, mime: &str, data: &[u8]) -> TestResponse {
        self.upload_form(key, file_form(name, mime, data)).await
    }

    pub async fn upload_form(&self, key: &str, form: MultipartForm) -> TestResponse {
        self.server
            .post("/upload")
            .add_header("X-API-Key", key.to_string())
            .multipart(form)
            .await
    }

    pub fn send_media_calls(&self) -> usize {
        self.fakes
            .iter()
            .map(|f| f.counters.send_media.load(Ordering::SeqCst))
            .sum()
    }

    pub fn mark_all_unhealthy(&self) {
        for worker in self.pool.all() {
            worker.record_probe_failure("down".to_string(), 1);
        }
    }
}

pub fn file_form(name: &str, mime: &str, data: &[u8]) -> MultipartForm {
    let part = Part::bytes(bytes::Bytes::copy_from_slice(data))
        .file_name(name.to_string())
        .mime_type(mime.to_string());
    MultipartForm::new().add_part("file", part)
}

/// `(file_id, share_token)` from an upload response body
pub fn uploaded_ids(response: &TestResponse) -> (String, String) {
    let body: serde_json::Value = response.json();
    let file_id = body["file_id"].as_str().expect("file_id").to_string();
    let share_token = body["share_link"]
        .as_str()
        .and_then(|link| link.rsplit('/').next())
        .expect("share_link")
        .to_string();
    (file_id, share_token)
}

/// Insert a catalog row and its remote bytes without going through `/upload`.
pub async fn seed_record(
    app: &TestApp,
    pointer: &str,
    data: &[u8],
    owner: Option<&str>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    share_token: &str,
) {
    app.store.insert(pointer, bytes::Bytes::copy_from_slice(data));
    app.catalog
        .record_upload(tgstore_core::NewCatalogRecord {
            pointer: tgstore_core::ContentPointer::new(pointer.to_string()),
            message: tgstore_core::MessageRef {
                chat_id: -1001,
                message_id: 900,
            },
            file_name: "seeded.bin".to_string(),
            file_size: data.len() as u64,
            mime_type: "application/octet-stream".to_string(),
            owner_key: owner.map(str::to_string),
            expires_at,
            share_token: Some(share_token.to_string()),
            password: None,
        })
        .await
        .expect("seed record");
}

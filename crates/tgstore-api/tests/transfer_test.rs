mod helpers;

use axum_test::multipart::MultipartForm;
use chrono::{Duration, Utc};
use helpers::*;
use serde_json::Value;

const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn header<'a>(response: &'a axum_test::TestResponse, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_upload_returns_links() {
    let app = spawn_app();

    let response = app.upload(ALICE_KEY, "notes.txt", "text/plain", BODY).await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    let file_id = body["file_id"].as_str().unwrap();
    assert_eq!(
        body["direct_link"].as_str().unwrap(),
        format!("{}/dl/{}/notes.txt", BASE_URL, file_id)
    );
    let share_link = body["share_link"].as_str().unwrap();
    let token = share_link.strip_prefix(&format!("{}/share/", BASE_URL)).unwrap();
    assert_eq!(token.len(), 22);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

    assert_eq!(app.send_media_calls(), 1);
    assert_eq!(app.catalog.len(), 1);
}

#[tokio::test]
async fn test_download_full_file() {
    let app = spawn_app();
    let uploaded = app.upload(ALICE_KEY, "notes.txt", "text/plain", BODY).await;
    let (file_id, _) = uploaded_ids(&uploaded);

    let response = app.server.get(&format!("/dl/{}/notes.txt", file_id)).await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.as_bytes().as_ref(), BODY);
    assert_eq!(header(&response, "accept-ranges"), Some("bytes"));
    assert_eq!(header(&response, "content-type"), Some("text/plain"));
    assert!(header(&response, "content-range").is_none());
    assert_eq!(app.catalog.views(&file_id), Some(1));
}

#[tokio::test]
async fn test_download_byte_range() {
    let app = spawn_app();
    let uploaded = app.upload(ALICE_KEY, "notes.txt", "text/plain", BODY).await;
    let (file_id, _) = uploaded_ids(&uploaded);

    let response = app
        .server
        .get(&format!("/f/{}/notes.txt", file_id))
        .add_header("Range", "bytes=10-19")
        .await;

    assert_eq!(response.status_code(), 206);
    assert_eq!(response.as_bytes().as_ref(), &BODY[10..20]);
    assert_eq!(
        header(&response, "content-range"),
        Some(format!("bytes 10-19/{}", BODY.len()).as_str())
    );
    assert_eq!(header(&response, "content-length"), Some("10"));
}

#[tokio::test]
async fn test_share_link_streams_file() {
    let app = spawn_app();
    let uploaded = app.upload(ALICE_KEY, "notes.txt", "text/plain", BODY).await;
    let (_, token) = uploaded_ids(&uploaded);

    let response = app.server.get(&format!("/share/{}", token)).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.as_bytes().as_ref(), BODY);

    let missing = app.server.get("/share/doesnotexist").await;
    assert_eq!(missing.status_code(), 404);
    let body: Value = missing.json();
    assert_eq!(body["error"], "Link expired or invalid");
}

#[tokio::test]
async fn test_password_protected_download() {
    let app = spawn_app();
    let form = file_form("secret.txt", "text/plain", BODY).add_text("password", "hunter2");
    let uploaded = app.upload_form(ALICE_KEY, form).await;
    assert_eq!(uploaded.status_code(), 200);
    let (file_id, token) = uploaded_ids(&uploaded);
    let path = format!("/dl/{}/secret.txt", file_id);

    let response = app.server.get(&path).await;
    assert_eq!(response.status_code(), 403);

    let response = app.server.get(&path).add_query_param("password", "wrong").await;
    assert_eq!(response.status_code(), 403);

    let response = app.server.get(&path).add_query_param("password", "hunter2").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.as_bytes().as_ref(), BODY);

    let shared = app.server.get(&format!("/share/{}", token)).await;
    assert_eq!(shared.status_code(), 200);
}

#[tokio::test]
async fn test_expired_file_is_not_served() {
    let app = spawn_app();
    seed_record(
        &app,
        "ptr-old",
        BODY,
        Some(ALICE_KEY),
        Some(Utc::now() - Duration::hours(1)),
        "expiredtoken",
    )
    .await;

    let response = app.server.get("/dl/ptr-old/seeded.bin").await;
    assert_eq!(response.status_code(), 404);

    let response = app.server.get("/share/expiredtoken").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_unknown_file_is_not_found() {
    let app = spawn_app();
    let response = app.server.get("/dl/nope/file.bin").await;
    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert_eq!(body["error"], "File not found");
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected_before_platform() {
    let app = spawn_app();
    let oversized = vec![b'x'; MAX_UPLOAD_BYTES + 1];

    let response = app
        .upload(ALICE_KEY, "big.bin", "application/octet-stream", &oversized)
        .await;

    assert_eq!(response.status_code(), 413);
    assert_eq!(app.send_media_calls(), 0);
    assert!(app.catalog.is_empty());
}

#[tokio::test]
async fn test_upload_at_limit_is_accepted() {
    let app = spawn_app();
    let exact = vec![b'x'; MAX_UPLOAD_BYTES];

    let response = app
        .upload(ALICE_KEY, "exact.bin", "application/octet-stream", &exact)
        .await;

    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = spawn_app();
    let form = MultipartForm::new().add_text("expiration_days", "3");

    let response = app.upload_form(ALICE_KEY, form).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_upload_rejects_bad_expiration() {
    let app = spawn_app();
    let form = file_form("a.txt", "text/plain", BODY).add_text("expiration_days", "0");

    let response = app.upload_form(ALICE_KEY, form).await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(app.send_media_calls(), 0);
}

#[tokio::test]
async fn test_no_healthy_worker_is_unavailable() {
    let app = spawn_app();
    let uploaded = app.upload(ALICE_KEY, "notes.txt", "text/plain", BODY).await;
    let (file_id, _) = uploaded_ids(&uploaded);
    app.mark_all_unhealthy();

    let response = app.upload(ALICE_KEY, "again.txt", "text/plain", BODY).await;
    assert_eq!(response.status_code(), 503);

    let response = app.server.get(&format!("/dl/{}/notes.txt", file_id)).await;
    assert_eq!(response.status_code(), 503);
}

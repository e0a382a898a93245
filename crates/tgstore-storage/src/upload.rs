//! Upload coordination
//!
//! Moves one bounded payload into the platform through a leased worker and
//! returns the content pointer plus the message reference needed to delete it
//! later. Writing the catalog record is the caller's job.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tgstore_core::{Config, MediaKind, MessageRef};
use tokio::time::timeout;

use crate::error::{StorageError, StorageResult};
use crate::platform::{MediaUpload, PayloadBody, PlatformError, UploadReceipt};
use crate::selector::{BackendSelector, WorkerLease};

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub chat_id: i64,
    pub max_upload_bytes: u64,
    pub document_timeout: Duration,
    pub video_timeout: Duration,
    /// At most one retry, on a different worker, for transient failures only.
    pub retry_on_other_worker: bool,
    pub delete_timeout: Duration,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_id: config.telegram.channel_id,
            max_upload_bytes: config.transfer.max_upload_bytes,
            document_timeout: config.transfer.document_upload_timeout,
            video_timeout: config.transfer.video_upload_timeout,
            retry_on_other_worker: config.transfer.upload_retry_on_other_worker,
            delete_timeout: config.transfer.resolve_timeout,
        }
    }

    fn timeout_for(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Video => self.video_timeout,
            MediaKind::Document => self.document_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub body: PayloadBody,
}

pub struct UploadCoordinator {
    selector: Arc<BackendSelector>,
    settings: UploadSettings,
}

impl UploadCoordinator {
    pub fn new(selector: Arc<BackendSelector>, settings: UploadSettings) -> Self {
        Self { selector, settings }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.settings.max_upload_bytes
    }

    pub async fn upload(&self, request: UploadRequest) -> StorageResult<UploadReceipt> {
        if request.size > self.settings.max_upload_bytes {
            return Err(StorageError::PayloadTooLarge {
                size: request.size,
                limit: self.settings.max_upload_bytes,
            });
        }

        let kind = MediaKind::from_mime(&request.mime_type);
        let lease = self.selector.select()?;

        let error = match self.attempt(&lease, &request, kind).await {
            Ok(receipt) => return Ok(receipt),
            Err(error) => error,
        };
        let failed_worker = lease.name().to_string();
        drop(lease);

        if !(self.settings.retry_on_other_worker && error.is_transient()) {
            return Err(upload_failed(&failed_worker, error));
        }

        let retry_lease = match self.selector.select_excluding(&failed_worker) {
            Ok(lease) => lease,
            Err(_) => {
                tracing::debug!(
                    worker = %failed_worker,
                    "No other worker available for upload retry"
                );
                return Err(upload_failed(&failed_worker, error));
            }
        };

        tracing::info!(
            failed_worker = %failed_worker,
            worker = %retry_lease.name(),
            file_name = %request.file_name,
            "Retrying upload on another worker"
        );

        self.attempt(&retry_lease, &request, kind)
            .await
            .map_err(|e| upload_failed(retry_lease.name(), e))
    }

    async fn attempt(
        &self,
        lease: &WorkerLease,
        request: &UploadRequest,
        kind: MediaKind,
    ) -> Result<UploadReceipt, PlatformError> {
        let limit = self.settings.timeout_for(kind);
        let started = Instant::now();
        let media = MediaUpload {
            chat_id: self.settings.chat_id,
            kind,
            file_name: request.file_name.clone(),
            mime_type: request.mime_type.clone(),
            size: request.size,
            body: request.body.clone(),
        };

        let result = match timeout(limit, lease.client().send_media(media)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout),
        };

        match &result {
            Ok(receipt) => tracing::info!(
                worker = %lease.name(),
                operation = "upload",
                kind = ?kind,
                file_name = %request.file_name,
                size = request.size,
                pointer = %receipt.pointer,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upload stored"
            ),
            Err(e) => tracing::error!(
                worker = %lease.name(),
                operation = "upload",
                kind = ?kind,
                file_name = %request.file_name,
                size = request.size,
                timeout_secs = limit.as_secs(),
                error = %e,
                "Upload failed"
            ),
        }

        result
    }

    /// Delete the remote message carrying an upload. A message that is
    /// already gone counts as deleted.
    pub async fn delete_remote(&self, message: MessageRef) -> StorageResult<()> {
        let lease = self.selector.select()?;

        let result = match timeout(
            self.settings.delete_timeout,
            lease.client().delete_message(message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    worker = %lease.name(),
                    operation = "delete",
                    message_id = message.message_id,
                    "Remote message deleted"
                );
                Ok(())
            }
            Err(PlatformError::NotFound(reason)) => {
                tracing::debug!(
                    worker = %lease.name(),
                    message_id = message.message_id,
                    reason = %reason,
                    "Remote message already gone"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    worker = %lease.name(),
                    operation = "delete",
                    message_id = message.message_id,
                    error = %e,
                    "Remote delete failed"
                );
                Err(StorageError::DeleteFailed {
                    worker: lease.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn upload_failed(worker: &str, error: PlatformError) -> StorageError {
    StorageError::UploadFailed {
        worker: worker.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::RoundRobin;
    use crate::testing::{healthy_fake_pool, FakePlatform, UploadBehavior};
    use bytes::Bytes;
    use std::sync::atomic::Ordering;

    fn settings() -> UploadSettings {
        UploadSettings {
            chat_id: -1001,
            max_upload_bytes: 16,
            document_timeout: Duration::from_millis(100),
            video_timeout: Duration::from_millis(300),
            retry_on_other_worker: false,
            delete_timeout: Duration::from_millis(100),
        }
    }

    fn coordinator(
        names: &[&str],
        settings: UploadSettings,
    ) -> (UploadCoordinator, Vec<Arc<FakePlatform>>, Arc<BackendSelector>) {
        let (pool, fakes, _) = healthy_fake_pool(names, 2);
        let selector = Arc::new(BackendSelector::new(pool, Box::new(RoundRobin)));
        (
            UploadCoordinator::new(selector.clone(), settings),
            fakes,
            selector,
        )
    }

    fn request(data: &'static [u8], mime: &str) -> UploadRequest {
        UploadRequest {
            file_name: "payload.bin".to_string(),
            mime_type: mime.to_string(),
            size: data.len() as u64,
            body: PayloadBody::Memory(Bytes::from_static(data)),
        }
    }

    fn total_calls(fakes: &[Arc<FakePlatform>]) -> usize {
        fakes.iter().map(|f| f.counters.total_network_calls()).sum()
    }

    #[tokio::test]
    async fn test_payload_over_ceiling_makes_no_calls() {
        let (coordinator, fakes, _) = coordinator(&["a", "b"], settings());
        let err = coordinator
            .upload(request(b"0123456789abcdefg", "application/zip"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::PayloadTooLarge {
                size: 17,
                limit: 16
            }
        ));
        assert_eq!(total_calls(&fakes), 0);
    }

    #[tokio::test]
    async fn test_payload_at_ceiling_is_accepted() {
        let (coordinator, fakes, _) = coordinator(&["a"], settings());
        let receipt = coordinator
            .upload(request(b"0123456789abcdef", "application/zip"))
            .await
            .unwrap();

        assert_eq!(receipt.remote_size, Some(16));
        assert_eq!(receipt.message.chat_id, -1001);
        assert_eq!(
            fakes[0].store().get(receipt.pointer.as_str()).unwrap(),
            Bytes::from_static(b"0123456789abcdef")
        );
    }

    #[tokio::test]
    async fn test_kind_follows_mime_type() {
        let (coordinator, fakes, _) = coordinator(&["a"], settings());
        coordinator.upload(request(b"mp4", "video/mp4")).await.unwrap();
        coordinator.upload(request(b"pdf", "application/pdf")).await.unwrap();
        coordinator.upload(request(b"mov", "VIDEO/QuickTime")).await.unwrap();

        assert_eq!(
            fakes[0].uploaded_kinds(),
            vec![MediaKind::Video, MediaKind::Document, MediaKind::Video]
        );
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_upload_failed_and_releases_worker() {
        let (coordinator, fakes, selector) = coordinator(&["a"], settings());
        fakes[0].set_upload(UploadBehavior::Hang);

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.upload(request(b"doc", "text/plain")),
        )
        .await
        .expect("upload hung past its timeout")
        .unwrap_err();

        match err {
            StorageError::UploadFailed { worker, reason } => {
                assert_eq!(worker, "a");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(selector.pool().all()[0].in_flight(), 0);
    }

    #[tokio::test]
    async fn test_video_gets_longer_allowance() {
        let (coordinator, fakes, _) = coordinator(&["a"], settings());
        fakes[0].set_upload_delay(Some(Duration::from_millis(150)));

        assert!(coordinator.upload(request(b"doc", "text/plain")).await.is_err());
        assert!(coordinator.upload(request(b"vid", "video/webm")).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let (coordinator, fakes, _) = coordinator(&["a", "b"], settings());
        fakes[0].set_upload(UploadBehavior::FailTransport);

        let err = coordinator
            .upload(request(b"doc", "text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed { .. }));
        assert_eq!(FakePlatform::count(&fakes[0].counters.send_media), 1);
        assert_eq!(FakePlatform::count(&fakes[1].counters.send_media), 0);
    }

    #[tokio::test]
    async fn test_single_retry_on_other_worker() {
        let mut retrying = settings();
        retrying.retry_on_other_worker = true;
        let (coordinator, fakes, _) = coordinator(&["a", "b"], retrying);
        fakes[0].set_upload(UploadBehavior::FailTransport);

        let receipt = coordinator
            .upload(request(b"doc", "text/plain"))
            .await
            .unwrap();
        assert!(receipt.pointer.as_str().starts_with("ptr-"));
        assert_eq!(FakePlatform::count(&fakes[0].counters.send_media), 1);
        assert_eq!(FakePlatform::count(&fakes[1].counters.send_media), 1);
    }

    #[tokio::test]
    async fn test_retry_is_bounded_to_one() {
        let mut retrying = settings();
        retrying.retry_on_other_worker = true;
        let (coordinator, fakes, _) = coordinator(&["a", "b", "c"], retrying);
        for fake in &fakes {
            fake.set_upload(UploadBehavior::FailTransport);
        }

        let err = coordinator
            .upload(request(b"doc", "text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed { .. }));
        let attempts: usize = fakes
            .iter()
            .map(|f| f.counters.send_media.load(Ordering::SeqCst))
            .sum();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_platform_rejections_are_not_retried() {
        let mut retrying = settings();
        retrying.retry_on_other_worker = true;
        let (coordinator, fakes, _) = coordinator(&["a", "b"], retrying);
        fakes[0].set_upload(UploadBehavior::FailApi);

        assert!(coordinator.upload(request(b"doc", "text/plain")).await.is_err());
        assert_eq!(FakePlatform::count(&fakes[1].counters.send_media), 0);
    }

    #[tokio::test]
    async fn test_all_unhealthy_fails_fast() {
        let (coordinator, fakes, selector) = coordinator(&["a", "b"], settings());
        for worker in selector.pool().all() {
            worker.record_probe_failure("down".into(), 1);
        }

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.upload(request(b"doc", "text/plain")),
        )
        .await
        .expect("upload blocked with no healthy worker")
        .unwrap_err();
        assert!(matches!(err, StorageError::NoHealthyBackend));
        assert_eq!(total_calls(&fakes), 0);
    }

    #[tokio::test]
    async fn test_spooled_body_upload() {
        let file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), b"from disk").await.unwrap();
        let (coordinator, fakes, _) = coordinator(&["a"], settings());

        let receipt = coordinator
            .upload(UploadRequest {
                file_name: "disk.txt".to_string(),
                mime_type: "text/plain".to_string(),
                size: 9,
                body: PayloadBody::Spooled(file.path().to_path_buf()),
            })
            .await
            .unwrap();
        assert_eq!(
            fakes[0].store().get(receipt.pointer.as_str()).unwrap(),
            Bytes::from_static(b"from disk")
        );
    }

    #[tokio::test]
    async fn test_delete_remote() {
        let (coordinator, fakes, _) = coordinator(&["a"], settings());
        coordinator
            .delete_remote(MessageRef {
                chat_id: -1001,
                message_id: 9,
            })
            .await
            .unwrap();
        assert!(fakes[0].store().was_deleted(9));
    }
}

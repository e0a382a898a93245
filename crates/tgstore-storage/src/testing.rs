//! Scripted in-memory platform for tests
//!
//! `FakePlatform` stores uploads in a map shared by every fake built from the
//! same `FakeStore`, so a pointer issued through one worker resolves through
//! any other. Behavior is switched at runtime and every call is counted.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use tgstore_core::{
    AppError, CatalogRecord, CatalogRepository, CatalogStats, ContentPointer, MediaKind,
    MessageRef, NewCatalogRecord,
};

use crate::platform::{
    AccountIdentity, MediaUpload, PlatformClient, PlatformError, PlatformResult, UploadReceipt,
    UpstreamBody, UpstreamLocation,
};
use crate::pool::WorkerPool;
use crate::range::ByteRange;
use crate::worker::Worker;

/// Uploaded objects shared between fakes
#[derive(Clone, Default)]
pub struct FakeStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    deleted: Arc<Mutex<HashSet<i64>>>,
    next_id: Arc<AtomicI64>,
}

impl FakeStore {
    pub fn insert(&self, pointer: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(pointer.to_string(), data.into());
    }

    pub fn get(&self, pointer: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(pointer).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn was_deleted(&self, message_id: i64) -> bool {
        self.deleted.lock().unwrap().contains(&message_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
    Reachable,
    Unauthorized,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBehavior {
    Succeed,
    FailTransport,
    FailApi,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBehavior {
    Normal,
    /// Serve the whole object with 200 regardless of the range
    IgnoreRange,
    /// Yield this many chunks, then never produce another one
    StallAfter(usize),
    /// End the body after this many bytes
    Truncate(usize),
    /// Never answer with response headers
    Hang,
}

/// Call counters
#[derive(Debug, Default)]
pub struct CallCounters {
    pub get_me: AtomicUsize,
    pub send_media: AtomicUsize,
    pub resolve: AtomicUsize,
    pub fetch_range: AtomicUsize,
    pub delete_message: AtomicUsize,
    pub chunks_sent: AtomicUsize,
}

impl CallCounters {
    pub fn total_network_calls(&self) -> usize {
        self.get_me.load(Ordering::SeqCst)
            + self.send_media.load(Ordering::SeqCst)
            + self.resolve.load(Ordering::SeqCst)
            + self.fetch_range.load(Ordering::SeqCst)
            + self.delete_message.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakePlatform {
    store: FakeStore,
    probe: Mutex<ProbeBehavior>,
    upload: Mutex<UploadBehavior>,
    fetch: Mutex<FetchBehavior>,
    chunk_size: usize,
    upload_delay: Mutex<Option<Duration>>,
    uploaded_kinds: Mutex<Vec<MediaKind>>,
    pub counters: Arc<CallCounters>,
    stream_dropped: Arc<AtomicBool>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::with_store(FakeStore::default())
    }
}

impl FakePlatform {
    pub fn with_store(store: FakeStore) -> Self {
        Self {
            store,
            probe: Mutex::new(ProbeBehavior::Reachable),
            upload: Mutex::new(UploadBehavior::Succeed),
            fetch: Mutex::new(FetchBehavior::Normal),
            chunk_size: 4,
            upload_delay: Mutex::new(None),
            uploaded_kinds: Mutex::new(Vec::new()),
            counters: Arc::new(CallCounters::default()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &FakeStore {
        &self.store
    }

    pub fn set_probe(&self, behavior: ProbeBehavior) {
        *self.probe.lock().unwrap() = behavior;
    }

    pub fn set_upload(&self, behavior: UploadBehavior) {
        *self.upload.lock().unwrap() = behavior;
    }

    pub fn set_fetch(&self, behavior: FetchBehavior) {
        *self.fetch.lock().unwrap() = behavior;
    }

    pub fn set_upload_delay(&self, delay: Option<Duration>) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    /// True once the last upstream body handed out has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Kinds of every upload attempt, in order.
    pub fn uploaded_kinds(&self) -> Vec<MediaKind> {
        self.uploaded_kinds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_me(&self) -> PlatformResult<AccountIdentity> {
        self.counters.get_me.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.probe.lock().unwrap();
        match behavior {
            ProbeBehavior::Reachable => Ok(AccountIdentity {
                id: 1,
                username: Some("fake_bot".to_string()),
            }),
            ProbeBehavior::Unauthorized => Err(PlatformError::Unauthorized),
            ProbeBehavior::Hang => futures::future::pending().await,
        }
    }

    async fn send_media(&self, upload: MediaUpload) -> PlatformResult<UploadReceipt> {
        self.counters.send_media.fetch_add(1, Ordering::SeqCst);
        self.uploaded_kinds.lock().unwrap().push(upload.kind);
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.upload.lock().unwrap();
        match behavior {
            UploadBehavior::Succeed => {}
            UploadBehavior::FailTransport => {
                return Err(PlatformError::Transport("connection reset".to_string()))
            }
            UploadBehavior::FailApi => {
                return Err(PlatformError::Api {
                    code: 400,
                    description: "Bad Request: chat not found".to_string(),
                })
            }
            UploadBehavior::Hang => return futures::future::pending().await,
        }

        let data = upload.body.read_all().await?;
        let id = self.store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let pointer = format!("ptr-{}", id);
        self.store.insert(&pointer, data.clone());

        Ok(UploadReceipt {
            pointer: ContentPointer::new(pointer),
            message: MessageRef {
                chat_id: upload.chat_id,
                message_id: id,
            },
            remote_size: Some(data.len() as u64),
        })
    }

    async fn resolve(&self, pointer: &ContentPointer) -> PlatformResult<UpstreamLocation> {
        self.counters.resolve.fetch_add(1, Ordering::SeqCst);
        let data = self
            .store
            .get(pointer.as_str())
            .ok_or_else(|| PlatformError::NotFound(format!("invalid file_id {}", pointer)))?;
        Ok(UpstreamLocation {
            file_path: pointer.as_str().to_string(),
            file_size: Some(data.len() as u64),
        })
    }

    async fn fetch_range(
        &self,
        location: &UpstreamLocation,
        range: Option<ByteRange>,
    ) -> PlatformResult<UpstreamBody> {
        self.counters.fetch_range.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.fetch.lock().unwrap();
        if behavior == FetchBehavior::Hang {
            return futures::future::pending().await;
        }

        let data = self
            .store
            .get(&location.file_path)
            .ok_or_else(|| PlatformError::NotFound(location.file_path.clone()))?;

        let (status, body) = match (range, behavior) {
            (Some(range), FetchBehavior::Normal)
            | (Some(range), FetchBehavior::StallAfter(_))
            | (Some(range), FetchBehavior::Truncate(_)) => (
                206,
                data.slice(range.start as usize..=range.end as usize),
            ),
            _ => (200, data),
        };
        let content_length = body.len() as u64;
        let body = match behavior {
            FetchBehavior::Truncate(limit) => body.slice(..limit.min(body.len())),
            _ => body,
        };
        let stall_after = match behavior {
            FetchBehavior::StallAfter(n) => Some(n),
            _ => None,
        };

        self.stream_dropped.store(false, Ordering::SeqCst);
        let guard = DropFlag(self.stream_dropped.clone());
        let counters = self.counters.clone();
        let chunk_size = self.chunk_size;

        let stream = futures::stream::unfold(
            (body, 0usize, 0usize, guard),
            move |(body, pos, sent, guard)| {
                let counters = counters.clone();
                async move {
                    if stall_after.is_some_and(|limit| sent >= limit) {
                        futures::future::pending::<()>().await;
                    }
                    if pos >= body.len() {
                        return None;
                    }
                    let end = (pos + chunk_size).min(body.len());
                    let chunk = body.slice(pos..end);
                    counters.chunks_sent.fetch_add(1, Ordering::SeqCst);
                    Some((Ok(chunk), (body, end, sent + 1, guard)))
                }
            },
        )
        .boxed();

        Ok(UpstreamBody {
            status,
            content_length: Some(content_length),
            stream,
        })
    }

    async fn delete_message(&self, message: MessageRef) -> PlatformResult<()> {
        self.counters.delete_message.fetch_add(1, Ordering::SeqCst);
        self.store.deleted.lock().unwrap().insert(message.message_id);
        Ok(())
    }
}

/// Pool of healthy workers backed by fakes sharing one store.
pub fn healthy_fake_pool(
    names: &[&str],
    budget: usize,
) -> (Arc<WorkerPool>, Vec<Arc<FakePlatform>>, FakeStore) {
    let store = FakeStore::default();
    let fakes: Vec<Arc<FakePlatform>> = names
        .iter()
        .map(|_| Arc::new(FakePlatform::with_store(store.clone())))
        .collect();
    let workers = names
        .iter()
        .zip(&fakes)
        .map(|(name, fake)| {
            let worker = Worker::new(*name, fake.clone() as Arc<dyn PlatformClient>, budget);
            worker.record_probe_success();
            worker
        })
        .collect();
    let pool = WorkerPool::new(workers).expect("valid fake pool");
    (Arc::new(pool), fakes, store)
}

/// In-memory catalog
#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<Vec<CatalogRecord>>,
    pub fail_view_updates: AtomicBool,
    pub fail_ping: AtomicBool,
}

impl MemoryCatalog {
    pub fn views(&self, file_id: &str) -> Option<i64> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.file_id == file_id)
            .map(|r| r.view_count)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn find_by_id(&self, file_id: &str) -> Result<Option<CatalogRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.file_id == file_id)
            .cloned())
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<CatalogRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.share_token.as_deref() == Some(token))
            .cloned())
    }

    async fn record_upload(&self, record: NewCatalogRecord) -> Result<CatalogRecord, AppError> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.file_id == record.pointer.as_str()) {
            return Err(AppError::Internal("duplicate file_id".to_string()));
        }
        let stored = CatalogRecord {
            file_id: record.pointer.into_inner(),
            chat_id: record.message.chat_id,
            message_id: record.message.message_id,
            file_name: record.file_name,
            file_size: record.file_size as i64,
            mime_type: record.mime_type,
            owner_key: record.owner_key,
            upload_date: Utc::now(),
            expires_at: record.expires_at,
            share_token: record.share_token,
            password: record.password,
            view_count: 0,
        };
        records.push(stored.clone());
        Ok(stored)
    }

    async fn increment_views(&self, file_id: &str) -> Result<(), AppError> {
        if self.fail_view_updates.load(Ordering::SeqCst) {
            return Err(AppError::Internal("catalog unavailable".to_string()));
        }
        if let Some(record) = self
            .records
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.file_id == file_id)
        {
            record.view_count += 1;
        }
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<(), AppError> {
        self.records.lock().unwrap().retain(|r| r.file_id != file_id);
        Ok(())
    }

    async fn list(
        &self,
        owner: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CatalogRecord>, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .rev()
            .filter(|r| owner.is_none() || r.owner_key.as_deref() == owner)
            .filter(|r| search.map_or(true, |s| r.file_name.contains(s)))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<CatalogStats, AppError> {
        let records = self.records.lock().unwrap();
        Ok(CatalogStats {
            total_files: records.len() as i64,
            total_size_bytes: records.iter().map(|r| r.file_size).sum(),
            total_views: records.iter().map(|r| r.view_count).sum(),
        })
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<CatalogRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(AppError::Internal("catalog unavailable".to_string()));
        }
        Ok(())
    }
}

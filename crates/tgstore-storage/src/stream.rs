//! Range-aware streaming proxy
//!
//! A download leases a worker, resolves the content pointer, opens an upstream
//! (partial) fetch and hands the bytes to the client through a bounded
//! channel. The relay task owns the lease for the whole transfer, stops as
//! soon as the client goes away and reports upstream failures, idle stalls
//! and short reads as a final error item so the connection gets aborted.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE,
};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tgstore_core::constants::{DEFAULT_MIME_TYPE, INLINE_MIME_FRAGMENTS};
use tgstore_core::{CatalogRepository, Config, ContentPointer};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{StorageError, StorageResult};
use crate::platform::{ByteStream, PlatformError, UpstreamBody};
use crate::range::{ByteRange, RangeSpec};
use crate::selector::{BackendSelector, WorkerLease};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub resolve_timeout: Duration,
    /// Wait for upstream response headers, and the longest gap between chunks.
    pub fetch_timeout: Duration,
    pub buffer_chunks: usize,
}

impl StreamSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resolve_timeout: config.transfer.resolve_timeout,
            fetch_timeout: config.transfer.upstream_fetch_timeout,
            buffer_chunks: config.transfer.stream_buffer_chunks.max(1),
        }
    }
}

/// One download, built per HTTP request
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Catalog id whose view counter is bumped; `None` skips counting.
    pub file_id: Option<String>,
    pub pointer: ContentPointer,
    pub range: Option<RangeSpec>,
    pub total_size: u64,
    pub mime_type: String,
    pub file_name: String,
}

type RelayItem = Result<Bytes, StorageError>;

/// Response body fed by the relay task. Dropping it stops the relay.
pub struct RelayBody {
    rx: mpsc::Receiver<RelayItem>,
}

impl RelayBody {
    fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }
}

impl Stream for RelayBody {
    type Item = RelayItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

pub struct StreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub struct RangeStreamProxy {
    selector: Arc<BackendSelector>,
    catalog: Option<Arc<dyn CatalogRepository>>,
    settings: StreamSettings,
}

impl RangeStreamProxy {
    pub fn new(
        selector: Arc<BackendSelector>,
        catalog: Option<Arc<dyn CatalogRepository>>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            selector,
            catalog,
            settings,
        }
    }

    pub async fn open_stream(&self, request: StreamRequest) -> StorageResult<StreamResponse> {
        let lease = self.selector.select()?;
        let range = request.range.and_then(|r| r.resolve(request.total_size));

        if request.total_size == 0 {
            drop(lease);
            self.count_view(&request).await;
            let headers = response_headers(&request, None, 0);
            return Ok(StreamResponse {
                status: StatusCode::OK,
                headers,
                body: RelayBody::empty(),
            });
        }

        let location = match timeout(
            self.settings.resolve_timeout,
            lease.client().resolve(&request.pointer),
        )
        .await
        {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => return Err(resolve_error(&lease, &request.pointer, e)),
            Err(_) => {
                return Err(resolve_error(
                    &lease,
                    &request.pointer,
                    PlatformError::Timeout,
                ))
            }
        };

        let upstream = match timeout(
            self.settings.fetch_timeout,
            lease.client().fetch_range(&location, range),
        )
        .await
        {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => return Err(fetch_error(&lease, &request.pointer, e)),
            Err(_) => {
                return Err(fetch_error(
                    &lease,
                    &request.pointer,
                    PlatformError::Timeout,
                ))
            }
        };

        self.count_view(&request).await;

        let expected = range.map_or(request.total_size, |r| r.byte_count());
        let skip = leading_bytes_to_skip(&upstream, range);
        let status = if range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };
        let headers = response_headers(&request, range, expected);

        tracing::debug!(
            worker = %lease.name(),
            operation = "stream",
            pointer = %request.pointer,
            status = status.as_u16(),
            range = ?range,
            bytes = expected,
            "Relaying upstream content"
        );

        let (tx, rx) = mpsc::channel(self.settings.buffer_chunks);
        let relay = Relay {
            lease,
            upstream: upstream.stream,
            tx,
            skip,
            expected,
            idle_timeout: self.settings.fetch_timeout,
        };
        tokio::spawn(relay.run());

        Ok(StreamResponse {
            status,
            headers,
            body: RelayBody { rx },
        })
    }

    async fn count_view(&self, request: &StreamRequest) {
        let (Some(catalog), Some(file_id)) = (&self.catalog, &request.file_id) else {
            return;
        };
        if let Err(e) = catalog.increment_views(file_id).await {
            tracing::warn!(file_id = %file_id, error = %e, "Failed to increment view count");
        }
    }
}

/// Upstream answered 200 to a ranged request: drop the bytes before `start`.
fn leading_bytes_to_skip(upstream: &UpstreamBody, range: Option<ByteRange>) -> u64 {
    match range {
        Some(range) if upstream.status == 200 => range.start,
        _ => 0,
    }
}

fn resolve_error(lease: &WorkerLease, pointer: &ContentPointer, error: PlatformError) -> StorageError {
    tracing::warn!(
        worker = %lease.name(),
        operation = "resolve",
        pointer = %pointer,
        error = %error,
        "Content pointer resolution failed"
    );
    let worker = lease.name().to_string();
    let reason = error.to_string();
    match error {
        PlatformError::NotFound(_) | PlatformError::Timeout | PlatformError::Api { .. } => {
            StorageError::ResolutionFailed { worker, reason }
        }
        _ => StorageError::StreamInterrupted { worker, reason },
    }
}

fn fetch_error(lease: &WorkerLease, pointer: &ContentPointer, error: PlatformError) -> StorageError {
    tracing::error!(
        worker = %lease.name(),
        operation = "fetch",
        pointer = %pointer,
        error = %error,
        "Upstream fetch failed"
    );
    StorageError::StreamInterrupted {
        worker: lease.name().to_string(),
        reason: error.to_string(),
    }
}

fn response_headers(request: &StreamRequest, range: Option<ByteRange>, length: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    let content_type = HeaderValue::from_str(&request.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));
    headers.insert(CONTENT_TYPE, content_type);

    if let Ok(value) = HeaderValue::from_str(&content_disposition(
        &request.mime_type,
        &request.file_name,
    )) {
        headers.insert(CONTENT_DISPOSITION, value);
    }

    if let Some(range) = range {
        if let Ok(value) = HeaderValue::from_str(&range.content_range(request.total_size)) {
            headers.insert(CONTENT_RANGE, value);
        }
    }

    headers
}

/// `inline` for kinds browsers render themselves, `attachment` otherwise.
pub fn content_disposition(mime_type: &str, file_name: &str) -> String {
    let mime = mime_type.to_lowercase();
    let disposition = if INLINE_MIME_FRAGMENTS.iter().any(|f| mime.contains(f)) {
        "inline"
    } else {
        "attachment"
    };

    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if fallback == file_name {
        format!("{}; filename=\"{}\"", disposition, fallback)
    } else {
        format!(
            "{}; filename=\"{}\"; filename*=UTF-8''{}",
            disposition,
            fallback,
            utf8_percent_encode(file_name, NON_ALPHANUMERIC)
        )
    }
}

struct Relay {
    lease: WorkerLease,
    upstream: ByteStream,
    tx: mpsc::Sender<RelayItem>,
    skip: u64,
    expected: u64,
    idle_timeout: Duration,
}

impl Relay {
    async fn run(mut self) {
        let mut delivered: u64 = 0;

        while delivered < self.expected {
            let next = tokio::select! {
                biased;
                _ = self.tx.closed() => {
                    tracing::debug!(
                        worker = %self.lease.name(),
                        delivered,
                        expected = self.expected,
                        "Client disconnected, stopping relay"
                    );
                    return;
                }
                next = timeout(self.idle_timeout, self.upstream.next()) => next,
            };

            let mut chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return self.fail(delivered, e.to_string()).await,
                Ok(None) => {
                    return self
                        .fail(delivered, "upstream ended before the expected length".to_string())
                        .await
                }
                Err(_) => {
                    let reason =
                        format!("no upstream data for {}s", self.idle_timeout.as_secs_f32());
                    return self.fail(delivered, reason).await;
                }
            };

            if self.skip > 0 {
                let len = chunk.len() as u64;
                if len <= self.skip {
                    self.skip -= len;
                    continue;
                }
                chunk = chunk.slice(self.skip as usize..);
                self.skip = 0;
            }

            let remaining = self.expected - delivered;
            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }
            if chunk.is_empty() {
                continue;
            }
            delivered += chunk.len() as u64;

            if self.tx.send(Ok(chunk)).await.is_err() {
                tracing::debug!(
                    worker = %self.lease.name(),
                    delivered,
                    "Client disconnected, stopping relay"
                );
                return;
            }
        }

        tracing::debug!(
            worker = %self.lease.name(),
            delivered,
            "Relay complete"
        );
    }

    async fn fail(self, delivered: u64, reason: String) {
        tracing::error!(
            worker = %self.lease.name(),
            operation = "stream",
            delivered,
            expected = self.expected,
            error = %reason,
            "Upstream stream interrupted"
        );
        let _ = self
            .tx
            .send(Err(StorageError::StreamInterrupted {
                worker: self.lease.name().to_string(),
                reason,
            }))
            .await;
    }
}

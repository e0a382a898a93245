//! Telegram Bot API client
//!
//! One client per bot token. Requests are plain HTTPS calls against
//! `{api_base}/bot{token}/{method}`; file bytes are fetched from
//! `{api_base}/file/bot{token}/{file_path}` with an HTTP `Range` header.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::{multipart, Client, Proxy, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;
use tgstore_core::{ContentPointer, ForwardProxyConfig, MediaKind, MessageRef};

use super::{
    AccountIdentity, MediaUpload, PayloadBody, PlatformClient, PlatformError, PlatformResult,
    UploadReceipt, UpstreamBody, UpstreamLocation,
};
use crate::range::ByteRange;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    video: Option<FileRef>,
    document: Option<FileRef>,
    animation: Option<FileRef>,
    audio: Option<FileRef>,
}

impl Message {
    /// The platform may re-type an upload (e.g. a video sent as document).
    fn stored_file(self) -> Option<(FileRef, MessageRef)> {
        let message = MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        };
        self.video
            .or(self.document)
            .or(self.animation)
            .or(self.audio)
            .map(|file| (file, message))
    }
}

#[derive(Debug, Deserialize)]
struct File {
    file_size: Option<u64>,
    file_path: Option<String>,
}

/// Bot API client for a single bot account
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api_base: String,
    token: String,
}

impl Debug for TelegramClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Build a client. When `proxy` is set every request, file downloads
    /// included, is routed through it.
    pub fn new(
        token: impl Into<String>,
        api_base: impl Into<String>,
        proxy: Option<&ForwardProxyConfig>,
    ) -> PlatformResult<Self> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);

        if let Some(proxy) = proxy {
            let mut upstream_proxy = Proxy::all(proxy.url())
                .map_err(|e| PlatformError::Transport(format!("Invalid proxy: {}", e)))?;
            if let Some((user, pass)) = proxy.credentials() {
                upstream_proxy = upstream_proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(upstream_proxy);
        }

        let http = builder
            .build()
            .map_err(|e| PlatformError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_base,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(PlatformError::Transport(format!(
                    "Malformed platform response: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(classify_api_error(
                    status.as_u16(),
                    String::from_utf8_lossy(&body).into_owned(),
                    None,
                ))
            }
        };

        if envelope.ok {
            return envelope.result.ok_or_else(|| {
                PlatformError::Transport("Platform response carried no result".to_string())
            });
        }

        Err(classify_api_error(
            envelope.error_code.unwrap_or_else(|| status.as_u16()),
            envelope.description.unwrap_or_default(),
            envelope.parameters.and_then(|p| p.retry_after),
        ))
    }

    async fn payload_part(&self, upload: &MediaUpload) -> PlatformResult<multipart::Part> {
        let body = match &upload.body {
            PayloadBody::Memory(bytes) => reqwest::Body::from(bytes.clone()),
            PayloadBody::Spooled(path) => reqwest::Body::from(tokio::fs::File::open(path).await?),
        };

        multipart::Part::stream_with_length(body, upload.size)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|_| PlatformError::Api {
                code: 400,
                description: format!("Invalid MIME type: {}", upload.mime_type),
            })
    }
}

/// Map a Bot API error to the platform taxonomy.
fn classify_api_error(code: u16, description: String, retry_after: Option<u64>) -> PlatformError {
    let lowered = description.to_lowercase();
    match code {
        401 => PlatformError::Unauthorized,
        404 => PlatformError::NotFound(description),
        429 => PlatformError::RateLimited { retry_after },
        400 if lowered.contains("not found")
            || lowered.contains("invalid file_id")
            || lowered.contains("wrong file") =>
        {
            PlatformError::NotFound(description)
        }
        _ => PlatformError::Api { code, description },
    }
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn get_me(&self) -> PlatformResult<AccountIdentity> {
        let user: User = self.call(self.http.get(self.method_url("getMe"))).await?;
        Ok(AccountIdentity {
            id: user.id,
            username: user.username,
        })
    }

    async fn send_media(&self, upload: MediaUpload) -> PlatformResult<UploadReceipt> {
        let (method, field) = match upload.kind {
            MediaKind::Video => ("sendVideo", "video"),
            MediaKind::Document => ("sendDocument", "document"),
        };

        let part = self.payload_part(&upload).await?;
        let mut form = multipart::Form::new()
            .text("chat_id", upload.chat_id.to_string())
            .part(field, part);
        if upload.kind == MediaKind::Video {
            form = form.text("supports_streaming", "true");
        }

        let message: Message = self
            .call(self.http.post(self.method_url(method)).multipart(form))
            .await?;

        let (file, message) = message.stored_file().ok_or_else(|| PlatformError::Api {
            code: 200,
            description: "Message carries no stored file".to_string(),
        })?;

        Ok(UploadReceipt {
            pointer: ContentPointer::new(file.file_id),
            message,
            remote_size: file.file_size,
        })
    }

    async fn resolve(&self, pointer: &ContentPointer) -> PlatformResult<UpstreamLocation> {
        let file: File = self
            .call(
                self.http
                    .post(self.method_url("getFile"))
                    .json(&json!({ "file_id": pointer.as_str() })),
            )
            .await?;

        let file_path = file.file_path.ok_or_else(|| {
            PlatformError::NotFound(format!("No download path for {}", pointer))
        })?;

        Ok(UpstreamLocation {
            file_path,
            file_size: file.file_size,
        })
    }

    async fn fetch_range(
        &self,
        location: &UpstreamLocation,
        range: Option<ByteRange>,
    ) -> PlatformResult<UpstreamBody> {
        let mut request = self.http.get(self.file_url(&location.file_path));
        if let Some(range) = range {
            request = request.header(RANGE, range.to_header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let description = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => PlatformError::NotFound(location.file_path.clone()),
                StatusCode::UNAUTHORIZED => PlatformError::Unauthorized,
                _ => classify_api_error(status.as_u16(), description, None),
            });
        }

        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(PlatformError::from)
            .boxed();

        Ok(UpstreamBody {
            status: status.as_u16(),
            content_length,
            stream,
        })
    }

    async fn delete_message(&self, message: MessageRef) -> PlatformResult<()> {
        let _: bool = self
            .call(self.http.post(self.method_url("deleteMessage")).json(&json!({
                "chat_id": message.chat_id,
                "message_id": message.message_id,
            })))
            .await?;
        Ok(())
    }
}

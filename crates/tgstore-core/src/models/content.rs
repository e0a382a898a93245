use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Opaque, platform-issued reference to previously uploaded bytes.
///
/// Any worker on the platform can resolve it to a fetchable location later.
/// Never mutated once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentPointer(String);

impl ContentPointer {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ContentPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Platform-internal reference to the message carrying an upload.
/// Required to delete the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Upstream transport sub-type for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Sent with streaming playback hints and the longer upload allowance.
    Video,
    Document,
}

impl MediaKind {
    /// Video when the declared MIME type mentions video, document otherwise.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.to_ascii_lowercase().contains("video") {
            MediaKind::Video
        } else {
            MediaKind::Document
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Document => write!(f, "document"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("VIDEO/QuickTime"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime(""), MediaKind::Document);
    }

    #[test]
    fn test_content_pointer_serializes_as_string() {
        let pointer = ContentPointer::new("BQACAgIAAx0");
        assert_eq!(serde_json::to_string(&pointer).unwrap(), "\"BQACAgIAAx0\"");
    }
}

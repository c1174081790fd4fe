use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Request for a single-shot write location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub category: String,
    pub is_public: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Backend-issued, time-bounded write location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTarget {
    pub write_url: String,
    pub object_key: String,
    pub public_read_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_session_id: Option<String>,
}

impl TransferTarget {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTarget {
    pub part_number: u32,
    pub write_url: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartSession {
    pub session_id: String,
    pub object_key: String,
    pub parts: Vec<PartTarget>,
    pub expires_at: DateTime<Utc>,
}

impl MultipartSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Bytes covered by the planned parts; `None` if the sizes overflow
    pub fn total_size(&self) -> Option<u64> {
        self.parts
            .iter()
            .try_fold(0u64, |total, part| total.checked_add(part.size))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMultipart {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub part_size: u64,
    pub category: String,
    pub is_public: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub integrity_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConfirmation {
    pub object_key: String,
    pub integrity_tag: String,
    pub size: u64,
}

/// A completed object write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub object_key: String,
    pub public_read_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,
    pub integrity_tag: String,
    pub byte_length: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub object_key: String,
    pub size: u64,
    pub content_type: String,
    pub integrity_tag: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f32,
    pub bytes_per_second: f64,
    pub estimated_seconds_remaining: Option<f64>,
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    SingleShot,
    Multipart,
}

impl TransferStrategy {
    pub fn for_size(byte_length: u64, multipart_threshold: u64) -> Self {
        if byte_length > multipart_threshold {
            TransferStrategy::Multipart
        } else {
            TransferStrategy::SingleShot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStrategy::SingleShot => "single",
            TransferStrategy::Multipart => "multipart",
        }
    }
}

/// Bytes to be written as one object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPayload {
    pub file_name: String,
    pub content_type: String,
    pub content: Bytes,
}

impl ObjectPayload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn byte_length(&self) -> u64 {
        self.content.len() as u64
    }
}

#[derive(Clone, Default)]
pub struct TransferOptions {
    pub category: String,
    pub is_public: bool,
    pub metadata: HashMap<String, String>,
    pub tags: Vec<String>,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl TransferOptions {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub(crate) fn write_request(&self, payload: &ObjectPayload) -> WriteRequest {
        WriteRequest {
            file_name: payload.file_name.clone(),
            mime_type: payload.content_type.clone(),
            size: payload.byte_length(),
            category: self.category.clone(),
            is_public: self.is_public,
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
        }
    }

    pub(crate) fn initiate_request(&self, payload: &ObjectPayload, part_size: u64) -> InitiateMultipart {
        InitiateMultipart {
            file_name: payload.file_name.clone(),
            mime_type: payload.content_type.clone(),
            size: payload.byte_length(),
            part_size,
            category: self.category.clone(),
            is_public: self.is_public,
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl std::fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("category", &self.category)
            .field("is_public", &self.is_public)
            .field("metadata", &self.metadata)
            .field("tags", &self.tags)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_threshold_is_exclusive() {
        assert_eq!(TransferStrategy::for_size(100, 100), TransferStrategy::SingleShot);
        assert_eq!(TransferStrategy::for_size(101, 100), TransferStrategy::Multipart);
    }

    #[test]
    fn test_session_size_overflow_is_detected() {
        let part = |part_number, size| PartTarget {
            part_number,
            write_url: format!("http://x/part/{part_number}"),
            size,
        };
        let mut session = MultipartSession {
            session_id: "s-1".into(),
            object_key: "imports/big.csv".into(),
            parts: vec![part(1, 400), part(2, 100)],
            expires_at: Utc::now(),
        };
        assert_eq!(session.total_size(), Some(500));

        session.parts = vec![part(1, u64::MAX), part(2, 2)];
        assert_eq!(session.total_size(), None);
    }

    #[test]
    fn test_write_request_wire_shape() {
        let payload = ObjectPayload::new("a.webp", "image/webp", vec![0u8; 5]);
        let options = TransferOptions::new("avatars").public(true).with_tag("profile");
        let json = serde_json::to_value(options.write_request(&payload)).unwrap();

        assert_eq!(json["fileName"], "a.webp");
        assert_eq!(json["mimeType"], "image/webp");
        assert_eq!(json["size"], 5);
        assert_eq!(json["isPublic"], true);
        assert_eq!(json["tags"][0], "profile");
    }

    #[test]
    fn test_target_expiry() {
        let target = TransferTarget {
            write_url: "http://x/put".into(),
            object_key: "k".into(),
            public_read_url: "http://x/k".into(),
            cdn_url: None,
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            multipart_session_id: None,
        };
        assert!(target.is_expired());

        let json = serde_json::to_value(&target).unwrap();
        assert!(json.get("cdnUrl").is_none());
        assert!(json.get("writeUrl").is_some());
    }
}

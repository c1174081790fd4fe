//! Registration of stored objects with the owning application server

use crate::orchestrator::error::ConfirmationError;
use crate::orchestrator::types::EntityContext;
use crate::orchestrator::workflow::ConfirmationKind;
use crate::queue::{QueuedRequest, ReplayError, RequestExecutor, RequestMethod};
use crate::transfer::http::replay_request;
use crate::transfer::{DeferredStorageCall, StoredObject};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub kind: ConfirmationKind,
    pub object_key: String,
    /// JSON body sent to the confirmation endpoint
    pub payload: Value,
}

impl ConfirmationRequest {
    pub fn new(
        kind: ConfirmationKind,
        context: &EntityContext,
        file_name: &str,
        media_type: &str,
        stored: &StoredObject,
        thumbnail: Option<&StoredObject>,
    ) -> Self {
        let mut payload = json!({
            "objectKey": stored.object_key,
            "publicReadUrl": stored.public_read_url,
            "integrityTag": stored.integrity_tag,
            "size": stored.byte_length,
            "fileName": file_name,
            "mimeType": media_type,
            "context": context,
        });
        if let Some(cdn_url) = &stored.cdn_url {
            payload["cdnUrl"] = json!(cdn_url);
        }
        if let Some(thumbnail) = thumbnail {
            payload["thumbnailKey"] = json!(thumbnail.object_key);
            payload["thumbnailUrl"] = json!(thumbnail.public_read_url);
        }

        Self {
            kind,
            object_key: stored.object_key.clone(),
            payload,
        }
    }

    pub fn to_queued(&self) -> QueuedRequest {
        QueuedRequest::new(RequestMethod::Post, self.kind.endpoint(), Some(self.payload.clone()))
    }

    /// Rebuild a confirmation from a queued POST to a confirmation endpoint
    pub fn from_queued(request: &QueuedRequest) -> Option<Self> {
        if request.method != RequestMethod::Post {
            return None;
        }
        let kind = ConfirmationKind::from_endpoint(&request.target)?;
        let payload = request.payload.clone()?;
        let object_key = payload.get("objectKey")?.as_str()?.to_string();

        Some(Self {
            kind,
            object_key,
            payload,
        })
    }
}

#[async_trait]
pub trait ConfirmationBackend: Send + Sync {
    /// Register the stored object and return the backend's record unmodified
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<Value, ConfirmationError>;
}

fn replay_outcome(result: Result<Value, ConfirmationError>) -> Result<Value, ReplayError> {
    result.map_err(|e| match e {
        ConfirmationError::Rejected { status, .. } if status >= 500 || status == 429 => {
            ReplayError::Transient(e.to_string())
        }
        ConfirmationError::Rejected { .. } => ReplayError::Permanent(e.to_string()),
        ConfirmationError::Network { .. } | ConfirmationError::Queue { .. } => {
            ReplayError::Transient(e.to_string())
        }
    })
}

pub struct HttpConfirmationBackend {
    client: Client,
    base_url: String,
}

impl HttpConfirmationBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ConfirmationBackend for HttpConfirmationBackend {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<Value, ConfirmationError> {
        let network = |e: reqwest::Error| ConfirmationError::Network {
            message: e.to_string(),
            object_key: request.object_key.clone(),
        };

        let url = format!("{}{}", self.base_url, request.kind.endpoint());
        let response = self
            .client
            .post(url)
            .json(&request.payload)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConfirmationError::Rejected {
                status: status.as_u16(),
                message,
                object_key: request.object_key.clone(),
            });
        }

        let text = response.text().await.map_err(network)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl RequestExecutor for HttpConfirmationBackend {
    async fn execute(&self, request: &QueuedRequest) -> Result<Value, ReplayError> {
        replay_request(&self.client, &self.base_url, request).await
    }
}

/// In-process confirmation backend recording every registration
#[derive(Default)]
pub struct MemoryConfirmationBackend {
    confirmed: Mutex<Vec<ConfirmationRequest>>,
    rejections: Mutex<VecDeque<(u16, String)>>,
}

impl MemoryConfirmationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next confirmation with the given status
    pub fn reject_next(&self, status: u16, message: impl Into<String>) {
        self.rejections.lock().push_back((status, message.into()));
    }

    pub fn confirmed(&self) -> Vec<ConfirmationRequest> {
        self.confirmed.lock().clone()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.lock().len()
    }
}

#[async_trait]
impl ConfirmationBackend for MemoryConfirmationBackend {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<Value, ConfirmationError> {
        if let Some((status, message)) = self.rejections.lock().pop_front() {
            return Err(ConfirmationError::Rejected {
                status,
                message,
                object_key: request.object_key.clone(),
            });
        }

        let record = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "objectKey": request.object_key,
            "endpoint": request.kind.endpoint(),
            "registeredAt": chrono::Utc::now().to_rfc3339(),
        });
        self.confirmed.lock().push(request.clone());
        Ok(record)
    }
}

#[async_trait]
impl RequestExecutor for MemoryConfirmationBackend {
    async fn execute(&self, request: &QueuedRequest) -> Result<Value, ReplayError> {
        let confirmation = ConfirmationRequest::from_queued(request).ok_or_else(|| {
            ReplayError::Permanent(format!("not a confirmation: {} {}", request.method.as_str(), request.target))
        })?;
        replay_outcome(self.confirm(&confirmation).await)
    }
}

/// Sends each replayed request to the collaborator that owns its endpoint
pub struct ReplayRouter {
    storage: Arc<dyn RequestExecutor>,
    confirmations: Arc<dyn RequestExecutor>,
}

impl ReplayRouter {
    pub fn new(storage: Arc<dyn RequestExecutor>, confirmations: Arc<dyn RequestExecutor>) -> Self {
        Self {
            storage,
            confirmations,
        }
    }
}

#[async_trait]
impl RequestExecutor for ReplayRouter {
    async fn execute(&self, request: &QueuedRequest) -> Result<Value, ReplayError> {
        if DeferredStorageCall::from_queued(request).is_some() {
            return self.storage.execute(request).await;
        }
        if ConfirmationKind::from_endpoint(&request.target).is_some() {
            return self.confirmations.execute(request).await;
        }

        tracing::warn!("No route for queued {} {}", request.method.as_str(), request.target);
        Err(ReplayError::Permanent(format!("unroutable target {}", request.target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(key: &str) -> StoredObject {
        StoredObject {
            object_key: key.to_string(),
            public_read_url: format!("memory://objects/{key}"),
            cdn_url: None,
            integrity_tag: "tag".into(),
            byte_length: 42,
            completed_at: Utc::now(),
        }
    }

    fn request() -> ConfirmationRequest {
        ConfirmationRequest::new(
            ConfirmationKind::RegisterAvatar,
            &EntityContext::for_contact("c-1"),
            "me.webp",
            "image/webp",
            &stored("avatars/me.webp"),
            Some(&stored("avatars/thumbnails/me-thumb.webp")),
        )
    }

    #[test]
    fn test_payload_carries_context_and_thumbnail() {
        let request = request();

        assert_eq!(request.payload["objectKey"], "avatars/me.webp");
        assert_eq!(request.payload["size"], 42);
        assert_eq!(request.payload["context"]["contactId"], "c-1");
        assert_eq!(request.payload["thumbnailKey"], "avatars/thumbnails/me-thumb.webp");
        assert!(request.payload.get("cdnUrl").is_none());
    }

    #[test]
    fn test_queued_round_trip() {
        let request = request();
        let queued = request.to_queued();

        assert_eq!(queued.method, RequestMethod::Post);
        assert_eq!(queued.target, "/avatars/register");
        assert_eq!(queued.attempt_count, 0);
        assert_eq!(ConfirmationRequest::from_queued(&queued), Some(request));

        let other = QueuedRequest::new(RequestMethod::Post, "/storage/confirm", None);
        assert!(ConfirmationRequest::from_queued(&other).is_none());
    }

    #[tokio::test]
    async fn test_memory_backend_records_and_rejects() {
        let backend = MemoryConfirmationBackend::new();
        backend.reject_next(409, "already registered");

        let err = backend.confirm(&request()).await.unwrap_err();
        assert_eq!(err.object_key(), "avatars/me.webp");
        assert!(matches!(err, ConfirmationError::Rejected { status: 409, .. }));
        assert_eq!(backend.confirmed_count(), 0);

        let record = backend.confirm(&request()).await.unwrap();
        assert_eq!(record["objectKey"], "avatars/me.webp");
        assert_eq!(backend.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_classification() {
        let backend = MemoryConfirmationBackend::new();
        let queued = request().to_queued();

        backend.reject_next(503, "busy");
        assert!(matches!(backend.execute(&queued).await, Err(ReplayError::Transient(_))));

        backend.reject_next(400, "bad");
        assert!(matches!(backend.execute(&queued).await, Err(ReplayError::Permanent(_))));

        assert!(backend.execute(&queued).await.is_ok());
        assert_eq!(backend.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn test_router_dispatches_by_target() {
        let storage = Arc::new(crate::transfer::MemoryStorage::new());
        let confirmations = Arc::new(MemoryConfirmationBackend::new());
        let router = ReplayRouter::new(storage.clone(), confirmations.clone());

        router.execute(&request().to_queued()).await.unwrap();
        assert_eq!(confirmations.confirmed_count(), 1);

        let unknown = QueuedRequest::new(RequestMethod::Post, "/elsewhere", None);
        assert!(matches!(router.execute(&unknown).await, Err(ReplayError::Permanent(_))));

        // Deleting a missing object is a permanent storage failure
        let delete = DeferredStorageCall::Delete {
            object_key: "documents/missing.pdf".into(),
        }
        .to_queued();
        assert!(matches!(router.execute(&delete).await, Err(ReplayError::Permanent(_))));
        assert_eq!(confirmations.confirmed_count(), 1);
    }
}

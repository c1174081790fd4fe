use crate::queue::{QueuedRequest, RequestMethod};
use crate::transfer::error::TransferResult;
use crate::transfer::types::{
    CompletedPart, DownloadUrl, InitiateMultipart, MultipartSession, ObjectMetadata,
    StoredObject, TransferTarget, WriteConfirmation, WriteRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Longest lifetime granted to a temporary download URL (seven days)
pub const MAX_DOWNLOAD_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Control-plane calls of the object-storage backend
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn request_write_target(&self, request: &WriteRequest) -> TransferResult<TransferTarget>;

    async fn confirm_write(&self, confirmation: &WriteConfirmation) -> TransferResult<StoredObject>;

    async fn initiate_multipart(&self, request: &InitiateMultipart) -> TransferResult<MultipartSession>;

    async fn complete_multipart(
        &self,
        session_id: &str,
        object_key: &str,
        parts: &[CompletedPart],
    ) -> TransferResult<StoredObject>;

    async fn abort_multipart(&self, session_id: &str, object_key: &str) -> TransferResult<()>;

    async fn delete_object(&self, object_key: &str) -> TransferResult<()>;

    async fn copy_object(&self, source_key: &str, destination_key: &str) -> TransferResult<StoredObject>;

    async fn object_metadata(&self, object_key: &str) -> TransferResult<ObjectMetadata>;

    async fn temporary_download_url(
        &self,
        object_key: &str,
        expires_in_secs: u64,
    ) -> TransferResult<DownloadUrl>;
}

/// Moves bytes to a write URL and returns the integrity tag the store reports
#[async_trait]
pub trait ByteTransport: Send + Sync {
    /// `progress` receives the cumulative bytes sent for this body
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> TransferResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub source_key: String,
    pub destination_key: String,
}

pub const OBJECTS_PATH: &str = "/storage/objects";
pub const COPY_PATH: &str = "/storage/objects/copy";

/// Object-management calls that can be deferred while offline
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredStorageCall {
    Delete { object_key: String },
    Copy(CopyRequest),
}

impl DeferredStorageCall {
    pub fn to_queued(&self) -> QueuedRequest {
        match self {
            DeferredStorageCall::Delete { object_key } => QueuedRequest::new(
                RequestMethod::Delete,
                OBJECTS_PATH,
                Some(serde_json::json!({ "key": object_key })),
            ),
            DeferredStorageCall::Copy(copy) => QueuedRequest::new(
                RequestMethod::Post,
                COPY_PATH,
                serde_json::to_value(copy).ok(),
            ),
        }
    }

    /// Recognise a queued storage call, if the request is one
    pub fn from_queued(request: &QueuedRequest) -> Option<Self> {
        let payload = request.payload.as_ref()?;
        match (request.method, request.target.as_str()) {
            (RequestMethod::Delete, OBJECTS_PATH) => Some(DeferredStorageCall::Delete {
                object_key: payload.get("key")?.as_str()?.to_string(),
            }),
            (RequestMethod::Post, COPY_PATH) => serde_json::from_value(payload.clone())
                .ok()
                .map(DeferredStorageCall::Copy),
            _ => None,
        }
    }
}

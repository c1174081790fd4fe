//! HTTP implementation of the storage backend contract using reqwest

use crate::integrity::IntegrityVerifier;
use crate::queue::{QueuedRequest, ReplayError, RequestExecutor, RequestMethod};
use crate::transfer::backend::{ByteTransport, CopyRequest, StorageBackend, COPY_PATH, OBJECTS_PATH};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{
    CompletedPart, DownloadUrl, InitiateMultipart, MultipartSession, ObjectMetadata,
    StoredObject, TransferTarget, WriteConfirmation, WriteRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Size of the slices a body is streamed in
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

pub struct HttpStorageBackend {
    client: Client,
    base_url: String,
}

impl HttpStorageBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransferResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> TransferResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = check_status(response, path).await?;
        Ok(response.json().await?)
    }
}

/// Map non-success responses onto transfer errors
async fn check_status(response: Response, subject: &str) -> TransferResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(TransferError::NotFound(subject.to_string()));
    }
    Err(TransferError::Backend {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl StorageBackend for HttpStorageBackend {
    async fn request_write_target(&self, request: &WriteRequest) -> TransferResult<TransferTarget> {
        self.post_json("/storage/upload-url", request).await
    }

    async fn confirm_write(&self, confirmation: &WriteConfirmation) -> TransferResult<StoredObject> {
        self.post_json("/storage/confirm", confirmation).await
    }

    async fn initiate_multipart(&self, request: &InitiateMultipart) -> TransferResult<MultipartSession> {
        self.post_json("/storage/multipart/initiate", request).await
    }

    async fn complete_multipart(
        &self,
        session_id: &str,
        object_key: &str,
        parts: &[CompletedPart],
    ) -> TransferResult<StoredObject> {
        let body = serde_json::json!({
            "sessionId": session_id,
            "objectKey": object_key,
            "parts": parts,
        });
        self.post_json("/storage/multipart/complete", &body).await
    }

    async fn abort_multipart(&self, session_id: &str, object_key: &str) -> TransferResult<()> {
        let body = serde_json::json!({ "sessionId": session_id, "objectKey": object_key });
        let response = self
            .client
            .post(self.url("/storage/multipart/abort"))
            .json(&body)
            .send()
            .await?;
        check_status(response, session_id).await?;
        Ok(())
    }

    async fn delete_object(&self, object_key: &str) -> TransferResult<()> {
        let response = self
            .client
            .delete(self.url(OBJECTS_PATH))
            .query(&[("key", object_key)])
            .send()
            .await?;
        check_status(response, object_key).await?;
        Ok(())
    }

    async fn copy_object(&self, source_key: &str, destination_key: &str) -> TransferResult<StoredObject> {
        let body = CopyRequest {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
        };
        let response = self.client.post(self.url(COPY_PATH)).json(&body).send().await?;
        let response = check_status(response, source_key).await?;
        Ok(response.json().await?)
    }

    async fn object_metadata(&self, object_key: &str) -> TransferResult<ObjectMetadata> {
        let response = self
            .client
            .get(self.url("/storage/objects/metadata"))
            .query(&[("key", object_key)])
            .send()
            .await?;
        let response = check_status(response, object_key).await?;
        Ok(response.json().await?)
    }

    async fn temporary_download_url(
        &self,
        object_key: &str,
        expires_in_secs: u64,
    ) -> TransferResult<DownloadUrl> {
        let body = serde_json::json!({ "objectKey": object_key, "expiresIn": expires_in_secs });
        let response = self
            .client
            .post(self.url("/storage/objects/download-url"))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, object_key).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RequestExecutor for HttpStorageBackend {
    async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ReplayError> {
        replay_request(&self.client, &self.base_url, request).await
    }
}

/// Send a queued request as-is and classify the outcome for the queue.
///
/// GET and DELETE payloads are sent as query parameters, everything else as
/// a JSON body. Server errors, throttling and network failures are transient.
pub(crate) async fn replay_request(
    client: &Client,
    base_url: &str,
    request: &QueuedRequest,
) -> Result<serde_json::Value, ReplayError> {
    let method = match request.method {
        RequestMethod::Get => Method::GET,
        RequestMethod::Post => Method::POST,
        RequestMethod::Put => Method::PUT,
        RequestMethod::Patch => Method::PATCH,
        RequestMethod::Delete => Method::DELETE,
    };
    let url = format!("{}{}", base_url.trim_end_matches('/'), request.target);

    let mut builder = client.request(method, url);
    if let Some(payload) = &request.payload {
        builder = match request.method {
            RequestMethod::Get | RequestMethod::Delete => {
                let params: Vec<(String, String)> = payload
                    .as_object()
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|(k, v)| {
                                let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                                (k.clone(), value)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                builder.query(&params)
            }
            _ => builder.json(payload),
        };
    }

    let response = builder
        .send()
        .await
        .map_err(|e| ReplayError::Transient(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        let text = response
            .text()
            .await
            .map_err(|e| ReplayError::Transient(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        return Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)));
    }

    let message = format!(
        "{} {} returned {}",
        request.method.as_str(),
        request.target,
        status.as_u16()
    );
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ReplayError::Transient(message))
    } else {
        Err(ReplayError::Permanent(message))
    }
}

/// Streams bodies to write URLs with PUT
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl ByteTransport for HttpTransport {
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> TransferResult<String> {
        let total = body.len();
        let local_tag = IntegrityVerifier::calculate_tag(&body);

        let chunks: Vec<Bytes> = (0..total)
            .step_by(STREAM_CHUNK_BYTES)
            .map(|start| body.slice(start..(start + STREAM_CHUNK_BYTES).min(total)))
            .collect();

        // The stream reports how far it got; progress is forwarded from here
        let (sent_tx, mut sent_rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
        let stream = futures::stream::iter(chunks.into_iter().scan(0u64, move |sent, chunk| {
            *sent += chunk.len() as u64;
            let _ = sent_tx.send(*sent);
            Some(Ok::<Bytes, std::io::Error>(chunk))
        }));

        let request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send();
        tokio::pin!(request);

        let response = loop {
            tokio::select! {
                Some(sent) = sent_rx.recv() => progress(sent),
                response = &mut request => break response?,
            }
        };
        while let Ok(sent) = sent_rx.try_recv() {
            progress(sent);
        }

        let response = check_status(response, url).await?;
        let tag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty());

        match tag {
            Some(tag) => Ok(tag),
            None => {
                tracing::debug!("No ETag from {}, using local integrity tag", url);
                Ok(local_tag)
            }
        }
    }
}

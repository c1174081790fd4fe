//! In-process object store implementing the full backend contract.
//!
//! Useful as a fake in tests and for running pipelines without a server.
//! Supports failure injection for parts, aborts and expired targets.

use crate::integrity::IntegrityVerifier;
use crate::queue::{QueuedRequest, ReplayError, RequestExecutor};
use crate::transfer::backend::{
    ByteTransport, CopyRequest, DeferredStorageCall, StorageBackend, MAX_DOWNLOAD_URL_TTL_SECS,
};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{
    CompletedPart, DownloadUrl, InitiateMultipart, MultipartSession, ObjectMetadata, PartTarget,
    StoredObject, TransferTarget, WriteConfirmation, WriteRequest,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const READ_BASE: &str = "memory://objects";
const PROGRESS_STEP: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct PendingWrite {
    object_key: String,
    content_type: String,
    metadata: HashMap<String, String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StagedWrite {
    content: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
    tag: String,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    content: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
    tag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionState {
    object_key: String,
    content_type: String,
    metadata: HashMap<String, String>,
    part_count: u32,
    received: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
pub struct MemoryStorage {
    pending: DashMap<String, PendingWrite>,
    staged: DashMap<String, StagedWrite>,
    sessions: DashMap<String, SessionState>,
    part_urls: DashMap<String, (String, u32)>,
    objects: DashMap<String, StoredEntry>,

    // Failure injection
    part_failures: DashMap<u32, u32>,
    fail_aborts: AtomicBool,
    issue_expired: AtomicBool,
    short_part_plan: AtomicBool,
    put_delay: Mutex<Option<Duration>>,

    // Call counters
    write_targets_issued: AtomicU64,
    puts: AtomicU64,
    aborts: AtomicU64,
    completed_part_lists: Mutex<Vec<Vec<u32>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` transfers of `part_number` with a 503
    pub fn fail_part(&self, part_number: u32, times: u32) {
        self.part_failures.insert(part_number, times);
    }

    pub fn fail_aborts(&self, fail: bool) {
        self.fail_aborts.store(fail, Ordering::SeqCst);
    }

    /// Issue targets and sessions that are already expired
    pub fn issue_expired_targets(&self, expired: bool) {
        self.issue_expired.store(expired, Ordering::SeqCst);
    }

    /// Plan multipart sessions whose parts do not cover the object
    pub fn plan_short_sessions(&self, short: bool) {
        self.short_part_plan.store(short, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.put_delay.lock() = delay;
    }

    pub fn write_targets_issued(&self) -> u64 {
        self.write_targets_issued.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> u64 {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Part numbers passed to each finalize call, in the order received
    pub fn completed_part_lists(&self) -> Vec<Vec<u32>> {
        self.completed_part_lists.lock().clone()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn object_bytes(&self, object_key: &str) -> Option<Bytes> {
        self.objects.get(object_key).map(|e| e.content.clone())
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn expiry(&self) -> DateTime<Utc> {
        if self.issue_expired.load(Ordering::SeqCst) {
            Utc::now() - ChronoDuration::seconds(1)
        } else {
            Utc::now() + ChronoDuration::minutes(15)
        }
    }

    fn new_key(category: &str, file_name: &str) -> String {
        let id = uuid::Uuid::new_v4();
        let name: String = file_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        format!("{}/{}-{}", category.trim_matches('/'), id, name)
    }

    fn read_url(object_key: &str) -> String {
        format!("{READ_BASE}/{object_key}")
    }

    fn stored(&self, object_key: &str, entry: StoredEntry) -> StoredObject {
        let result = StoredObject {
            object_key: object_key.to_string(),
            public_read_url: Self::read_url(object_key),
            cdn_url: None,
            integrity_tag: entry.tag.clone(),
            byte_length: entry.content.len() as u64,
            completed_at: entry.last_modified,
        };
        self.objects.insert(object_key.to_string(), entry);
        result
    }

    fn put_part(&self, session_id: &str, part_number: u32, body: Bytes) -> TransferResult<String> {
        let remaining = self.part_failures.get(&part_number).map(|r| *r).unwrap_or(0);
        if remaining > 0 {
            self.part_failures.insert(part_number, remaining - 1);
            return Err(TransferError::Backend {
                status: 503,
                message: format!("injected failure for part {part_number}"),
            });
        }

        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| TransferError::InvalidSession(session_id.to_string()))?;
        let tag = IntegrityVerifier::calculate_tag(&body);
        session.received.insert(part_number, (body, tag.clone()));
        Ok(tag)
    }

    fn put_single(&self, url: &str, content_type: &str, body: Bytes) -> TransferResult<String> {
        let (_, pending) = self.pending.remove(url).ok_or_else(|| TransferError::Backend {
            status: 404,
            message: format!("unknown or already used write URL {url}"),
        })?;

        if pending.expires_at <= Utc::now() {
            return Err(TransferError::TargetExpired {
                object_key: pending.object_key,
            });
        }

        let tag = IntegrityVerifier::calculate_tag(&body);
        let content_type = if content_type.is_empty() {
            pending.content_type
        } else {
            content_type.to_string()
        };
        self.staged.insert(
            pending.object_key,
            StagedWrite {
                content: body,
                content_type,
                metadata: pending.metadata,
                tag: tag.clone(),
            },
        );
        Ok(tag)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn request_write_target(&self, request: &WriteRequest) -> TransferResult<TransferTarget> {
        self.write_targets_issued.fetch_add(1, Ordering::SeqCst);

        let object_key = Self::new_key(&request.category, &request.file_name);
        let write_url = format!("memory://put/{}", uuid::Uuid::new_v4());
        let expires_at = self.expiry();

        self.pending.insert(
            write_url.clone(),
            PendingWrite {
                object_key: object_key.clone(),
                content_type: request.mime_type.clone(),
                metadata: request.metadata.clone(),
                expires_at,
            },
        );

        Ok(TransferTarget {
            write_url,
            public_read_url: Self::read_url(&object_key),
            object_key,
            cdn_url: None,
            expires_at,
            multipart_session_id: None,
        })
    }

    async fn confirm_write(&self, confirmation: &WriteConfirmation) -> TransferResult<StoredObject> {
        let (_, staged) = self
            .staged
            .remove(&confirmation.object_key)
            .ok_or_else(|| TransferError::NotFound(confirmation.object_key.clone()))?;

        if staged.tag != confirmation.integrity_tag {
            return Err(TransferError::Integrity(format!(
                "tag mismatch for {}",
                confirmation.object_key
            )));
        }
        if staged.content.len() as u64 != confirmation.size {
            return Err(TransferError::Integrity(format!(
                "expected {} bytes, received {}",
                confirmation.size,
                staged.content.len()
            )));
        }

        Ok(self.stored(
            &confirmation.object_key,
            StoredEntry {
                content: staged.content,
                content_type: staged.content_type,
                metadata: staged.metadata,
                tag: staged.tag,
                last_modified: Utc::now(),
            },
        ))
    }

    async fn initiate_multipart(&self, request: &InitiateMultipart) -> TransferResult<MultipartSession> {
        if request.part_size == 0 {
            return Err(TransferError::Backend {
                status: 400,
                message: "part size must be non-zero".into(),
            });
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let object_key = Self::new_key(&request.category, &request.file_name);

        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1u32;
        while offset < request.size {
            let size = request.part_size.min(request.size - offset);
            let write_url = format!("memory://part/{session_id}/{part_number}");
            self.part_urls
                .insert(write_url.clone(), (session_id.clone(), part_number));
            parts.push(PartTarget {
                part_number,
                write_url,
                size,
            });
            offset += size;
            part_number += 1;
        }

        if self.short_part_plan.load(Ordering::SeqCst) {
            if let Some(last) = parts.last_mut() {
                last.size = last.size.saturating_sub(1);
            }
        }

        self.sessions.insert(
            session_id.clone(),
            SessionState {
                object_key: object_key.clone(),
                content_type: request.mime_type.clone(),
                metadata: request.metadata.clone(),
                part_count: parts.len() as u32,
                received: BTreeMap::new(),
            },
        );

        Ok(MultipartSession {
            session_id,
            object_key,
            parts,
            expires_at: self.expiry(),
        })
    }

    async fn complete_multipart(
        &self,
        session_id: &str,
        object_key: &str,
        parts: &[CompletedPart],
    ) -> TransferResult<StoredObject> {
        self.completed_part_lists
            .lock()
            .push(parts.iter().map(|p| p.part_number).collect());

        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| TransferError::InvalidSession(session_id.to_string()))?;

        if session.object_key != object_key {
            return Err(TransferError::InvalidSession(format!(
                "session {session_id} does not write {object_key}"
            )));
        }
        if parts.len() as u32 != session.part_count
            || parts.windows(2).any(|w| w[0].part_number >= w[1].part_number)
        {
            return Err(TransferError::InvalidSession(
                "parts must be listed once each in ascending order".into(),
            ));
        }

        let mut content = BytesMut::new();
        for part in parts {
            let (bytes, _) = session.received.get(&part.part_number).ok_or_else(|| {
                TransferError::InvalidSession(format!("part {} was never received", part.part_number))
            })?;
            IntegrityVerifier::verify(bytes, &part.integrity_tag)
                .map_err(|e| TransferError::Integrity(format!("part {}: {e}", part.part_number)))?;
            content.extend_from_slice(bytes);
        }

        self.part_urls.retain(|_, owner| owner.0 != session_id);
        let tag = IntegrityVerifier::composite_tag(parts.iter().map(|p| p.integrity_tag.as_str()))?;

        Ok(self.stored(
            object_key,
            StoredEntry {
                content: content.freeze(),
                content_type: session.content_type,
                metadata: session.metadata,
                tag,
                last_modified: Utc::now(),
            },
        ))
    }

    async fn abort_multipart(&self, session_id: &str, _object_key: &str) -> TransferResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.fail_aborts.load(Ordering::SeqCst) {
            return Err(TransferError::Backend {
                status: 500,
                message: "injected abort failure".into(),
            });
        }

        self.sessions.remove(session_id);
        self.part_urls.retain(|_, owner| owner.0 != session_id);
        Ok(())
    }

    async fn delete_object(&self, object_key: &str) -> TransferResult<()> {
        self.objects
            .remove(object_key)
            .map(|_| ())
            .ok_or_else(|| TransferError::NotFound(object_key.to_string()))
    }

    async fn copy_object(&self, source_key: &str, destination_key: &str) -> TransferResult<StoredObject> {
        let mut entry = self
            .objects
            .get(source_key)
            .map(|e| e.clone())
            .ok_or_else(|| TransferError::NotFound(source_key.to_string()))?;
        entry.last_modified = Utc::now();

        Ok(self.stored(destination_key, entry))
    }

    async fn object_metadata(&self, object_key: &str) -> TransferResult<ObjectMetadata> {
        let entry = self
            .objects
            .get(object_key)
            .ok_or_else(|| TransferError::NotFound(object_key.to_string()))?;

        Ok(ObjectMetadata {
            object_key: object_key.to_string(),
            size: entry.content.len() as u64,
            content_type: entry.content_type.clone(),
            integrity_tag: entry.tag.clone(),
            last_modified: entry.last_modified,
            metadata: entry.metadata.clone(),
        })
    }

    async fn temporary_download_url(
        &self,
        object_key: &str,
        expires_in_secs: u64,
    ) -> TransferResult<DownloadUrl> {
        if !self.objects.contains_key(object_key) {
            return Err(TransferError::NotFound(object_key.to_string()));
        }

        let ttl = expires_in_secs.min(MAX_DOWNLOAD_URL_TTL_SECS);
        let expires_at = Utc::now() + ChronoDuration::seconds(ttl as i64);
        Ok(DownloadUrl {
            url: format!("memory://download/{object_key}?expires={}", expires_at.timestamp()),
            expires_at,
        })
    }
}

#[async_trait]
impl ByteTransport for MemoryStorage {
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> TransferResult<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let total = body.len();
        let part = self.part_urls.get(url).map(|p| p.clone());
        let tag = match part {
            Some((session_id, part_number)) => self.put_part(&session_id, part_number, body)?,
            None => self.put_single(url, content_type, body)?,
        };

        let mut sent = 0usize;
        while sent < total {
            sent = (sent + PROGRESS_STEP).min(total);
            progress(sent as u64);
        }

        Ok(tag)
    }
}

#[async_trait]
impl RequestExecutor for MemoryStorage {
    async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ReplayError> {
        let call = DeferredStorageCall::from_queued(request).ok_or_else(|| {
            ReplayError::Permanent(format!(
                "not a storage call: {} {}",
                request.method.as_str(),
                request.target
            ))
        })?;

        let result = match call {
            DeferredStorageCall::Delete { object_key } => {
                self.delete_object(&object_key).await.map(|_| serde_json::Value::Null)
            }
            DeferredStorageCall::Copy(CopyRequest {
                source_key,
                destination_key,
            }) => self
                .copy_object(&source_key, &destination_key)
                .await
                .and_then(|stored| {
                    serde_json::to_value(stored).map_err(|e| TransferError::Network(e.to_string()))
                }),
        };

        result.map_err(|e| {
            if e.is_retryable() {
                ReplayError::Transient(e.to_string())
            } else {
                ReplayError::Permanent(e.to_string())
            }
        })
    }
}

//! Object-storage transfer client
//!
//! Acquires backend-issued write targets and moves bytes to them, either in
//! one request or as a multipart session with bounded part concurrency,
//! per-part retry and best-effort abort.

pub mod backend;
pub mod client;
pub mod error;
pub mod http;
pub mod memory;
pub mod progress;
pub mod rate_limiter;
pub mod types;

pub use backend::{ByteTransport, DeferredStorageCall, StorageBackend, MAX_DOWNLOAD_URL_TTL_SECS};
pub use client::{TransferClient, TransferConfig};
pub use error::{TransferError, TransferResult};
pub use http::{HttpStorageBackend, HttpTransport};
pub use memory::MemoryStorage;
pub use progress::ProgressTracker;
pub use rate_limiter::BandwidthLimiter;
pub use types::{
    CompletedPart, DownloadUrl, MultipartSession, ObjectMetadata, ObjectPayload, PartTarget,
    ProgressCallback, StoredObject, TransferOptions, TransferProgress, TransferStrategy,
    TransferTarget, WriteConfirmation, WriteRequest,
};

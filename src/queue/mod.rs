pub mod error;
pub mod replay;
pub mod store;
pub mod types;

pub use error::{QueueError, QueueResult, ReplayError};
pub use replay::{OfflineQueue, RequestExecutor};
pub use store::{MemoryRequestStore, RequestStore, SqliteRequestStore};
pub use types::{DrainReport, QueuedRequest, RequestMethod};

use crate::queue::error::{QueueError, QueueResult};
use crate::queue::types::{QueuedRequest, RequestMethod};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;

/// Durable, ordered storage for queued requests
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Append request at the back of the queue
    async fn append(&self, request: &QueuedRequest) -> QueueResult<()>;

    /// All pending requests, oldest first
    async fn peek_all(&self) -> QueueResult<Vec<QueuedRequest>>;

    /// Remove request by id, returning whether it existed
    async fn remove(&self, id: &str) -> QueueResult<bool>;

    async fn len(&self) -> QueueResult<usize>;

    async fn clear(&self) -> QueueResult<u64>;

    /// Oldest pending request
    async fn peek(&self) -> QueueResult<Option<QueuedRequest>> {
        Ok(self.peek_all().await?.into_iter().next())
    }

    /// Move a pending request to the back of the queue with its updated
    /// attempt count, as one atomic step
    async fn requeue(&self, request: &QueuedRequest) -> QueueResult<()>;
}

pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    /// Create new request store backed by the given SQLite URL
    pub async fn new(db_url: &str) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        // One connection: every enqueue/dequeue is serialized at the database
        // and `sqlite::memory:` stays a single database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        // Initialize schema
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_requests (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                method TEXT NOT NULL,
                target TEXT NOT NULL,
                payload TEXT,
                enqueued_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Open (or create) a store in a database file
    pub async fn open(path: &std::path::Path) -> QueueResult<Self> {
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Create request store with in-memory database (for testing)
    pub async fn new_in_memory() -> QueueResult<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_request(row: &SqliteRow) -> QueueResult<QueuedRequest> {
        let method: String = row.try_get("method")?;
        let method = RequestMethod::parse(&method)
            .ok_or_else(|| QueueError::InvalidRecord(format!("unknown method {method}")))?;

        let payload = row
            .try_get::<Option<String>, _>("payload")?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        let attempt_count: i64 = row.try_get("attempt_count")?;

        Ok(QueuedRequest {
            id: row.try_get("id")?,
            method,
            target: row.try_get("target")?,
            payload,
            enqueued_at: row.try_get("enqueued_at")?,
            attempt_count: u32::try_from(attempt_count)
                .map_err(|_| QueueError::InvalidRecord(format!("attempt count {attempt_count}")))?,
        })
    }
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn append(&self, request: &QueuedRequest) -> QueueResult<()> {
        let payload_json = request
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO queued_requests
            (id, method, target, payload, enqueued_at, attempt_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(request.method.as_str())
        .bind(&request.target)
        .bind(payload_json)
        .bind(request.enqueued_at)
        .bind(i64::from(request.attempt_count))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn peek_all(&self) -> QueueResult<Vec<QueuedRequest>> {
        let rows = sqlx::query("SELECT * FROM queued_requests ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn remove(&self, id: &str) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM queued_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue(&self, request: &QueuedRequest) -> QueueResult<()> {
        // Single statement: the row is never absent from the table
        let result = sqlx::query(
            r#"
            UPDATE queued_requests
            SET attempt_count = ?,
                seq = (SELECT MAX(seq) + 1 FROM queued_requests)
            WHERE id = ?
            "#,
        )
        .bind(i64::from(request.attempt_count))
        .bind(&request.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(request.id.clone()));
        }
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM queued_requests")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    async fn clear(&self) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM queued_requests")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Non-durable store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryRequestStore {
    requests: Mutex<VecDeque<QueuedRequest>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn append(&self, request: &QueuedRequest) -> QueueResult<()> {
        self.requests.lock().push_back(request.clone());
        Ok(())
    }

    async fn peek_all(&self) -> QueueResult<Vec<QueuedRequest>> {
        Ok(self.requests.lock().iter().cloned().collect())
    }

    async fn remove(&self, id: &str) -> QueueResult<bool> {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|r| r.id != id);
        Ok(requests.len() < before)
    }

    async fn requeue(&self, request: &QueuedRequest) -> QueueResult<()> {
        let mut requests = self.requests.lock();
        let position = requests
            .iter()
            .position(|r| r.id == request.id)
            .ok_or_else(|| QueueError::NotFound(request.id.clone()))?;
        requests.remove(position);
        requests.push_back(request.clone());
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.requests.lock().len())
    }

    async fn clear(&self) -> QueueResult<u64> {
        let mut requests = self.requests.lock();
        let removed = requests.len() as u64;
        requests.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_request(target: &str) -> QueuedRequest {
        QueuedRequest::new(
            RequestMethod::Post,
            target,
            Some(serde_json::json!({"objectKey": "avatars/a.webp"})),
        )
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.peek().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_and_peek_preserve_order() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();

        for i in 0..3 {
            store
                .append(&create_test_request(&format!("/target/{i}")))
                .await
                .unwrap();
        }

        let pending = store.peek_all().await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].target, "/target/0");
        assert_eq!(pending[2].target, "/target/2");
        assert_eq!(
            pending[0].payload,
            Some(serde_json::json!({"objectKey": "avatars/a.webp"}))
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();
        let request = create_test_request("/attachments/register");
        store.append(&request).await.unwrap();

        assert!(store.remove(&request.id).await.unwrap());
        assert!(!store.remove(&request.id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeue_moves_to_back() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();
        let first = create_test_request("/first");
        let second = create_test_request("/second");
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        store.requeue(&first.next_attempt()).await.unwrap();

        let pending = store.peek_all().await.unwrap();
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].id, first.id);
        assert_eq!(pending[1].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_requeue_keeps_row_and_order_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        let first = create_test_request("/first");
        let second = create_test_request("/second");
        {
            let store = SqliteRequestStore::open(&db_path).await.unwrap();
            store.append(&first).await.unwrap();
            store.append(&second).await.unwrap();
            store.requeue(&first.next_attempt()).await.unwrap();

            // Appended after the requeue, so it lands behind it
            store.append(&create_test_request("/third")).await.unwrap();
            store.close().await;
        }

        let store = SqliteRequestStore::open(&db_path).await.unwrap();
        let pending = store.peek_all().await.unwrap();
        let targets: Vec<&str> = pending.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["/second", "/first", "/third"]);
        assert_eq!(pending[1].attempt_count, 1);
        assert_eq!(pending[1].payload, first.payload);
    }

    #[tokio::test]
    async fn test_requeue_unknown_request_inserts_nothing() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();
        let stray = create_test_request("/stray");

        let err = store.requeue(&stray.next_attempt()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
        assert_eq!(store.len().await.unwrap(), 0);

        let err = MemoryRequestStore::new().requeue(&stray).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        let request = create_test_request("/imports/process");
        {
            let store = SqliteRequestStore::open(&db_path).await.unwrap();
            store.append(&request).await.unwrap();
            store.close().await;
        }

        let store = SqliteRequestStore::open(&db_path).await.unwrap();
        let pending = store.peek_all().await.unwrap();
        assert_eq!(pending, vec![request]);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteRequestStore::new_in_memory().await.unwrap();
        store.append(&create_test_request("/a")).await.unwrap();
        store.append(&create_test_request("/b")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_matches_sqlite_semantics() {
        let store = MemoryRequestStore::new();
        let first = create_test_request("/first");
        let second = create_test_request("/second");
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        assert_eq!(store.peek().await.unwrap().unwrap().id, first.id);

        store.requeue(&first.next_attempt()).await.unwrap();
        let pending = store.peek_all().await.unwrap();
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].attempt_count, 1);

        assert!(store.remove(&second.id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(RequestMethod::Get),
            "POST" => Some(RequestMethod::Post),
            "PUT" => Some(RequestMethod::Put),
            "PATCH" => Some(RequestMethod::Patch),
            "DELETE" => Some(RequestMethod::Delete),
            _ => None,
        }
    }
}

/// A mutating request captured while offline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: String,
    pub method: RequestMethod,
    /// Endpoint path relative to the backend base URL
    pub target: String,
    pub payload: Option<serde_json::Value>,
    /// Unix timestamp in milliseconds
    pub enqueued_at: i64,
    pub attempt_count: u32,
}

impl QueuedRequest {
    pub fn new(
        method: RequestMethod,
        target: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            target: target.into(),
            payload,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            attempt_count: 0,
        }
    }

    /// Copy of this request re-enqueued after a failed replay
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt_count: self.attempt_count + 1,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }

    pub fn age_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.enqueued_at
    }
}

/// What a drain did with each pending request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: Vec<String>,
    pub requeued: Vec<String>,
    pub dropped: Vec<String>,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.replayed.len() + self.requeued.len() + self.dropped.len()
    }

    pub fn is_clean(&self) -> bool {
        self.requeued.is_empty() && self.dropped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_starts_at_zero_attempts() {
        let request = QueuedRequest::new(RequestMethod::Post, "/avatars/register", None);
        assert_eq!(request.attempt_count, 0);
        assert!(!request.id.is_empty());
    }

    #[test]
    fn test_next_attempt_keeps_identity() {
        let request = QueuedRequest::new(
            RequestMethod::Delete,
            "/storage/objects",
            Some(serde_json::json!({"key": "a/b"})),
        );
        let next = request.next_attempt();

        assert_eq!(next.id, request.id);
        assert_eq!(next.attempt_count, 1);
        assert_eq!(next.payload, request.payload);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(RequestMethod::parse("post"), Some(RequestMethod::Post));
        assert_eq!(RequestMethod::parse("DELETE"), Some(RequestMethod::Delete));
        assert_eq!(RequestMethod::parse("TRACE"), None);
        assert_eq!(RequestMethod::Patch.as_str(), "PATCH");
    }

    #[test]
    fn test_serde_shape() {
        let request = QueuedRequest::new(RequestMethod::Put, "/x", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "PUT");
        assert_eq!(json["attemptCount"], 0);
    }
}

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Raw body chunks of one streaming response, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Body of a stream request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub session_key: String,
    pub message: String,
}

impl StreamRequest {
    #[must_use]
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
    Tool,
}

/// One past turn as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_key: String,
    pub timestamp: u64,
    pub role: HistoryRole,
    #[serde(default)]
    pub content: Option<String>,
}

/// Backend acknowledgement of a session reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetAck {
    pub session_key: String,
    #[serde(default)]
    pub message: String,
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection or server trouble; retrying may help.
    Transport,
    /// Credentials rejected or session not provisioned; needs a configuration fix.
    Authentication,
    /// Caller-initiated abort. Not an error from the user's point of view.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("session '{session_key}' is not provisioned on the backend: {message}")]
    SessionNotProvisioned {
        session_key: String,
        message: String,
    },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("response body error: {0}")]
    Body(String),
    #[error("request was cancelled")]
    Cancelled,
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) | Self::SessionNotProvisioned { .. } => ErrorKind::Authentication,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Status { .. } | Self::Connection(_) | Self::Body(_) => ErrorKind::Transport,
        }
    }

    /// True when retrying cannot help and the user must fix configuration.
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Transport seam consumed by the request controller.
///
/// Implementations own route definitions, request construction and
/// authentication. Cancellation is applied by the caller around every await,
/// so implementations need not poll a signal themselves.
pub trait ChatTransport: Send + Sync + 'static {
    /// Starts a streaming request and returns its raw body chunks.
    fn open_stream<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, Result<ChunkStream, TransportError>>;

    /// Fetches up to `limit` past turns. Entries for other session keys may be
    /// included; callers filter.
    fn fetch_history<'a>(
        &'a self,
        session_key: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<HistoryEntry>, TransportError>>;

    /// Asks the backend to drop its context for `session_key`.
    fn reset_session<'a>(
        &'a self,
        session_key: &'a str,
    ) -> BoxFuture<'a, Result<ResetAck, TransportError>>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ErrorKind, HistoryEntry, HistoryRole, StreamRequest, TransportError};

    #[test]
    fn auth_failures_are_classified_apart_from_transport_failures() {
        assert_eq!(
            TransportError::Unauthorized("bad token".to_string()).kind(),
            ErrorKind::Authentication
        );
        assert!(TransportError::SessionNotProvisioned {
            session_key: "x".to_string(),
            message: "no hook configured".to_string(),
        }
        .requires_user_action());
        assert_eq!(
            TransportError::Connection("reset by peer".to_string()).kind(),
            ErrorKind::Transport
        );
        assert!(!TransportError::Status {
            status: 502,
            message: "bad gateway".to_string(),
        }
        .requires_user_action());
        assert!(TransportError::Cancelled.is_cancelled());
    }

    #[test]
    fn stream_request_body_uses_camel_case() {
        let body = serde_json::to_value(StreamRequest::new("webchat:main", "hi"))
            .expect("serialize stream request");
        assert_eq!(body, json!({"sessionKey": "webchat:main", "message": "hi"}));
    }

    #[test]
    fn history_entry_accepts_null_content() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "sessionKey": "a",
            "timestamp": 12,
            "role": "tool",
            "content": null,
        }))
        .expect("history entry should decode");
        assert_eq!(entry.role, HistoryRole::Tool);
        assert_eq!(entry.content, None);
    }
}

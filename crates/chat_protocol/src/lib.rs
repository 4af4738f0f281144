//! Shared contract between the transcript engine and its collaborators.
//!
//! This crate defines the transcript data model, the client-side message id
//! generator, the cooperative cancellation signal and the [`ChatTransport`]
//! seam. It contains no transport implementation and no transcript state.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

mod message;
mod transport;

pub use event_stream::{StreamEvent, TokenUsage};
pub use message::{
    AuditEntry, AuditNote, ChatMessage, MessageOutcome, RequestRecord, Role, ToolCall,
};
pub use transport::{
    ChatTransport, ChunkStream, ErrorKind, HistoryEntry, HistoryRole, ResetAck, StreamRequest,
    TransportError,
};

/// Shared cancellation flag for one streaming request.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unraised cancellation signal.
#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once `cancel` has been raised.
#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(now.as_millis()).unwrap_or(u64::MAX)
}

/// Client-generated message identifier.
///
/// Ordering follows creation order (`seq`), never wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MessageId {
    seq: u64,
    created_ms: u64,
}

impl MessageId {
    #[must_use]
    pub fn new(seq: u64, created_ms: u64) -> Self {
        Self { seq, created_ms }
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}-{}", self.created_ms, self.seq)
    }
}

/// Error returned when a string is not a `msg-<millis>-<seq>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message id: {0}")]
pub struct ParseMessageIdError(String);

impl FromStr for MessageId {
    type Err = ParseMessageIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMessageIdError(value.to_owned());
        let rest = value.strip_prefix("msg-").ok_or_else(invalid)?;
        let (created_ms, seq) = rest.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            seq: seq.parse().map_err(|_| invalid())?,
            created_ms: created_ms.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for MessageId {
    type Error = ParseMessageIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Monotonic id source owned by whoever creates messages.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next id, stamped with `created_ms`.
    pub fn next_id(&self, created_ms: u64) -> MessageId {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        MessageId::new(seq, created_ms)
    }
}

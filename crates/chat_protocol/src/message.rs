use event_stream::{StreamEvent, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::{HistoryEntry, HistoryRole};
use crate::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Terminal state reached by an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    Completed,
    Aborted,
    Failed,
}

/// One tool invocation made while producing an assistant message.
///
/// `output == None` means the call is pending; a call whose result never
/// arrives stays pending once the message is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.output.is_none()
    }
}

/// What the user sent, kept on the assistant message for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub session_key: String,
    pub message: String,
    pub timestamp: u64,
}

/// Why an audit entry did not fold into message state the usual way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditNote {
    DuplicateToolCallId,
    OrphanedToolResult,
    DuplicateToolResult,
    SalvagedText,
    AfterTerminal,
}

/// One decoded event as seen by the assembler, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: StreamEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<AuditNote>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(event: StreamEvent) -> Self {
        Self { event, note: None }
    }

    #[must_use]
    pub fn noted(event: StreamEvent, note: AuditNote) -> Self {
        Self {
            event,
            note: Some(note),
        }
    }
}

/// Transcript entry as published to the display layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Backend conversation id, unrelated to the client session key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MessageOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestRecord>,
    /// Diagnostics only; never rendered as chat content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,
}

impl ChatMessage {
    fn bare(id: MessageId, role: Role, content: String, timestamp: u64) -> Self {
        Self {
            id,
            role,
            content,
            timestamp,
            streaming: false,
            tool_calls: Vec::new(),
            usage: None,
            duration_ms: None,
            session_id: None,
            error: None,
            outcome: None,
            request: None,
            audit: Vec::new(),
        }
    }

    /// A user-authored message. Never carries tool calls, usage or a streaming flag.
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: u64) -> Self {
        Self::bare(id, Role::User, content.into(), timestamp)
    }

    /// Empty assistant message created the instant a response starts streaming.
    #[must_use]
    pub fn assistant_placeholder(
        id: MessageId,
        timestamp: u64,
        request: Option<RequestRecord>,
    ) -> Self {
        let mut message = Self::bare(id, Role::Assistant, String::new(), timestamp);
        message.streaming = true;
        message.request = request;
        message
    }

    /// Restores a past turn fetched from the backend history endpoint.
    #[must_use]
    pub fn from_history(id: MessageId, entry: HistoryEntry) -> Self {
        let role = match entry.role {
            HistoryRole::User => Role::User,
            HistoryRole::Assistant | HistoryRole::Tool => Role::Assistant,
        };
        Self::bare(id, role, entry.content.unwrap_or_default(), entry.timestamp)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Tool calls still waiting for a result.
    pub fn pending_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|call| call.is_pending())
    }
}

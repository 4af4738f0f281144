use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_TOKEN: &str = "token";
pub const EVENT_TOOL_CALL: &str = "tool_call";
pub const EVENT_TOOL_RESULT: &str = "tool_result";
pub const EVENT_DONE: &str = "done";
pub const EVENT_ERROR: &str = "error";

/// Event names this client knows how to decode.
pub const KNOWN_EVENT_TYPES: [&str; 5] = [
    EVENT_TOKEN,
    EVENT_TOOL_CALL,
    EVENT_TOOL_RESULT,
    EVENT_DONE,
    EVENT_ERROR,
];

/// Token accounting reported by the backend when a response completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64, cache_read_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_read_tokens,
        }
    }

    /// Sum of every counter, as shown in session pickers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(other.cache_read_tokens);
    }
}

/// One logical record cut from the wire by the lexer: an event name paired
/// with the JSON text of its `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: String,
    pub data: String,
}

impl RawEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// Decodes this record into exactly one [`StreamEvent`].
    #[must_use]
    pub fn decode(&self) -> StreamEvent {
        crate::decode::decode_event(&self.event_type, &self.data)
    }
}

/// Typed stream event after decoding.
///
/// The set is closed. `Unrecognized` and `Malformed` are the explicit
/// catch-alls that keep older clients working against newer backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Token {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        output: String,
    },
    Done {
        session_id: Option<String>,
        usage: Option<TokenUsage>,
        duration_ms: Option<u64>,
        /// Full decoded payload, kept for text salvage.
        payload: Value,
    },
    Error {
        message: String,
    },
    Unrecognized {
        event_type: String,
        raw: String,
    },
    Malformed {
        event_type: String,
        raw: String,
        reason: String,
    },
}

impl StreamEvent {
    /// Wire name of the event, or the unrecognized name it arrived with.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Token { .. } => EVENT_TOKEN,
            Self::ToolCall { .. } => EVENT_TOOL_CALL,
            Self::ToolResult { .. } => EVENT_TOOL_RESULT,
            Self::Done { .. } => EVENT_DONE,
            Self::Error { .. } => EVENT_ERROR,
            Self::Unrecognized { event_type, .. } | Self::Malformed { event_type, .. } => {
                event_type
            }
        }
    }

    /// Returns true for the backend's own terminal signals (`done`, `error`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Returns true for the two fallback variants.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Unrecognized { .. } | Self::Malformed { .. })
    }
}

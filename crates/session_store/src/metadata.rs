use chat_protocol::{ChatMessage, TokenUsage};
use serde::Serialize;

/// Per-session summary for a session picker.
///
/// Always computed from the transcript; never stored or updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_key: String,
    pub message_count: usize,
    /// Newest message timestamp, or 0 for an empty transcript.
    pub last_active: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
}

impl SessionMetadata {
    #[must_use]
    pub fn from_transcript(session_key: &str, transcript: &[ChatMessage]) -> Self {
        let mut totals = TokenUsage::default();
        for usage in transcript.iter().filter_map(|message| message.usage) {
            totals += usage;
        }

        Self {
            session_key: session_key.to_owned(),
            message_count: transcript.len(),
            last_active: transcript
                .iter()
                .map(|message| message.timestamp)
                .max()
                .unwrap_or(0),
            total_input_tokens: totals.input_tokens,
            total_output_tokens: totals.output_tokens,
            total_cache_read_tokens: totals.cache_read_tokens,
        }
    }

    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.total_input_tokens,
            self.total_output_tokens,
            self.total_cache_read_tokens,
        )
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.usage().total()
    }
}

/// Compact token count: `0`, `950`, `1.2K`, `3.4M`.
#[must_use]
pub fn format_token_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// Coarse age of `last_active` relative to `now`, both in epoch millis.
#[must_use]
pub fn format_relative_time(last_active: u64, now: u64) -> String {
    if last_active == 0 {
        return "Never".to_owned();
    }

    let minutes = now.saturating_sub(last_active) / 1_000 / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{days}d ago")
    } else if hours > 0 {
        format!("{hours}h ago")
    } else if minutes > 0 {
        format!("{minutes}m ago")
    } else {
        "Just now".to_owned()
    }
}

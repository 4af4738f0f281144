use chat_protocol::ChatMessage;
use serde::{Deserialize, Serialize};

pub const EXPORT_VERSION: u32 = 1;

/// First line of a transcript export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    pub version: u32,
    pub export_id: String,
    pub session_key: String,
    pub exported_at: String,
    pub message_count: usize,
}

impl ExportHeader {
    #[must_use]
    pub fn v1(
        export_id: impl Into<String>,
        session_key: impl Into<String>,
        exported_at: impl Into<String>,
        message_count: usize,
    ) -> Self {
        Self {
            version: EXPORT_VERSION,
            export_id: export_id.into(),
            session_key: session_key.into(),
            exported_at: exported_at.into(),
            message_count,
        }
    }
}

/// One line of a JSONL export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportLine {
    Session(ExportHeader),
    Message(Box<ChatMessage>),
}

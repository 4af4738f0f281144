//! Folds decoded stream events into one assistant message.
//!
//! The assembler owns the message under construction for the lifetime of one
//! request. Callers only ever see clones produced by [`MessageAssembler::snapshot`],
//! so no partially-updated state is shared with readers.

use chat_protocol::{AuditEntry, AuditNote, ChatMessage, MessageOutcome, StreamEvent, ToolCall};
use event_stream::SalvagePolicy;
use tracing::{debug, warn};

/// Lifecycle of one assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Created; no event consumed yet.
    Pending,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl AssemblerState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    fn outcome(self) -> Option<MessageOutcome> {
        match self {
            Self::Completed => Some(MessageOutcome::Completed),
            Self::Aborted => Some(MessageOutcome::Aborted),
            Self::Failed => Some(MessageOutcome::Failed),
            Self::Pending | Self::Streaming => None,
        }
    }
}

/// Error text used when the body ends with no `done` or `error` event.
pub const STREAM_ENDED_EARLY: &str = "stream ended before completion";

#[derive(Debug, Clone)]
pub struct MessageAssembler {
    message: ChatMessage,
    state: AssemblerState,
    salvage: SalvagePolicy,
}

impl MessageAssembler {
    /// Starts assembling into `placeholder`, normally an empty assistant message.
    #[must_use]
    pub fn new(mut placeholder: ChatMessage) -> Self {
        placeholder.streaming = true;
        placeholder.outcome = None;
        Self {
            message: placeholder,
            state: AssemblerState::Pending,
            salvage: SalvagePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_salvage_policy(mut self, salvage: SalvagePolicy) -> Self {
        self.salvage = salvage;
        self
    }

    #[must_use]
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    /// Immutable copy of the message as it stands now.
    #[must_use]
    pub fn snapshot(&self) -> ChatMessage {
        self.message.clone()
    }

    #[must_use]
    pub fn into_message(self) -> ChatMessage {
        self.message
    }

    /// Applies one event and returns the resulting state.
    ///
    /// Every event lands in the audit trail. Once terminal, events are only
    /// recorded there.
    pub fn fold(&mut self, event: StreamEvent) -> AssemblerState {
        if self.state.is_terminal() {
            warn!(
                message_id = %self.message.id,
                event_type = event.event_type(),
                "event after terminal state"
            );
            self.message
                .audit
                .push(AuditEntry::noted(event, AuditNote::AfterTerminal));
            return self.state;
        }

        self.state = AssemblerState::Streaming;
        let note = match &event {
            StreamEvent::Token { text } => {
                self.message.content.push_str(text);
                None
            }
            StreamEvent::ToolCall { id, name, input } => self.apply_tool_call(id, name, input),
            StreamEvent::ToolResult { id, output } => self.apply_tool_result(id, output),
            StreamEvent::Done {
                session_id,
                usage,
                duration_ms,
                payload,
            } => {
                self.message.session_id = session_id.clone();
                self.message.usage = *usage;
                self.message.duration_ms = *duration_ms;
                let note = self.salvage_if_empty(payload);
                self.finish(AssemblerState::Completed);
                note
            }
            StreamEvent::Error { message } => {
                self.annotate_error(message);
                self.finish(AssemblerState::Failed);
                None
            }
            StreamEvent::Unrecognized { event_type, .. } => {
                debug!(message_id = %self.message.id, %event_type, "unrecognized event");
                None
            }
            StreamEvent::Malformed {
                event_type, reason, ..
            } => {
                warn!(message_id = %self.message.id, %event_type, %reason, "malformed event");
                None
            }
        };

        self.message.audit.push(AuditEntry { event, note });
        self.state
    }

    /// Stops the message where it stands. Accumulated output is kept.
    ///
    /// Returns false when the message was already terminal.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.finish(AssemblerState::Aborted);
        true
    }

    /// Fails the message because of a transport problem.
    ///
    /// Returns false when the message was already terminal.
    pub fn fail(&mut self, error: &str) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.annotate_error(error);
        self.finish(AssemblerState::Failed);
        true
    }

    /// Closes a message whose body ended with no terminal event.
    pub fn finish_without_terminal(&mut self) -> bool {
        self.fail(STREAM_ENDED_EARLY)
    }

    fn apply_tool_call(&mut self, id: &str, name: &str, input: &serde_json::Value) -> Option<AuditNote> {
        let duplicate = self.message.tool_calls.iter().any(|call| call.id == id);
        self.message
            .tool_calls
            .push(ToolCall::new(id, name, input.clone()));

        if duplicate {
            warn!(message_id = %self.message.id, tool_call_id = id, "duplicate tool call id");
            Some(AuditNote::DuplicateToolCallId)
        } else {
            None
        }
    }

    fn apply_tool_result(&mut self, id: &str, output: &str) -> Option<AuditNote> {
        if let Some(call) = self
            .message
            .tool_calls
            .iter_mut()
            .find(|call| call.id == id && call.output.is_none())
        {
            call.output = Some(output.to_owned());
            return None;
        }

        let note = if self.message.tool_calls.iter().any(|call| call.id == id) {
            AuditNote::DuplicateToolResult
        } else {
            AuditNote::OrphanedToolResult
        };
        warn!(message_id = %self.message.id, tool_call_id = id, ?note, "unmatched tool result");
        Some(note)
    }

    /// Recovers text for a `done` that arrives with nothing streamed.
    ///
    /// The `done` payload is tried first, then unrecognized or undecodable
    /// events in arrival order.
    fn salvage_if_empty(&mut self, payload: &serde_json::Value) -> Option<AuditNote> {
        if !self.message.content.is_empty() {
            return None;
        }

        let salvaged = self.salvage.extract(payload).or_else(|| {
            self.message.audit.iter().find_map(|entry| match &entry.event {
                StreamEvent::Unrecognized { raw, .. } | StreamEvent::Malformed { raw, .. } => {
                    self.salvage.extract_from_raw(raw)
                }
                _ => None,
            })
        })?;

        debug!(message_id = %self.message.id, chars = salvaged.len(), "salvaged final text");
        self.message.content = salvaged;
        Some(AuditNote::SalvagedText)
    }

    fn annotate_error(&mut self, error: &str) {
        if self.message.content.is_empty() {
            self.message.content = format!("[Error: {error}]");
        } else {
            self.message
                .content
                .push_str(&format!("\n\n[Error: {error}]"));
        }
        self.message.error = Some(error.to_owned());
    }

    fn finish(&mut self, state: AssemblerState) {
        self.state = state;
        self.message.streaming = false;
        self.message.outcome = state.outcome();
    }
}

#[cfg(test)]
mod tests {
    use chat_protocol::{ChatMessage, MessageId, MessageOutcome, StreamEvent};
    use serde_json::json;

    use super::{AssemblerState, MessageAssembler};

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(ChatMessage::assistant_placeholder(
            MessageId::new(1, 10),
            10,
            None,
        ))
    }

    fn token(text: &str) -> StreamEvent {
        StreamEvent::Token {
            text: text.to_string(),
        }
    }

    #[test]
    fn first_event_moves_pending_to_streaming() {
        let mut assembler = assembler();
        assert_eq!(assembler.state(), AssemblerState::Pending);

        assert_eq!(assembler.fold(token("a")), AssemblerState::Streaming);
        assert!(assembler.message().streaming);
    }

    #[test]
    fn abort_before_any_event_is_terminal() {
        let mut assembler = assembler();
        assert!(assembler.abort());
        assert!(!assembler.abort());

        let message = assembler.snapshot();
        assert_eq!(message.outcome, Some(MessageOutcome::Aborted));
        assert_eq!(message.error, None);
        assert!(!message.streaming);
    }

    #[test]
    fn error_on_empty_content_has_no_leading_blank_line() {
        let mut assembler = assembler();
        assembler.fold(StreamEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(assembler.message().content, "[Error: boom]");
    }

    #[test]
    fn fail_after_terminal_is_ignored() {
        let mut assembler = assembler();
        assembler.fold(token("hi"));
        assembler.fold(StreamEvent::Done {
            session_id: None,
            usage: None,
            duration_ms: None,
            payload: json!({}),
        });

        assert!(!assembler.fail("late"));
        assert_eq!(assembler.message().content, "hi");
        assert_eq!(assembler.message().outcome, Some(MessageOutcome::Completed));
    }
}

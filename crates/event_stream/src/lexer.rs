use crate::events::RawEvent;

/// Counters and leftovers gathered while lexing one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexerDiagnostics {
    /// Records emitted so far.
    pub records: usize,
    /// `:` comment lines skipped.
    pub comments: usize,
    /// Non-empty lines matching no known form.
    pub unexpected_lines: usize,
    /// `data:` lines that arrived with no pending `event:` name.
    pub untyped_data_lines: usize,
    /// Unterminated bytes left when the stream closed.
    pub trailing: Option<String>,
}

/// Incremental lexer for `text/event-stream` bodies.
///
/// Bytes are buffered until a `\n` arrives, so chunk boundaries (including ones
/// falling inside a multi-byte character) never change the emitted records.
/// The pending event name survives chunk boundaries and is reset by a blank
/// line or by the `data:` line it pairs with.
#[derive(Debug, Default)]
pub struct EventStreamLexer {
    buffer: Vec<u8>,
    pending_event: String,
    diagnostics: LexerDiagnostics,
}

impl EventStreamLexer {
    /// Feed arbitrary bytes into the lexer and drain complete records.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<RawEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut records = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;

            if let Some(record) = self.accept_line(&line) {
                records.push(record);
            }
        }

        self.buffer.drain(..start);
        records
    }

    /// Closes the stream and returns what was observed.
    ///
    /// A non-empty carry-over buffer means the producer closed without a
    /// trailing line terminator. It is reported, never parsed.
    pub fn finish(mut self) -> LexerDiagnostics {
        let trailing = String::from_utf8_lossy(&self.buffer).into_owned();
        if !trailing.trim().is_empty() {
            tracing::warn!(trailing = %trailing, "event stream closed with unterminated line");
            self.diagnostics.trailing = Some(trailing);
        }
        self.diagnostics
    }

    /// Lex a complete body in one shot.
    pub fn parse_records(input: &str) -> (Vec<RawEvent>, LexerDiagnostics) {
        let mut lexer = Self::default();
        let records = lexer.feed(input.as_bytes());
        (records, lexer.finish())
    }

    #[must_use]
    pub fn diagnostics(&self) -> &LexerDiagnostics {
        &self.diagnostics
    }

    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    fn accept_line(&mut self, line: &str) -> Option<RawEvent> {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            self.pending_event.clear();
            return None;
        }

        if trimmed.starts_with(':') {
            self.diagnostics.comments += 1;
            return None;
        }

        if let Some(name) = field_value(trimmed, "event") {
            self.pending_event = name.to_owned();
            return None;
        }

        if let Some(data) = field_value(trimmed, "data") {
            let event_type = std::mem::take(&mut self.pending_event);
            if event_type.is_empty() {
                self.diagnostics.untyped_data_lines += 1;
                tracing::warn!(data, "data line received without event type");
            }
            self.diagnostics.records += 1;
            return Some(RawEvent::new(event_type, data));
        }

        self.diagnostics.unexpected_lines += 1;
        tracing::warn!(line = trimmed, "unexpected event-stream line format");
        None
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    line.strip_prefix(field)?
        .strip_prefix(':')
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::EventStreamLexer;
    use crate::events::RawEvent;

    #[test]
    fn pairs_event_name_with_next_data_line() {
        let mut lexer = EventStreamLexer::default();
        let records = lexer.feed(b"event: token\ndata: {\"text\":\"Hi\"}\n\n");
        assert_eq!(records, vec![RawEvent::new("token", r#"{"text":"Hi"}"#)]);
        assert!(lexer.is_empty_buffer());
    }

    #[test]
    fn blank_line_resets_pending_event_name() {
        let (records, diagnostics) =
            EventStreamLexer::parse_records("event: token\n\ndata: {\"text\":\"x\"}\n\n");
        assert_eq!(records, vec![RawEvent::new("", r#"{"text":"x"}"#)]);
        assert_eq!(diagnostics.untyped_data_lines, 1);
    }

    #[test]
    fn accepts_fields_without_space_after_colon() {
        let (records, _) = EventStreamLexer::parse_records("event:done\ndata:{}\n\n");
        assert_eq!(records, vec![RawEvent::new("done", "{}")]);
    }

    #[test]
    fn strips_carriage_returns() {
        let (records, _) =
            EventStreamLexer::parse_records("event: token\r\ndata: {\"text\":\"a\"}\r\n\r\n");
        assert_eq!(records, vec![RawEvent::new("token", r#"{"text":"a"}"#)]);
    }
}

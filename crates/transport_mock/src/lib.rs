//! Scripted implementation of the `chat_protocol` transport seam.
//!
//! Each call to `open_stream` consumes the next queued [`StreamScript`] and
//! replays its chunks verbatim. There is no network and no protocol logic;
//! scripts are plain bytes so lexer and decoder behavior is exercised as-is.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chat_protocol::{
    ChatTransport, ChunkStream, HistoryEntry, ResetAck, StreamRequest, TransportError,
};
use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

/// One step of a scripted response body.
#[derive(Debug, Clone)]
pub enum ChunkStep {
    Bytes(Vec<u8>),
    /// Waits before the next step.
    Pause(Duration),
    /// Yields a body error and ends the stream.
    Fail(TransportError),
    /// Never yields again; only cancellation ends the request.
    Stall,
}

/// Scripted outcome of one `open_stream` call.
#[derive(Debug, Clone)]
pub struct StreamScript {
    open: Result<Vec<ChunkStep>, TransportError>,
}

impl StreamScript {
    #[must_use]
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            open: Ok(chunks
                .into_iter()
                .map(|chunk| ChunkStep::Bytes(chunk.into()))
                .collect()),
        }
    }

    /// One chunk per `(event, data)` record, in order.
    #[must_use]
    pub fn events(records: &[(&str, Value)]) -> Self {
        Self::chunks(records.iter().map(|(name, data)| sse_record(name, data)))
    }

    /// Streams `text` as word-sized `token` events followed by `done`.
    #[must_use]
    pub fn reply(text: &str) -> Self {
        let mut records = Vec::new();
        let mut pending = String::new();
        for ch in text.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                records.push(("token", json!({ "text": std::mem::take(&mut pending) })));
            }
        }
        if !pending.is_empty() {
            records.push(("token", json!({ "text": pending })));
        }
        records.push((
            "done",
            json!({
                "sessionId": "mock-session",
                "usage": {"inputTokens": 1, "outputTokens": records.len()},
                "durationMs": 1,
            }),
        ));
        Self::events(&records)
    }

    /// The request is refused before any body is produced.
    #[must_use]
    pub fn rejected(error: TransportError) -> Self {
        Self { open: Err(error) }
    }

    #[must_use]
    pub fn then(mut self, step: ChunkStep) -> Self {
        if let Ok(steps) = &mut self.open {
            steps.push(step);
        }
        self
    }

    #[must_use]
    pub fn then_fail(self, error: TransportError) -> Self {
        self.then(ChunkStep::Fail(error))
    }

    #[must_use]
    pub fn then_stall(self) -> Self {
        self.then(ChunkStep::Stall)
    }
}

/// Encodes one event-stream record, terminated by a blank line.
#[must_use]
pub fn sse_record(event: &str, data: &Value) -> Vec<u8> {
    format!("event: {event}\ndata: {data}\n\n").into_bytes()
}

/// Deterministic transport used by engine tests and local runs.
#[derive(Debug)]
pub struct ScriptedTransport {
    streams: Mutex<VecDeque<StreamScript>>,
    history: Mutex<Result<Vec<HistoryEntry>, TransportError>>,
    reset: Mutex<Option<TransportError>>,
    chunk_delay: Duration,
    history_delay: Duration,
    stream_requests: Mutex<Vec<StreamRequest>>,
    history_requests: Mutex<Vec<(String, usize)>>,
    reset_requests: Mutex<Vec<String>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            history: Mutex::new(Ok(Vec::new())),
            reset: Mutex::new(None),
            chunk_delay: Duration::ZERO,
            history_delay: Duration::ZERO,
            stream_requests: Mutex::new(Vec::new()),
            history_requests: Mutex::new(Vec::new()),
            reset_requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_stream(self, script: StreamScript) -> Self {
        self.push_stream(script);
        self
    }

    #[must_use]
    pub fn with_history(self, entries: Vec<HistoryEntry>) -> Self {
        *lock_unpoisoned(&self.history) = Ok(entries);
        self
    }

    #[must_use]
    pub fn with_history_error(self, error: TransportError) -> Self {
        *lock_unpoisoned(&self.history) = Err(error);
        self
    }

    #[must_use]
    pub fn with_reset_error(self, error: TransportError) -> Self {
        *lock_unpoisoned(&self.reset) = Some(error);
        self
    }

    /// Delay applied before every scripted byte chunk.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    #[must_use]
    pub fn with_history_delay(mut self, delay: Duration) -> Self {
        self.history_delay = delay;
        self
    }

    pub fn push_stream(&self, script: StreamScript) {
        lock_unpoisoned(&self.streams).push_back(script);
    }

    #[must_use]
    pub fn stream_requests(&self) -> Vec<StreamRequest> {
        lock_unpoisoned(&self.stream_requests).clone()
    }

    #[must_use]
    pub fn history_requests(&self) -> Vec<(String, usize)> {
        lock_unpoisoned(&self.history_requests).clone()
    }

    #[must_use]
    pub fn reset_requests(&self) -> Vec<String> {
        lock_unpoisoned(&self.reset_requests).clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn open_stream<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, Result<ChunkStream, TransportError>> {
        lock_unpoisoned(&self.stream_requests).push(request.clone());
        let script = lock_unpoisoned(&self.streams).pop_front();
        let delay = self.chunk_delay;

        Box::pin(async move {
            let script = script.ok_or_else(|| {
                TransportError::Connection("no scripted stream left".to_string())
            })?;
            Ok::<_, TransportError>(replay(script.open?, delay))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        session_key: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<HistoryEntry>, TransportError>> {
        lock_unpoisoned(&self.history_requests).push((session_key.to_string(), limit));
        let history = lock_unpoisoned(&self.history).clone();
        let delay = self.history_delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            history.map(|mut entries| {
                entries.truncate(limit);
                entries
            })
        })
    }

    fn reset_session<'a>(
        &'a self,
        session_key: &'a str,
    ) -> BoxFuture<'a, Result<ResetAck, TransportError>> {
        lock_unpoisoned(&self.reset_requests).push(session_key.to_string());
        let outcome = match lock_unpoisoned(&self.reset).clone() {
            Some(error) => Err(error),
            None => Ok(ResetAck {
                session_key: session_key.to_string(),
                message: "Session reset".to_string(),
            }),
        };

        Box::pin(future::ready(outcome))
    }
}

fn replay(steps: Vec<ChunkStep>, delay: Duration) -> ChunkStream {
    stream::unfold(
        (steps.into_iter(), false),
        move |(mut steps, ended)| async move {
            if ended {
                return None;
            }
            loop {
                let Some(step) = steps.next() else {
                    return None;
                };
                match step {
                    ChunkStep::Bytes(bytes) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        return Some((Ok(bytes), (steps, false)));
                    }
                    ChunkStep::Pause(pause) => tokio::time::sleep(pause).await,
                    ChunkStep::Fail(error) => return Some((Err(error), (steps, true))),
                    ChunkStep::Stall => future::pending::<()>().await,
                }
            }
        },
    )
    .boxed()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use chat_protocol::{ChatTransport, HistoryEntry, HistoryRole, StreamRequest, TransportError};
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    async fn collect_body(transport: &ScriptedTransport) -> Vec<Result<Vec<u8>, TransportError>> {
        let request = StreamRequest::new("webchat:main", "hi");
        let stream = transport
            .open_stream(&request)
            .await
            .expect("stream should open");
        stream.collect().await
    }

    #[tokio::test]
    async fn replays_scripted_records_in_order() {
        let transport = ScriptedTransport::new().with_stream(StreamScript::events(&[
            ("token", json!({"text": "Hi"})),
            ("done", json!({})),
        ]));

        let body = collect_body(&transport).await;

        let text: Vec<String> = body
            .into_iter()
            .map(|chunk| String::from_utf8(chunk.expect("chunk")).expect("utf8"))
            .collect();
        assert_eq!(
            text,
            vec![
                "event: token\ndata: {\"text\":\"Hi\"}\n\n".to_string(),
                "event: done\ndata: {}\n\n".to_string(),
            ]
        );
        assert_eq!(transport.stream_requests()[0].message, "hi");
    }

    #[tokio::test]
    async fn reply_splits_text_into_word_tokens() {
        let transport = ScriptedTransport::new().with_stream(StreamScript::reply("one two"));

        let body = collect_body(&transport).await;

        assert_eq!(body.len(), 3);
        let last = String::from_utf8(body[2].clone().expect("chunk")).expect("utf8");
        assert!(last.starts_with("event: done\n"));
    }

    #[tokio::test]
    async fn failure_step_ends_the_body() {
        let transport = ScriptedTransport::new().with_stream(
            StreamScript::chunks(["event: token\n"])
                .then_fail(TransportError::Connection("reset".to_string()))
                .then(ChunkStep::Bytes(b"never".to_vec())),
        );

        let body = collect_body(&transport).await;

        assert_eq!(body.len(), 2);
        assert!(matches!(body[1], Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn missing_script_is_a_connection_error() {
        let transport = ScriptedTransport::new();
        let request = StreamRequest::new("a", "b");
        let result = transport.open_stream(&request).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn history_is_limited_and_recorded() {
        let entry = |timestamp| HistoryEntry {
            session_key: "a".to_string(),
            timestamp,
            role: HistoryRole::User,
            content: Some("x".to_string()),
        };
        let transport = ScriptedTransport::new().with_history(vec![entry(1), entry(2), entry(3)]);

        let history = transport
            .fetch_history("a", 2)
            .await
            .expect("history should load");

        assert_eq!(history.len(), 2);
        assert_eq!(transport.history_requests(), vec![("a".to_string(), 2)]);
    }

    #[tokio::test]
    async fn reset_error_is_returned() {
        let transport = ScriptedTransport::new()
            .with_reset_error(TransportError::Unauthorized("bad token".to_string()));

        let result = transport.reset_session("a").await;

        assert!(matches!(result, Err(TransportError::Unauthorized(_))));
        assert_eq!(transport.reset_requests(), vec!["a".to_string()]);
    }
}

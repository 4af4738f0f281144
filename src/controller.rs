//! Drives one streaming request per session key from send to terminal state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{
    is_cancelled, new_cancel_signal, now_millis, CancelSignal, ChatMessage, ChatTransport, MessageId,
    MessageOutcome, RequestRecord, StreamRequest, TransportError,
};
use event_stream::{EventStreamLexer, LexerDiagnostics, SalvagePolicy};
use futures_util::StreamExt;
use session_store::{SessionActivity, SessionClaim, SessionStore, SessionStoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerState, MessageAssembler, STREAM_ENDED_EARLY};
use crate::config::EngineConfig;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Why a send was refused before anything reached the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("session '{0}' already has a request in flight")]
    AlreadyStreaming(String),
    #[error("session '{0}' is still loading history")]
    LoadingHistory(String),
    #[error("session '{0}' is being reset")]
    Resetting(String),
    #[error("unknown session '{0}'")]
    UnknownSession(String),
    #[error(transparent)]
    Store(SessionStoreError),
}

impl From<SessionStoreError> for SendError {
    fn from(error: SessionStoreError) -> Self {
        match error {
            SessionStoreError::UnknownSession(key) | SessionStoreError::SessionRemoved(key) => {
                Self::UnknownSession(key)
            }
            SessionStoreError::Busy {
                session_key,
                activity,
            } => match activity {
                SessionActivity::Streaming => Self::AlreadyStreaming(session_key),
                SessionActivity::LoadingHistory => Self::LoadingHistory(session_key),
                SessionActivity::Resetting => Self::Resetting(session_key),
            },
            other => Self::Store(other),
        }
    }
}

/// Failure of a history load or a session reset.
#[derive(Debug, Error)]
pub enum SessionActionError {
    #[error("unknown session '{0}'")]
    UnknownSession(String),
    #[error("session '{0}' is busy")]
    Busy(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(SessionStoreError),
}

impl From<SessionStoreError> for SessionActionError {
    fn from(error: SessionStoreError) -> Self {
        match error {
            SessionStoreError::UnknownSession(key) | SessionStoreError::SessionRemoved(key) => {
                Self::UnknownSession(key)
            }
            SessionStoreError::Busy { session_key, .. } => Self::Busy(session_key),
            other => Self::Store(other),
        }
    }
}

/// What one accepted send ended as.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub outcome: MessageOutcome,
    /// Transport failure, if that is what ended the request.
    pub error: Option<TransportError>,
    pub diagnostics: LexerDiagnostics,
}

pub struct RequestController {
    store: Arc<SessionStore>,
    transport: Arc<dyn ChatTransport>,
    config: EngineConfig,
    salvage: SalvagePolicy,
}

impl RequestController {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn ChatTransport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            salvage: SalvagePolicy::default(),
        }
    }

    /// Builds a store holding the configured session keys.
    pub fn from_config(
        transport: Arc<dyn ChatTransport>,
        config: EngineConfig,
    ) -> Result<Self, SessionStoreError> {
        let store = SessionStore::with_sessions(&config.session_keys)?;
        Ok(Self::new(Arc::new(store), transport, config))
    }

    #[must_use]
    pub fn with_salvage_policy(mut self, salvage: SalvagePolicy) -> Self {
        self.salvage = salvage;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_streaming(&self, session_key: &str) -> bool {
        self.store
            .status(session_key)
            .is_ok_and(|status| status.streaming)
    }

    /// Raises the cancel signal of the in-flight request for `session_key`.
    ///
    /// Returns false when nothing is in flight.
    pub fn abort(&self, session_key: &str) -> bool {
        let raised = self.store.cancel_stream(session_key);
        if raised {
            info!(session_key, "abort requested");
        }
        raised
    }

    /// Sends `text` on `session_key` and streams the reply into the store.
    ///
    /// Resolves once the assistant message is terminal. Transport failures
    /// are reported through the returned outcome and the session error, not
    /// as `Err`.
    pub async fn send(&self, session_key: &str, text: &str) -> Result<RequestOutcome, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let cancel = new_cancel_signal();
        let claim = self.store.begin_stream(session_key, Arc::clone(&cancel))?;

        let sent_at = now_millis();
        let user_message = ChatMessage::user(self.store.next_message_id(), text, sent_at);
        let user_message_id = user_message.id;
        let request_record = RequestRecord {
            session_key: session_key.to_string(),
            message: text.to_string(),
            timestamp: sent_at,
        };
        let placeholder = ChatMessage::assistant_placeholder(
            self.store.next_message_id(),
            now_millis(),
            Some(request_record),
        );
        let assistant_message_id = placeholder.id;

        claim.append_or_replace(user_message)?;
        claim.append_or_replace(placeholder.clone())?;
        info!(session_key, message_id = %assistant_message_id, "request started");

        let mut assembler =
            MessageAssembler::new(placeholder).with_salvage_policy(self.salvage.clone());
        let request = StreamRequest::new(session_key, text);
        let (error, diagnostics) = drive(
            self.transport.as_ref(),
            &claim,
            &request,
            &cancel,
            &mut assembler,
        )
        .await;

        if let Some(error) = &error {
            if let Err(store_error) = claim.record_error(error.kind(), error.to_string()) {
                warn!(session_key, %store_error, "could not record session error");
            }
        }

        let message = assembler.into_message();
        let outcome = if claim.is_live() {
            message.outcome.unwrap_or(MessageOutcome::Aborted)
        } else {
            MessageOutcome::Aborted
        };
        info!(
            session_key,
            message_id = %assistant_message_id,
            ?outcome,
            "request finished"
        );

        Ok(RequestOutcome {
            user_message_id,
            assistant_message_id,
            outcome,
            error,
            diagnostics,
        })
    }

    /// Replaces the transcript of `session_key` with backend history.
    ///
    /// Only entries for this session key are kept. On failure the transcript
    /// is left untouched and a dismissible session error is recorded.
    pub async fn load_history(&self, session_key: &str) -> Result<usize, SessionActionError> {
        let claim = self.store.begin_history_load(session_key)?;

        let entries = match self
            .transport
            .fetch_history(session_key, self.config.history_limit)
            .await
        {
            Ok(entries) => entries,
            Err(error) => {
                warn!(session_key, %error, "failed to load history");
                claim.record_error(error.kind(), format!("Failed to load history: {error}"))?;
                return Err(error.into());
            }
        };

        let messages: Vec<ChatMessage> = entries
            .into_iter()
            .filter(|entry| entry.session_key == session_key)
            .map(|entry| ChatMessage::from_history(self.store.next_message_id(), entry))
            .collect();
        let count = messages.len();
        claim.replace_transcript(messages)?;
        info!(session_key, count, "history loaded");
        Ok(count)
    }

    /// Resets the backend context, then clears the local transcript.
    pub async fn reset_session(&self, session_key: &str) -> Result<(), SessionActionError> {
        let claim = self.store.begin_reset(session_key)?;

        match self.transport.reset_session(session_key).await {
            Ok(ack) => {
                claim.clear()?;
                info!(session_key, message = %ack.message, "session reset");
                Ok(())
            }
            Err(error) => {
                warn!(session_key, %error, "session reset failed");
                claim.record_error(error.kind(), error.to_string())?;
                Err(error.into())
            }
        }
    }
}

/// Streams the body into `assembler` until it is terminal.
async fn drive(
    transport: &dyn ChatTransport,
    claim: &SessionClaim,
    request: &StreamRequest,
    cancel: &CancelSignal,
    assembler: &mut MessageAssembler,
) -> (Option<TransportError>, LexerDiagnostics) {
    let mut lexer = EventStreamLexer::default();

    let opened = await_or_cancel(transport.open_stream(request), cancel)
        .await
        .and_then(|result| result);
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(error) => {
            let error = close_with_error(claim, cancel, assembler, error);
            return (error, lexer.finish());
        }
    };

    let mut failure = None;
    'read: loop {
        let next = match await_or_cancel(stream.next(), cancel).await {
            Ok(next) => next,
            Err(error) => {
                failure = close_with_error(claim, cancel, assembler, error);
                break;
            }
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(error)) => {
                failure = close_with_error(claim, cancel, assembler, error);
                break;
            }
            None => {
                if !assembler.is_terminal() {
                    warn!(session_key = claim.session_key(), "stream ended without a terminal event");
                    assembler.finish_without_terminal();
                    publish(claim, assembler);
                    failure = Some(TransportError::Body(STREAM_ENDED_EARLY.to_string()));
                }
                break;
            }
        };

        for raw in lexer.feed(&bytes) {
            if is_cancelled(cancel) {
                close_with_error(claim, cancel, assembler, TransportError::Cancelled);
                break 'read;
            }

            let state = assembler.fold(raw.decode());
            if !publish(claim, assembler) {
                break 'read;
            }
            if state != AssemblerState::Streaming {
                debug!(session_key = claim.session_key(), ?state, "assembler reached terminal state");
            }
        }

        if assembler.is_terminal() {
            break;
        }
    }

    drop(stream);
    (failure, lexer.finish())
}

/// Moves the assembler to the terminal state matching `error`.
///
/// Returns the error to report, or `None` for a caller-initiated abort.
fn close_with_error(
    claim: &SessionClaim,
    cancel: &CancelSignal,
    assembler: &mut MessageAssembler,
    error: TransportError,
) -> Option<TransportError> {
    if error.is_cancelled() || is_cancelled(cancel) {
        if assembler.abort() {
            publish(claim, assembler);
        }
        return None;
    }

    warn!(session_key = claim.session_key(), %error, "request failed");
    if assembler.fail(&error.to_string()) {
        publish(claim, assembler);
    }
    Some(error)
}

/// Publishes the current snapshot; false once the session is gone.
fn publish(claim: &SessionClaim, assembler: &mut MessageAssembler) -> bool {
    match claim.append_or_replace(assembler.snapshot()) {
        Ok(()) => true,
        Err(error) => {
            warn!(session_key = claim.session_key(), %error, "session removed while streaming");
            assembler.abort();
            false
        }
    }
}

async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, TransportError>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(TransportError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(TransportError::Cancelled);
            }
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chat_protocol::{new_cancel_signal, TransportError};
    use session_store::{SessionActivity, SessionStoreError};

    use super::{await_or_cancel, SendError, SessionActionError};

    #[tokio::test]
    async fn await_or_cancel_returns_output_when_not_cancelled() {
        let cancel = new_cancel_signal();
        let output = await_or_cancel(async { 7 }, &cancel).await;
        assert!(matches!(output, Ok(7)));
    }

    #[tokio::test]
    async fn await_or_cancel_stops_a_pending_future() {
        let cancel = new_cancel_signal();
        cancel.store(true, Ordering::Release);
        let output = await_or_cancel(futures_util::future::pending::<()>(), &cancel).await;
        assert!(matches!(output, Err(TransportError::Cancelled)));
    }

    #[test]
    fn unknown_session_store_errors_map_to_dedicated_variants() {
        let send: SendError = SessionStoreError::unknown("x").into();
        assert!(matches!(send, SendError::UnknownSession(key) if key == "x"));

        let action: SessionActionError = SessionStoreError::unknown("y").into();
        assert!(matches!(action, SessionActionError::UnknownSession(key) if key == "y"));
    }

    #[test]
    fn busy_sessions_map_to_the_activity_holding_them() {
        let busy = |activity| SessionStoreError::Busy {
            session_key: "k".to_string(),
            activity,
        };

        assert!(matches!(
            SendError::from(busy(SessionActivity::Streaming)),
            SendError::AlreadyStreaming(_)
        ));
        assert!(matches!(
            SendError::from(busy(SessionActivity::LoadingHistory)),
            SendError::LoadingHistory(_)
        ));
        assert!(matches!(
            SendError::from(busy(SessionActivity::Resetting)),
            SendError::Resetting(_)
        ));
        assert!(matches!(
            SessionActionError::from(busy(SessionActivity::Streaming)),
            SessionActionError::Busy(key) if key == "k"
        ));
    }
}

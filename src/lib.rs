//! Client-side streaming transcript engine.
//!
//! Invariant: only the [`RequestController`] writes assistant messages into the
//! [`SessionStore`], and it does so with whole snapshots produced by a
//! [`MessageAssembler`].
//!
//! # Public API Overview
//! - Turn response bodies into events with [`EventStreamLexer`] and [`RawEvent::decode`].
//! - Fold events into one assistant message via [`MessageAssembler`].
//! - Run requests per session key, with cooperative abort, via [`RequestController`].
//! - Hold transcripts for many sessions in [`SessionStore`].
//! - Talk to the gateway through [`GatewayClient`], or any other [`ChatTransport`].

pub mod assembler;
pub mod config;
pub mod controller;
pub mod logging;

pub use crate::assembler::{AssemblerState, MessageAssembler, STREAM_ENDED_EARLY};
pub use crate::config::{EngineConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_SESSION_KEY};
pub use crate::controller::{RequestController, RequestOutcome, SendError, SessionActionError};
pub use crate::logging::init_logging;

pub use chat_protocol::{
    new_cancel_signal, AuditEntry, AuditNote, CancelSignal, ChatMessage, ChatTransport,
    ErrorKind, HistoryEntry, HistoryRole, MessageId, MessageOutcome, RequestRecord, ResetAck,
    Role, StreamRequest, ToolCall, TransportError,
};
pub use event_stream::{
    EventStreamLexer, LexerDiagnostics, RawEvent, SalvagePolicy, StreamEvent, TokenUsage,
};
pub use gateway_client::{GatewayClient, GatewayConfig, TokenValidation};
pub use session_store::{
    read_export, ExportHeader, SessionActivity, SessionClaim, SessionError, SessionMetadata,
    SessionStatus, SessionStore, SessionStoreError, SnapshotSink,
};

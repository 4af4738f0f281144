//! Protocol-only primitives for the gateway event stream.
//!
//! This crate turns arbitrarily chunked `text/event-stream` bytes into typed
//! [`StreamEvent`] values. It performs no I/O and holds no transcript state.
//!
//! Protocol problems never surface as errors: unknown event names become
//! [`StreamEvent::Unrecognized`] and undecodable payloads become
//! [`StreamEvent::Malformed`], so one bad record can never halt a stream.

pub mod decode;
pub mod events;
pub mod lexer;
pub mod salvage;

pub use decode::decode_event;
pub use events::{RawEvent, StreamEvent, TokenUsage};
pub use lexer::{EventStreamLexer, LexerDiagnostics};
pub use salvage::{SalvagePolicy, TextAccessor};

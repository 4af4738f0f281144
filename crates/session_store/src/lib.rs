//! Multi-session transcript store.
//!
//! Each session key owns an ordered transcript plus UI status flags. All
//! aggregate metadata is derived from the transcript on read. Writes to one
//! key are serialized by that key's lock; different keys never share mutable
//! state.

mod error;
mod export;
mod metadata;
mod paths;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use export::read_export;
pub use metadata::{format_relative_time, format_token_count, SessionMetadata};
pub use paths::{export_file_name, sanitize_for_filename};
pub use schema::{ExportHeader, ExportLine, EXPORT_VERSION};
pub use store::{
    SessionActivity, SessionClaim, SessionError, SessionStatus, SessionStore, SnapshotSink,
};

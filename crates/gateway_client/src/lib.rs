//! HTTP transport for the chat gateway.
//!
//! Owns route definitions, request construction, bearer authentication and
//! error classification. It hands raw body chunks to the caller and performs
//! no event-stream parsing of its own.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod url;

pub use client::{
    DiagnosticReport, GatewayClient, GatewayStatus, HealthStatus, LogEntry, LogsResponse,
    TokenValidation,
};
pub use config::GatewayConfig;
pub use error::{classify_failure, parse_error_message, GatewayError};
pub use crate::url::endpoint_url;

use std::fmt;
use std::sync::OnceLock;

use chat_protocol::TransportError;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

/// Errors raised while building a client or a request, before anything is sent.
#[derive(Debug)]
pub enum GatewayError {
    MissingToken,
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "gateway token is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid gateway URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<GatewayError> for TransportError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::MissingToken => Self::Unauthorized(error.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<Value>,
}

/// Extracts the human-readable message from a gateway error body.
///
/// The gateway answers `{"error": "..."}`; `{"error": {"message": ".."}}` is
/// accepted too. Anything else falls back to the raw body, then the status
/// reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let from_payload = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error)
        .and_then(|error| match error {
            Value::String(message) => Some(message),
            Value::Object(fields) => fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        })
        .filter(|message| !message.trim().is_empty());
    if let Some(message) = from_payload {
        return message;
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    } else {
        body.trim().to_string()
    }
}

fn unauthorized_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)unauthori[sz]ed|invalid.?token").expect("unauthorized regex must compile")
    })
}

fn not_provisioned_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)no.?hook.?configured").expect("provisioning regex must compile")
    })
}

/// Maps a non-success response to the transport error callers branch on.
///
/// Authentication problems are recognized by status and by message text,
/// since the gateway reports a missing session hook with a generic status.
pub fn classify_failure(status: StatusCode, message: String, session_key: &str) -> TransportError {
    if not_provisioned_regex().is_match(&message) {
        return TransportError::SessionNotProvisioned {
            session_key: session_key.to_string(),
            message,
        };
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || unauthorized_regex().is_match(&message)
    {
        return TransportError::Unauthorized(message);
    }

    TransportError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Connection-level failure with no HTTP response.
pub(crate) fn connection_error(error: &reqwest::Error) -> TransportError {
    TransportError::Connection(error.to_string())
}

/// Failure while reading or decoding a response body.
pub(crate) fn body_error(error: &reqwest::Error) -> TransportError {
    TransportError::Body(error.to_string())
}

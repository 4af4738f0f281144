use std::collections::BTreeMap;

use chat_protocol::{
    ChatTransport, ChunkStream, HistoryEntry, ResetAck, StreamRequest, TransportError,
};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ::url::Url;

use crate::config::GatewayConfig;
use crate::error::{body_error, classify_failure, connection_error, parse_error_message, GatewayError};
use crate::headers::{build_headers, to_header_map, RequestKind};
use crate::url::endpoint_url;

pub const PATH_HEALTH: &str = "health";
pub const PATH_STREAM: &str = "stream";
pub const PATH_HISTORY: &str = "history";
pub const PATH_SESSION_RESET: &str = "session/reset";
pub const PATH_STATUS: &str = "status";
pub const PATH_LOGS: &str = "logs";
pub const PATH_DIAGNOSTIC: &str = "diagnostic";

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime: f64,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub start_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub message: String,
}

/// Body of `GET /logs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub count: usize,
}

/// Body of `POST /diagnostic`. Check results are backend-defined.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosticReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub checks: BTreeMap<String, Value>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiagnosticBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    checks: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetBody<'a> {
    session_key: &'a str,
}

/// Outcome of probing whether the configured token can act on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    Valid,
    ServerUnreachable(String),
    InvalidToken,
    SessionNotConfigured { session_key: String },
    Failed(String),
}

impl TokenValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Text suitable for a configuration banner; `None` when valid.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Valid => None,
            Self::ServerUnreachable(message) => Some(format!("Server unreachable: {message}")),
            Self::InvalidToken => Some("Token is invalid or incorrect".to_string()),
            Self::SessionNotConfigured { session_key } => Some(format!(
                "Session '{session_key}' is not configured on the gateway"
            )),
            Self::Failed(message) => Some(format!("Validation failed: {message}")),
        }
    }
}

/// HTTP implementation of [`ChatTransport`] for the chat gateway.
#[derive(Debug)]
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        endpoint_url(&config.base_url, &config.api_prefix, "")?;
        let http = Client::builder().build().map_err(GatewayError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        endpoint_url(&self.config.base_url, &self.config.api_prefix, path)
    }

    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        kind: RequestKind,
    ) -> Result<RequestBuilder, GatewayError> {
        let headers = to_header_map(build_headers(&self.config, kind)?)?;
        let mut builder = self.http.request(method, url).headers(headers);
        if kind != RequestKind::EventStream {
            if let Some(timeout) = self.config.timeout {
                builder = builder.timeout(timeout);
            }
        }
        Ok(builder)
    }

    /// Liveness check; needs no token.
    pub async fn health(&self) -> Result<HealthStatus, TransportError> {
        let url = self.endpoint(PATH_HEALTH)?;
        let builder = self.build_request(Method::GET, url, RequestKind::Health)?;
        let response = send_checked(builder, "").await?;
        response
            .json::<HealthStatus>()
            .await
            .map_err(|error| body_error(&error))
    }

    /// Gateway status, including the serving model.
    pub async fn status(&self) -> Result<GatewayStatus, TransportError> {
        let url = self.endpoint(PATH_STATUS)?;
        let builder = self.build_request(Method::GET, url, RequestKind::Json)?;
        let response = send_checked(builder, "").await?;
        response
            .json::<GatewayStatus>()
            .await
            .map_err(|error| body_error(&error))
    }

    /// Recent gateway log lines. `None` or `Some(0)` leaves the count to the
    /// gateway.
    pub async fn logs(&self, lines: Option<usize>) -> Result<LogsResponse, TransportError> {
        let mut url = self.endpoint(PATH_LOGS)?;
        if let Some(lines) = lines.filter(|lines| *lines > 0) {
            url.query_pairs_mut()
                .append_pair("lines", &lines.to_string());
        }
        let builder = self.build_request(Method::GET, url, RequestKind::Json)?;
        let response = send_checked(builder, "").await?;
        response
            .json::<LogsResponse>()
            .await
            .map_err(|error| body_error(&error))
    }

    /// Runs the named checks, or every check when `checks` is `None`.
    pub async fn run_diagnostic(
        &self,
        checks: Option<&[String]>,
    ) -> Result<DiagnosticReport, TransportError> {
        let url = self.endpoint(PATH_DIAGNOSTIC)?;
        let builder = self
            .build_request(Method::POST, url, RequestKind::Json)?
            .json(&DiagnosticBody { checks });
        let response = send_checked(builder, "").await?;
        response
            .json::<DiagnosticReport>()
            .await
            .map_err(|error| body_error(&error))
    }

    /// Checks reachability, then the token, by resetting `session_key`.
    ///
    /// The check resets the backend context of that session.
    pub async fn validate_token(&self, session_key: &str) -> TokenValidation {
        if self.config.token.trim().is_empty() || session_key.trim().is_empty() {
            return TokenValidation::Failed("Token or session key not configured".to_string());
        }

        if let Err(error) = self.health().await {
            tracing::warn!(%error, "gateway health check failed");
            return TokenValidation::ServerUnreachable(error.to_string());
        }

        match self.reset(session_key).await {
            Ok(_) => TokenValidation::Valid,
            Err(TransportError::Unauthorized(_)) => TokenValidation::InvalidToken,
            Err(TransportError::SessionNotProvisioned { session_key, .. }) => {
                TokenValidation::SessionNotConfigured { session_key }
            }
            Err(error) => TokenValidation::Failed(error.to_string()),
        }
    }

    async fn stream(&self, request: &StreamRequest) -> Result<ChunkStream, TransportError> {
        let url = self.endpoint(PATH_STREAM)?;
        let builder = self
            .build_request(Method::POST, url, RequestKind::EventStream)?
            .json(request);
        let response = send_checked(builder, &request.session_key).await?;
        tracing::debug!(session_key = %request.session_key, "gateway stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|error| body_error(&error))
            })
            .boxed())
    }

    async fn history(
        &self,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, TransportError> {
        let mut url = self.endpoint(PATH_HISTORY)?;
        if limit > 0 {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        let builder = self.build_request(Method::GET, url, RequestKind::Json)?;
        let response = send_checked(builder, session_key).await?;
        let body = response
            .json::<HistoryResponse>()
            .await
            .map_err(|error| body_error(&error))?;
        Ok(body.history)
    }

    async fn reset(&self, session_key: &str) -> Result<ResetAck, TransportError> {
        let url = self.endpoint(PATH_SESSION_RESET)?;
        let builder = self
            .build_request(Method::POST, url, RequestKind::Json)?
            .json(&ResetBody { session_key });
        let response = send_checked(builder, session_key).await?;
        response
            .json::<ResetAck>()
            .await
            .map_err(|error| body_error(&error))
    }
}

impl ChatTransport for GatewayClient {
    fn open_stream<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, Result<ChunkStream, TransportError>> {
        Box::pin(self.stream(request))
    }

    fn fetch_history<'a>(
        &'a self,
        session_key: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<HistoryEntry>, TransportError>> {
        Box::pin(self.history(session_key, limit))
    }

    fn reset_session<'a>(
        &'a self,
        session_key: &'a str,
    ) -> BoxFuture<'a, Result<ResetAck, TransportError>> {
        Box::pin(self.reset(session_key))
    }
}

async fn send_checked(builder: RequestBuilder, session_key: &str) -> Result<Response, TransportError> {
    let response = builder.send().await.map_err(|error| {
        tracing::warn!(%error, "gateway request failed to send");
        connection_error(&error)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_error_message(status, &body);
    tracing::warn!(status = status.as_u16(), %message, "gateway returned an error");
    Err(classify_failure(status, message, session_key))
}

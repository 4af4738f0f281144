use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Which endpoint family a header set is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Unauthenticated liveness check.
    Health,
    /// Authenticated JSON request.
    Json,
    /// Authenticated request answered with an event stream.
    EventStream,
}

/// Build a deterministic header map for gateway requests.
pub fn build_headers(
    config: &GatewayConfig,
    kind: RequestKind,
) -> Result<BTreeMap<String, String>, GatewayError> {
    let mut headers = BTreeMap::new();

    if kind != RequestKind::Health {
        let token = config.token.trim();
        if token.is_empty() {
            return Err(GatewayError::MissingToken);
        }
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
        headers.insert(
            HEADER_CONTENT_TYPE.to_owned(),
            "application/json".to_owned(),
        );
    }

    let accept = match kind {
        RequestKind::EventStream => "text/event-stream",
        RequestKind::Health | RequestKind::Json => "application/json",
    };
    headers.insert(HEADER_ACCEPT.to_owned(), accept.to_owned());

    let user_agent = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(default_user_agent, str::to_owned);
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(headers)
}

pub(crate) fn to_header_map(headers: BTreeMap<String, String>) -> Result<HeaderMap, GatewayError> {
    let mut out = HeaderMap::new();
    for (key, value) in headers {
        out.insert(
            HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| GatewayError::InvalidHeader(format!("invalid header key: {key}")))?,
            HeaderValue::from_str(&value)
                .map_err(|_| GatewayError::InvalidHeader(format!("invalid value for {key}")))?,
        );
    }
    Ok(out)
}

fn default_user_agent() -> String {
    format!("transcript-engine/{}", env!("CARGO_PKG_VERSION"))
}

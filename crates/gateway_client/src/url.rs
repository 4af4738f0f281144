use ::url::Url;

use crate::error::GatewayError;

/// Default gateway origin for local development.
pub const DEFAULT_GATEWAY_BASE_URL: &str = "http://localhost:8080";
/// Default path prefix for gateway endpoints.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Joins `base_url`, `api_prefix` and `path` into one endpoint URL.
///
/// An empty base falls back to [`DEFAULT_GATEWAY_BASE_URL`]. Any path already
/// on the base is kept, and slashes between the parts are normalized.
pub fn endpoint_url(base_url: &str, api_prefix: &str, path: &str) -> Result<Url, GatewayError> {
    let base = match base_url.trim() {
        "" => DEFAULT_GATEWAY_BASE_URL,
        trimmed => trimmed,
    };

    let mut root =
        Url::parse(base).map_err(|error| GatewayError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if root.cannot_be_a_base() {
        return Err(GatewayError::InvalidBaseUrl(base.to_string()));
    }
    if !root.path().ends_with('/') {
        let with_slash = format!("{}/", root.path());
        root.set_path(&with_slash);
    }

    let relative = [api_prefix, path]
        .iter()
        .map(|part| part.trim().trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    root.join(&relative)
        .map_err(|error| GatewayError::InvalidBaseUrl(format!("{relative}: {error}")))
}

use std::collections::BTreeMap;
use std::time::Duration;

use crate::url::{DEFAULT_API_PREFIX, DEFAULT_GATEWAY_BASE_URL};

/// Connection settings for the chat gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer token passed to `Authorization`.
    pub token: String,
    /// Scheme, host and port of the gateway.
    pub base_url: String,
    /// Path prefix every endpoint lives under.
    pub api_prefix: String,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional timeout for non-streaming requests.
    pub timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: DEFAULT_GATEWAY_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

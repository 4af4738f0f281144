//! Environment configuration.

use std::env;

pub const DEFAULT_SESSION_KEY: &str = "webchat:main";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sessions created at startup; the first one is active.
    pub session_keys: Vec<String>,
    pub history_limit: usize,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_keys: vec![DEFAULT_SESSION_KEY.to_string()],
            history_limit: DEFAULT_HISTORY_LIMIT,
            debug: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let session_keys = env_string_opt("TRANSCRIPT_SESSION_KEYS")
            .map(|value| parse_session_keys(&value))
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SESSION_KEY.to_string()]);

        Self {
            session_keys,
            history_limit: env_usize("TRANSCRIPT_HISTORY_LIMIT").unwrap_or(DEFAULT_HISTORY_LIMIT),
            debug: env_flag("TRANSCRIPT_DEBUG"),
        }
    }
}

fn parse_session_keys(value: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in value.split(',').map(str::trim).filter(|key| !key.is_empty()) {
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_usize(key: &str) -> Option<usize> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

//! Logging bootstrap for binaries and demos embedding the engine.
//!
//! Library code only emits through `tracing`; installing a subscriber is left
//! to the host process.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(config: &EngineConfig) -> &'static str {
    if config.debug {
        "debug"
    } else {
        "info"
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logging(config: &EngineConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}

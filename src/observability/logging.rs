//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Pick the output format (pretty for development, JSON for production)
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Initialization is fallible instead of panicking when a subscriber is
//!   already installed (tests, embedding applications)

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// Filter directive derived from the configured level.
pub fn default_directive(level: &str) -> String {
    format!("rpc_gateway={level},tower_http={level}")
}

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    match config.log_format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}

//! Log subscriber bootstrap.

use crate::config::LogConfig;
use crate::error::TransportError;
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured filter applies.
pub fn init(config: &LogConfig) -> Result<(), TransportError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter)),
        )
        .try_init()
        .map_err(|e| TransportError::Logging(e.to_string()))
}

//! Subscriber installation for binaries and examples embedding checkflow.

use crate::config::{ConfigError, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered by `config.filter`.
///
/// `RUST_LOG` is not consulted; set [`LoggingConfig::filter`] (or
/// `CHECKFLOW_LOG`) instead. Returns `false` when a global subscriber was
/// already installed, which leaves the existing one in place.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the filter directive does not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::Invalid {
        key: "logging.filter".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if config.json {
        builder.json().with_current_span(true).try_init().is_ok()
    } else {
        builder.compact().try_init().is_ok()
    };
    Ok(installed)
}

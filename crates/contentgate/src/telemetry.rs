//! Process-wide logging setup.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ConfigError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber and routes `log` records into it.
///
/// Returns `Ok(false)` when logging was already initialized by an earlier
/// call. `RUST_LOG` overrides `config.level` when set.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let configured = EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e)))?;

    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);
    let fmt_layer = (!config.json).then(tracing_subscriber::fmt::layer);
    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_current_span(true));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        INITIALIZED.store(false, Ordering::SeqCst);
        return Err(ConfigError::Logging(e.to_string()));
    }
    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(true)
}

/// Whether [`init_logging`] has installed a subscriber.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

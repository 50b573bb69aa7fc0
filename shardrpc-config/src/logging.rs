//! Process-wide logging setup
//!
//! Call [`init`] once from the process entry point, before any reactor is
//! started. Later calls leave the installed subscriber untouched.

use crate::{config::LoggingConfig, ConfigError, Result};
use parking_lot::{const_mutex, Mutex};
use tracing_subscriber::EnvFilter;

static INSTALLED: Mutex<bool> = const_mutex(false);

/// Build the event filter for `config`.
///
/// Explicit directives win, then `RUST_LOG`, then the configured level.
pub fn filter_for(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Some(directives) = &config.directives {
        return EnvFilter::try_new(directives)
            .map_err(|e| ConfigError::Logging(format!("invalid directives '{}': {}", directives, e)));
    }
    
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e))),
    }
}

/// Install the global tracing subscriber.
///
/// Returns `Ok(true)` when this call installed it and `Ok(false)` when
/// logging was already initialized.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let mut installed = INSTALLED.lock();
    if *installed {
        return Ok(false);
    }
    
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(config)?)
        .with_ansi(config.colored)
        .with_thread_names(true);
    
    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))?;
    
    *installed = true;
    Ok(true)
}

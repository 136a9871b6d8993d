//! Tracing setup for the catalog server.
//!
//! The filter sits behind a reload layer: the binary starts at a bootstrap
//! level, then swaps in the configured level once the configuration is read.
//! `RUST_LOG` always wins over both.

use std::sync::OnceLock;

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Appended to every configured level; transport internals stay quiet.
const DEPENDENCY_DIRECTIVES: &str = "hyper=warn,tungstenite=warn,tokio_tungstenite=warn";

/// Where the active log level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    Config,
    Environment,
}

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid log level '{level}': {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: ParseError,
    },

    #[error("tracing has not been initialized")]
    NotInitialized,

    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

fn filter_for(level: &str) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(format!("{level},{DEPENDENCY_DIRECTIVES}"))
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| filter_for(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (reload_layer, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        tracing::debug!("Tracing already initialized");
        return;
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
    {
        eprintln!("Failed to install tracing subscriber: {e}");
    }
}

/// Swap in the configured level. With `RUST_LOG` set the environment filter
/// is kept and [`LevelSource::Environment`] is returned.
pub fn apply_logging_level(level: &str) -> Result<LevelSource, ObservabilityError> {
    let filter = filter_for(level).map_err(|source| ObservabilityError::InvalidLevel {
        level: level.to_string(),
        source,
    })?;
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(LevelSource::Environment);
    }
    let handle = FILTER_HANDLE
        .get()
        .ok_or(ObservabilityError::NotInitialized)?;
    handle.reload(filter)?;
    Ok(LevelSource::Config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_levels_build_filters() {
        for level in ["trace", "debug", "info", "warn", "error", "off"] {
            assert!(filter_for(level).is_ok(), "{level}");
        }
    }

    #[test]
    fn test_invalid_level_is_rejected_before_reload() {
        let err = apply_logging_level("catalog=loud").unwrap_err();
        assert!(matches!(err, ObservabilityError::InvalidLevel { .. }));
        assert!(err.to_string().contains("catalog=loud"));
    }
}

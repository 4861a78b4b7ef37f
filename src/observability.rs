//! Structured logging setup.
//!
//! The library only emits `tracing` events. Host applications install a
//! subscriber themselves or call [`init_tracing`] for the stock one.

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Registry,
};

use crate::{Error, Result};

/// Tracing configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON output format
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Install a global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Returns `Ok(false)` if a
/// subscriber was already installed in this process.
///
/// # Errors
///
/// Returns a configuration error if `level` is neither a level name nor a
/// `target=level` directive list.
pub fn init_tracing(level: &str, json: bool) -> Result<bool> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(level)?,
    };

    let installed = if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(level, json, "Tracing initialized");
    }
    Ok(installed)
}

/// Install a subscriber from a [`TracingConfig`].
///
/// # Errors
///
/// See [`init_tracing`].
pub fn init_from_config(config: &TracingConfig) -> Result<bool> {
    init_tracing(&config.level, config.json)
}

/// Parse a log level or directive list into a filter.
fn parse_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    if level.parse::<LevelFilter>().is_err() && !level.contains('=') {
        return Err(Error::config(format!("invalid log level '{level}'")));
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::config(format!("invalid log level '{level}': {e}")))
}

/// Read tracing configuration from the environment.
///
/// - `EMBER_LOG_LEVEL` - Log level (default: "info")
/// - `EMBER_LOG_JSON` - Enable JSON output (default: false)
#[must_use]
pub fn config_from_env() -> TracingConfig {
    config_from_lookup(|key| std::env::var(key).ok())
}

fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TracingConfig {
    let level = lookup("EMBER_LOG_LEVEL")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let json = lookup("EMBER_LOG_JSON")
        .is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"));

    TracingConfig { level, json }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = config_from_lookup(|key| match key {
            "EMBER_LOG_LEVEL" => Some("debug".to_string()),
            "EMBER_LOG_JSON" => Some("YES".to_string()),
            _ => None,
        });
        assert_eq!(config.level, "debug");
        assert!(config.json);
    }

    #[test]
    fn test_config_from_lookup_defaults() {
        let config = config_from_lookup(|_| None);
        assert_eq!(config, TracingConfig::default());

        let config = config_from_lookup(|key| (key == "EMBER_LOG_JSON").then(|| "off".to_string()));
        assert!(!config.json);
    }

    #[test]
    fn test_parse_filter_accepts_levels_and_directives() {
        for level in ["info", "DEBUG", "off", " warn ", "ember=trace,warn"] {
            assert!(parse_filter(level).is_ok(), "'{level}' should parse");
        }
    }

    #[test]
    fn test_parse_filter_rejects_unknown_level() {
        for level in ["verbose", "", "loud"] {
            let err = parse_filter(level).unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("invalid log level"));
        }
    }

    #[test]
    fn test_second_init_reports_false() {
        let _ = init_tracing("warn", false);
        assert!(!init_from_config(&TracingConfig::default()).unwrap());
    }
}

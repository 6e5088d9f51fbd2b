//! Subscriber setup for applications embedding Crosscast
//!
//! The library itself only emits `tracing` events. Hosts that want them on
//! stderr call [`LoggingConfig::init`] once, usually with settings from the
//! `[logging]` section of the config file:
//!
//! ```no_run
//! use libcrosscast::config::Config;
//! use libcrosscast::logging::LoggingConfig;
//!
//! # fn example() -> libcrosscast::Result<()> {
//! let config = Config::load_or_default()?;
//! LoggingConfig::from_settings(&config.logging).init()?;
//! # Ok(())
//! # }
//! ```
//!
//! `RUST_LOG` wins over the configured level when set.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::error::{ConfigError, Result};

/// Overrides the configured log format
pub const LOG_FORMAT_ENV: &str = "CROSSCAST_LOG_FORMAT";

/// Overrides the configured log level
pub const LOG_LEVEL_ENV: &str = "CROSSCAST_LOG_LEVEL";

/// Output format of the stderr subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain lines without colors
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output
    Pretty,
}

impl LogFormat {
    pub const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        LogFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                reason: format!("'{}' is not one of text, json, pretty", s),
            })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved subscriber settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. "info" or "libcrosscast=debug,warn"
    pub level: String,
    /// Forces debug level regardless of `level`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Settings from the `[logging]` config section, with
    /// `CROSSCAST_LOG_FORMAT` / `CROSSCAST_LOG_LEVEL` taking precedence
    ///
    /// An unparseable `CROSSCAST_LOG_FORMAT` is ignored.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(settings.format);
        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| settings.level.clone());

        Self::new(format, level)
    }

    /// Build the level filter
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `level` is not a valid
    /// filter directive.
    pub fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        let directives = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_new(directives).map_err(|e| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("'{}': {}", directives, e),
            }
            .into()
        })
    }

    /// Install the global subscriber writing to stderr
    ///
    /// # Errors
    ///
    /// Fails on an invalid level or when a global subscriber is already set.
    pub fn init(&self) -> Result<()> {
        let filter = self.filter()?;

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .try_init(),
        };

        installed.map_err(|e| {
            ConfigError::InvalidValue {
                field: "logging".to_string(),
                reason: format!("could not install subscriber: {}", e),
            }
            .into()
        })
    }
}

/// Install a subscriber from the environment variables alone
pub fn init_default() -> Result<()> {
    LoggingConfig::from_settings(&LoggingSettings::default()).init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.to_string().contains("logging.format"));
    }

    #[test]
    #[serial]
    fn test_settings_used_without_env() {
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_LEVEL_ENV);

        let settings = LoggingSettings {
            format: LogFormat::Pretty,
            level: "warn".to_string(),
        };
        let config = LoggingConfig::from_settings(&settings);
        assert_eq!(config, LoggingConfig::new(LogFormat::Pretty, "warn"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_settings() {
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_LEVEL_ENV, "libcrosscast=trace");
        let config = LoggingConfig::from_settings(&LoggingSettings::default());
        std::env::set_var(LOG_FORMAT_ENV, "xml");
        let fallback = LoggingConfig::from_settings(&LoggingSettings::default());
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_LEVEL_ENV);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "libcrosscast=trace");
        assert_eq!(fallback.format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_filter_rejects_bad_directive() {
        std::env::remove_var("RUST_LOG");

        assert!(LoggingConfig::new(LogFormat::Text, "info").filter().is_ok());
        assert!(LoggingConfig::new(LogFormat::Text, "libcrosscast=debug,warn")
            .filter()
            .is_ok());
        assert!(LoggingConfig::new(LogFormat::Text, "libcrosscast=loud")
            .filter()
            .is_err());

        // Verbose ignores the configured level entirely
        assert!(LoggingConfig::new(LogFormat::Text, "libcrosscast=loud")
            .verbose(true)
            .filter()
            .is_ok());
    }
}

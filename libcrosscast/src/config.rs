//! Configuration management for Crosscast
//!
//! Configuration is a TOML file. Every section and field is optional; anything
//! left out keeps its built-in default.
//!
//! ```toml
//! [retry.posting]
//! max_attempts = 4
//! initial_delay = "500ms"
//! max_delay = "10s"
//!
//! [retry.validation]
//! retry_on = ["network", "server"]
//!
//! [logging]
//! format = "json"
//! level = "debug"
//!
//! [events]
//! capacity = 256
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ErrorKind, Result};
use crate::logging::LogFormat;
use crate::retry::{RetryPolicies, RetryPolicy};
use crate::service::events::DEFAULT_CAPACITY;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "CROSSCAST_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub logging: LoggingSettings,
    pub events: EventsConfig,
}

/// Per-category overrides of the retry presets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub posting: PolicyOverride,
    pub authentication: PolicyOverride,
    pub validation: PolicyOverride,
}

/// Fields replacing parts of one preset; delays are humantime strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverride {
    pub max_attempts: Option<u32>,
    pub initial_delay: Option<String>,
    pub max_delay: Option<String>,
    pub backoff_multiplier: Option<f64>,
    pub retry_on: Option<Vec<ErrorKind>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before a lagging one misses some
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load from the default location, or use defaults if there is no file
    pub fn load_or_default() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value that can be wrong without failing to parse
    pub fn validate(&self) -> Result<()> {
        self.retry.policies()?;

        if self.events.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "events.capacity".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl RetryConfig {
    /// The presets with these overrides applied
    pub fn policies(&self) -> Result<RetryPolicies> {
        let defaults = RetryPolicies::default();
        Ok(RetryPolicies {
            posting: self.posting.apply("retry.posting", defaults.posting)?,
            authentication: self
                .authentication
                .apply("retry.authentication", defaults.authentication)?,
            validation: self.validation.apply("retry.validation", defaults.validation)?,
        })
    }
}

impl PolicyOverride {
    /// Apply the fields that are set on top of `base`
    pub fn apply(&self, section: &str, base: RetryPolicy) -> Result<RetryPolicy> {
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
            field: format!("{}.{}", section, field),
            reason,
        };

        let mut policy = base;
        if let Some(max_attempts) = self.max_attempts {
            if max_attempts == 0 {
                return Err(invalid("max_attempts", "must be at least 1".to_string()).into());
            }
            policy.max_attempts = max_attempts;
        }
        if let Some(delay) = &self.initial_delay {
            policy.initial_delay =
                parse_delay(delay).map_err(|reason| invalid("initial_delay", reason))?;
        }
        if let Some(delay) = &self.max_delay {
            policy.max_delay = parse_delay(delay).map_err(|reason| invalid("max_delay", reason))?;
        }
        if let Some(multiplier) = self.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(invalid(
                    "backoff_multiplier",
                    format!("must be a number >= 1.0, got {}", multiplier),
                )
                .into());
            }
            policy.backoff_multiplier = multiplier;
        }
        if let Some(kinds) = &self.retry_on {
            if let Some(kind) = kinds.iter().find(|kind| !kind.is_transient()) {
                return Err(invalid(
                    "retry_on",
                    format!("'{}' failures are never retried", kind),
                )
                .into());
            }
            policy.retry_on = kinds.iter().copied().collect();
        }

        if policy.initial_delay > policy.max_delay {
            return Err(invalid(
                "initial_delay",
                format!(
                    "{:?} is longer than max_delay {:?}",
                    policy.initial_delay, policy.max_delay
                ),
            )
            .into());
        }
        Ok(policy)
    }
}

fn parse_delay(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| format!("'{}': {}", value, e))
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosscastError;
    use serial_test::serial;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_presets() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry.policies().unwrap(), RetryPolicies::default());
        assert_eq!(config.events.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_override_keeps_other_fields() {
        let config = Config::parse(
            r#"
            [retry.posting]
            max_attempts = 5
            initial_delay = "500ms"

            [retry.validation]
            retry_on = ["network", "server"]
            "#,
        )
        .unwrap();

        let policies = config.retry.policies().unwrap();
        assert_eq!(policies.posting.max_attempts, 5);
        assert_eq!(policies.posting.initial_delay, Duration::from_millis(500));
        assert_eq!(policies.posting.max_delay, Duration::from_secs(15));
        assert_eq!(policies.posting.backoff_multiplier, 2.0);
        assert_eq!(
            policies.validation.retry_on,
            BTreeSet::from([ErrorKind::Network, ErrorKind::Server])
        );
        assert_eq!(policies.authentication, RetryPolicy::authentication());
    }

    #[test]
    fn test_logging_and_events_sections() {
        let config = Config::parse(
            r#"
            [logging]
            format = "json"
            level = "debug"

            [events]
            capacity = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.events.capacity, 16);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            "[retry.posting]\nmax_attempts = 0",
            "[retry.posting]\ninitial_delay = \"soon\"",
            "[retry.posting]\nbackoff_multiplier = 0.5",
            "[retry.authentication]\ninitial_delay = \"10s\"",
            "[retry.posting]\nretry_on = [\"invalid_credentials\"]",
            "[events]\ncapacity = 0",
        ];

        for case in cases {
            let result = Config::parse(case);
            assert!(
                matches!(result, Err(CrosscastError::Config(ConfigError::InvalidValue { .. }))),
                "{} -> {:?}",
                case,
                result
            );
        }
    }

    #[test]
    fn test_rejects_unknown_policy_field() {
        let result = Config::parse("[retry.posting]\nmax_retries = 3");
        assert!(matches!(
            result,
            Err(CrosscastError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[retry.posting]\nmax_delay = \"30s\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(
            config.retry.policies().unwrap().posting.max_delay,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_load_from_missing_path_is_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load_from_path(&temp_dir.path().join("absent.toml"));
        assert!(matches!(
            result,
            Err(CrosscastError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_env_var_overrides_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(&path, "[events]\ncapacity = 7\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let resolved = resolve_config_path();
        let loaded = Config::load();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(resolved.unwrap(), path);
        assert_eq!(loaded.unwrap().events.capacity, 7);
    }

    #[test]
    #[serial]
    fn test_load_or_default_without_file() {
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var(CONFIG_ENV, temp_dir.path().join("missing.toml"));
        let config = Config::load_or_default();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(config.unwrap(), Config::default());
    }
}

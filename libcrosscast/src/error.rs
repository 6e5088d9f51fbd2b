//! Error types for Crosscast
//!
//! Publisher failures are always expressed as a [`PlatformError`], whose variant
//! determines the [`ErrorKind`] that retry policies and result consumers reason
//! about. Orchestrator-level failures (bad input, concurrent calls) are separate
//! [`CrosscastError`] variants and never end up inside a `PostResult`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::service::progress::InvalidTransition;

pub type Result<T> = std::result::Result<T, CrosscastError>;

/// Result type returned by platform publishers
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A publish operation is already in progress")]
    AlreadyInProgress,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    /// For [`CredentialStore`](crate::credentials::CredentialStore)
    /// implementations whose storage (keychain, file, remote service) cannot
    /// be reached. Unlike `NotFound`, it aborts credential loading.
    #[error("Credential backend unavailable: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Invalid account id: {0}")]
    InvalidId(String),

    #[error("Account '{0}' not found for platform '{1}'")]
    NotFound(String, String),

    #[error("Account '{account}' belongs to {actual}, not {expected}")]
    PlatformMismatch {
        account: String,
        expected: String,
        actual: String,
    },

    #[error("Account '{0}' is not active")]
    Inactive(String),
}

/// Closed vocabulary of publish failure kinds
///
/// Every publisher failure maps to exactly one kind. Retry eligibility and the
/// user-facing failure summary are derived from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Authentication,
    RateLimit,
    ContentTooLong,
    PlatformUnavailable,
    InvalidCredentials,
    Server,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::RateLimit,
        ErrorKind::ContentTooLong,
        ErrorKind::PlatformUnavailable,
        ErrorKind::InvalidCredentials,
        ErrorKind::Server,
        ErrorKind::Unknown,
    ];

    /// Whether a failure of this kind may succeed if simply tried again.
    ///
    /// Retry policies can narrow this set but never widen it.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Server | ErrorKind::RateLimit)
    }

    /// Classify an HTTP status code returned by a platform API
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::InvalidCredentials,
            408 => ErrorKind::Network,
            413 | 422 => ErrorKind::ContentTooLong,
            429 => ErrorKind::RateLimit,
            502..=504 => ErrorKind::PlatformUnavailable,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }

    /// Short label for failure summaries ("mastodon / alice: rate-limited")
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network error",
            ErrorKind::Authentication => "authentication failed",
            ErrorKind::RateLimit => "rate-limited",
            ErrorKind::ContentTooLong => "content too long",
            ErrorKind::PlatformUnavailable => "platform unavailable",
            ErrorKind::InvalidCredentials => "invalid credentials",
            ErrorKind::Server => "server error",
            ErrorKind::Unknown => "unknown error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ContentTooLong => "content_too_long",
            ErrorKind::PlatformUnavailable => "platform_unavailable",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::Server => "server",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.to_string() == normalized || normalized == kind.to_string().replace('_', ""))
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "error kind".to_string(),
                reason: format!("unknown error kind '{}'", s),
            })
    }
}

/// A failure reported by a platform publisher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Content too long: {0}")]
    ContentTooLong(String),

    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("{0}")]
    Unknown(String),
}

impl PlatformError {
    /// Build an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Network => PlatformError::Network(message),
            ErrorKind::Authentication => PlatformError::Authentication(message),
            ErrorKind::RateLimit => PlatformError::RateLimit(message),
            ErrorKind::ContentTooLong => PlatformError::ContentTooLong(message),
            ErrorKind::PlatformUnavailable => PlatformError::PlatformUnavailable(message),
            ErrorKind::InvalidCredentials => PlatformError::InvalidCredentials(message),
            ErrorKind::Server => PlatformError::Server(message),
            ErrorKind::Unknown => PlatformError::Unknown(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Network(_) => ErrorKind::Network,
            PlatformError::Authentication(_) => ErrorKind::Authentication,
            PlatformError::RateLimit(_) => ErrorKind::RateLimit,
            PlatformError::ContentTooLong(_) => ErrorKind::ContentTooLong,
            PlatformError::PlatformUnavailable(_) => ErrorKind::PlatformUnavailable,
            PlatformError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            PlatformError::Server(_) => ErrorKind::Server,
            PlatformError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            PlatformError::Network(m)
            | PlatformError::Authentication(m)
            | PlatformError::RateLimit(m)
            | PlatformError::ContentTooLong(m)
            | PlatformError::PlatformUnavailable(m)
            | PlatformError::InvalidCredentials(m)
            | PlatformError::Server(m)
            | PlatformError::Unknown(m) => m,
        }
    }
}

//! Diagnostics sink for publish failures
//!
//! The orchestrator and retry executor report failures and recoveries through a
//! [`Diagnostics`] value handed to them at construction. Every implementation in
//! this module redacts credential-shaped text before it is recorded.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{LazyLock, Mutex, PoisonError};
use tracing::{info, warn};

use crate::error::{ErrorKind, PlatformError};

pub const REDACTED: &str = "[REDACTED]";

struct RedactionRule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> RedactionRule {
    RedactionRule {
        pattern: Regex::new(pattern).expect("redaction pattern must compile"),
        replacement,
    }
}

// Order matters: PEM blocks and bearer headers before the generic key=value rule.
static RULES: LazyLock<Vec<RedactionRule>> = LazyLock::new(|| {
    vec![
        rule(
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
            REDACTED,
        ),
        rule(r"(?i)\b(bearer)\s+[A-Za-z0-9\-._~+/]+=*", "$1 [REDACTED]"),
        rule(
            r#"(?i)\b(access_token|refresh_token|id_token|token|password|passwd|secret|client_secret|api_key|apikey|app_password|private_key|authorization)\b(\s*[:=]\s*)"?[^\s"&,;]+"?"#,
            "$1$2[REDACTED]",
        ),
        rule(r"\bnsec1[02-9ac-hj-np-z]{20,}\b", REDACTED),
        rule(r"\b[0-9a-fA-F]{64}\b", REDACTED),
        rule(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}", REDACTED),
    ]
});

/// Remove credential-shaped values from free text
///
/// Covers bearer headers, `key=value` / `key: value` secrets, Nostr `nsec1`
/// keys, 64-digit hex private keys, PEM private key blocks and email
/// addresses.
pub fn redact(text: &str) -> String {
    RULES.iter().fold(text.to_string(), |acc, rule| {
        rule.pattern.replace_all(&acc, rule.replacement).into_owned()
    })
}

/// One recorded diagnostic, already redacted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub at: DateTime<Utc>,
    pub context: String,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

/// Receiver for failure and recovery reports
pub trait Diagnostics: Send + Sync {
    /// A final or intermediate failure of an operation identified by `context`
    fn record_failure(&self, context: &str, error: &PlatformError);

    /// An operation succeeded after `attempts` tries
    fn record_recovery(&self, context: &str, attempts: u32) {
        let _ = (context, attempts);
    }
}

/// Forwards redacted diagnostics to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record_failure(&self, context: &str, error: &PlatformError) {
        warn!(
            context = %redact(context),
            kind = %error.kind(),
            "{}",
            redact(&error.to_string())
        );
    }

    fn record_recovery(&self, context: &str, attempts: u32) {
        info!(context = %redact(context), attempts, "Recovered after retry");
    }
}

/// Keeps redacted entries in memory
///
/// Useful for tests and for UIs that show a recent-errors panel.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<Vec<DiagnosticEntry>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failures(&self) -> Vec<DiagnosticEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.kind.is_some())
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, entry: DiagnosticEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn record_failure(&self, context: &str, error: &PlatformError) {
        self.push(DiagnosticEntry {
            at: Utc::now(),
            context: redact(context),
            kind: Some(error.kind()),
            message: redact(&error.to_string()),
        });
    }

    fn record_recovery(&self, context: &str, attempts: u32) {
        self.push(DiagnosticEntry {
            at: Utc::now(),
            context: redact(context),
            kind: None,
            message: format!("recovered after {} attempts", attempts),
        });
    }
}

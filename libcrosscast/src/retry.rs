//! Retry execution with exponential backoff and jitter
//!
//! Every fallible publisher call goes through a [`RetryExecutor`] with the
//! [`RetryPolicy`] of its [`OperationCategory`]. Whether a failure is retried
//! depends only on its [`ErrorKind`]: the policy lists the kinds it retries,
//! and kinds that are not transient (see [`ErrorKind::is_transient`]) are never
//! retried regardless of the policy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosscast::diagnostics::TracingDiagnostics;
//! use libcrosscast::error::PlatformError;
//! use libcrosscast::retry::{RetryExecutor, RetryPolicy};
//!
//! # async fn example() {
//! let executor = RetryExecutor::new(Arc::new(TracingDiagnostics));
//! let result: Result<String, PlatformError> = executor
//!     .execute(&RetryPolicy::posting(), "nostr/main", || async {
//!         Ok("note1abc".to_string())
//!     })
//!     .await;
//! # }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::diagnostics::{redact, Diagnostics};
use crate::error::{ErrorKind, PlatformResult};

/// Upper bound (exclusive) of the random jitter, as a fraction of the delay
pub const JITTER_FRACTION: f64 = 0.25;

/// Kind of operation being retried; each has its own preset policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Posting,
    Authentication,
    Validation,
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationCategory::Posting => write!(f, "posting"),
            OperationCategory::Authentication => write!(f, "authentication"),
            OperationCategory::Validation => write!(f, "validation"),
        }
    }
}

/// Bounded retry schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt (before jitter)
    pub initial_delay: Duration,
    /// Cap applied when growing the delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Error kinds this policy retries
    pub retry_on: BTreeSet<ErrorKind>,
}

impl RetryPolicy {
    /// Preset for publishing posts: 3 attempts, 2s -> 15s, x2.0, retries
    /// network and server failures
    pub fn posting() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            retry_on: BTreeSet::from([ErrorKind::Network, ErrorKind::Server]),
        }
    }

    /// Preset for authentication: 2 attempts, 1s -> 5s, x1.5, network only
    pub fn authentication() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            retry_on: BTreeSet::from([ErrorKind::Network]),
        }
    }

    /// Preset for connection validation: 2 attempts, 0.5s -> 3s, x2.0,
    /// network only
    pub fn validation() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            retry_on: BTreeSet::from([ErrorKind::Network]),
        }
    }

    pub fn for_category(category: OperationCategory) -> Self {
        match category {
            OperationCategory::Posting => Self::posting(),
            OperationCategory::Authentication => Self::authentication(),
            OperationCategory::Validation => Self::validation(),
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            retry_on: BTreeSet::new(),
        }
    }

    /// Same attempt budget and retried kinds with different delays
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        kind.is_transient() && self.retry_on.contains(&kind)
    }

    /// Delay after `delay`, grown by the multiplier and capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let grown = delay.as_secs_f64() * self.backoff_multiplier;
        if !grown.is_finite() || grown < 0.0 || grown > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(grown)
        }
    }
}

/// The three policies an orchestrator uses
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicies {
    pub posting: RetryPolicy,
    pub authentication: RetryPolicy,
    pub validation: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            posting: RetryPolicy::posting(),
            authentication: RetryPolicy::authentication(),
            validation: RetryPolicy::validation(),
        }
    }
}

impl RetryPolicies {
    pub fn get(&self, category: OperationCategory) -> &RetryPolicy {
        match category {
            OperationCategory::Posting => &self.posting,
            OperationCategory::Authentication => &self.authentication,
            OperationCategory::Validation => &self.validation,
        }
    }

    /// Presets with every delay replaced, keeping attempt counts and kinds
    pub fn with_delays(initial_delay: Duration, max_delay: Duration) -> Self {
        let defaults = Self::default();
        Self {
            posting: defaults.posting.with_delays(initial_delay, max_delay),
            authentication: defaults.authentication.with_delays(initial_delay, max_delay),
            validation: defaults.validation.with_delays(initial_delay, max_delay),
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    diagnostics: Arc<dyn Diagnostics>,
}

impl RetryExecutor {
    pub fn new(diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self { diagnostics }
    }

    /// Run `operation` retrying the kinds `policy` allows
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        context: &str,
        operation: F,
    ) -> PlatformResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
    {
        self.execute_with_retry(policy, |_| true, context, operation)
            .await
    }

    /// Run `operation` with an extra retry predicate
    ///
    /// A failure is retried only when both the policy and `is_retryable`
    /// accept its kind and attempts remain. The predicate can narrow the
    /// policy, never widen it. Once retries stop, the last error is returned.
    pub async fn execute_with_retry<T, F, Fut, P>(
        &self,
        policy: &RetryPolicy,
        is_retryable: P,
        context: &str,
        mut operation: F,
    ) -> PlatformResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
        P: Fn(ErrorKind) -> bool,
    {
        let mut attempt: u32 = 1;
        let mut delay = policy.initial_delay;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} recovered on attempt {}", context, attempt);
                        self.diagnostics.record_recovery(context, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let kind = e.kind();
                    let retryable = policy.should_retry(kind) && is_retryable(kind);

                    if attempt >= policy.max_attempts || !retryable {
                        if retryable {
                            warn!(
                                "{} failed after {} attempts: {}",
                                context,
                                attempt,
                                redact(&e.to_string())
                            );
                        } else {
                            debug!("{} failed with non-retryable {} error", context, kind);
                        }
                        return Err(e);
                    }

                    let wait = delay + jitter(delay);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        context,
                        attempt,
                        policy.max_attempts,
                        redact(&e.to_string()),
                        wait
                    );
                    sleep(wait).await;

                    delay = policy.next_delay(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Uniform random jitter in `[0, JITTER_FRACTION * delay)`, whole milliseconds
fn jitter(delay: Duration) -> Duration {
    let fraction: f64 = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
    Duration::from_millis((delay.as_millis() as f64 * fraction) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::error::PlatformError;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn executor() -> (RetryExecutor, Arc<MemoryDiagnostics>) {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        (RetryExecutor::new(diagnostics.clone()), diagnostics)
    }

    /// Operation that fails with the scripted errors, then succeeds
    fn scripted(
        errors: Vec<PlatformError>,
        calls: Arc<Mutex<Vec<Instant>>>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = PlatformResult<u32>> + Send>> {
        let errors = Arc::new(Mutex::new(errors.into_iter()));
        move || {
            let errors = errors.clone();
            let calls = calls.clone();
            Box::pin(async move {
                let attempt = {
                    let mut calls = calls.lock().unwrap();
                    calls.push(Instant::now());
                    calls.len() as u32
                };
                match errors.lock().unwrap().next() {
                    Some(e) => Err(e),
                    None => Ok(attempt),
                }
            })
        }
    }

    #[test]
    fn test_preset_values() {
        let posting = RetryPolicy::posting();
        assert_eq!(posting.max_attempts, 3);
        assert_eq!(posting.initial_delay, Duration::from_secs(2));
        assert_eq!(posting.max_delay, Duration::from_secs(15));
        assert_eq!(posting.backoff_multiplier, 2.0);

        let auth = RetryPolicy::authentication();
        assert_eq!(auth.max_attempts, 2);
        assert_eq!(auth.initial_delay, Duration::from_secs(1));
        assert_eq!(auth.max_delay, Duration::from_secs(5));
        assert_eq!(auth.backoff_multiplier, 1.5);

        let validation = RetryPolicy::validation();
        assert_eq!(validation.max_attempts, 2);
        assert_eq!(validation.initial_delay, Duration::from_millis(500));
        assert_eq!(validation.max_delay, Duration::from_secs(3));
        assert_eq!(validation.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_preset_retry_predicates() {
        let posting = RetryPolicy::posting();
        assert!(posting.should_retry(ErrorKind::Network));
        assert!(posting.should_retry(ErrorKind::Server));
        assert!(!posting.should_retry(ErrorKind::RateLimit));

        for policy in [RetryPolicy::authentication(), RetryPolicy::validation()] {
            assert!(policy.should_retry(ErrorKind::Network));
            assert!(!policy.should_retry(ErrorKind::Server));
            assert!(!policy.should_retry(ErrorKind::RateLimit));
        }
    }

    #[test]
    fn test_permanent_kinds_never_retried_by_any_preset() {
        let permanent = [
            ErrorKind::Authentication,
            ErrorKind::ContentTooLong,
            ErrorKind::InvalidCredentials,
            ErrorKind::PlatformUnavailable,
            ErrorKind::Unknown,
        ];
        for category in [
            OperationCategory::Posting,
            OperationCategory::Authentication,
            OperationCategory::Validation,
        ] {
            let policy = RetryPolicy::for_category(category);
            for kind in permanent {
                assert!(!policy.should_retry(kind), "{} retried {}", category, kind);
            }
        }
    }

    #[test]
    fn test_policy_cannot_widen_to_permanent_kinds() {
        let mut policy = RetryPolicy::posting();
        policy.retry_on.insert(ErrorKind::InvalidCredentials);
        assert!(!policy.should_retry(ErrorKind::InvalidCredentials));
    }

    #[test]
    fn test_next_delay_grows_and_caps() {
        let policy = RetryPolicy::posting();
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(policy.next_delay(Duration::from_secs(4)), Duration::from_secs(8));
        assert_eq!(policy.next_delay(Duration::from_secs(8)), Duration::from_secs(15));

        let auth = RetryPolicy::authentication();
        assert_eq!(auth.next_delay(Duration::from_secs(1)), Duration::from_millis(1500));
    }

    #[test]
    fn test_jitter_stays_below_quarter() {
        for _ in 0..1_000 {
            let j = jitter(Duration::from_secs(2));
            assert!(j < Duration::from_millis(500), "jitter {:?}", j);
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_posting_exhaustion_waits() {
        let (executor, _diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![PlatformError::Network("relay down".to_string()); 5];

        let result = executor
            .execute(&RetryPolicy::posting(), "nostr/main", scripted(errors, calls.clone()))
            .await;

        assert_eq!(result, Err(PlatformError::Network("relay down".to_string())));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);

        let wait1 = calls[1] - calls[0];
        let wait2 = calls[2] - calls[1];
        assert!(wait1 >= Duration::from_secs(2) && wait1 < Duration::from_millis(2500), "{:?}", wait1);
        assert!(wait2 >= Duration::from_secs(4) && wait2 < Duration::from_secs(5), "{:?}", wait2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_attempted_once() {
        let (executor, _diagnostics) = executor();
        for category in [
            OperationCategory::Posting,
            OperationCategory::Authentication,
            OperationCategory::Validation,
        ] {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let errors = vec![PlatformError::InvalidCredentials("bad key".to_string()); 3];
            let result = executor
                .execute(&RetryPolicy::for_category(category), "test", scripted(errors, calls.clone()))
                .await;
            assert!(matches!(result, Err(PlatformError::InvalidCredentials(_))));
            assert_eq!(calls.lock().unwrap().len(), 1, "{}", category);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_not_retried_when_posting() {
        let (executor, _diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![PlatformError::RateLimit("429".to_string())];

        let result = executor
            .execute(&RetryPolicy::posting(), "mastodon/alice", scripted(errors, calls.clone()))
            .await;

        assert!(matches!(result, Err(PlatformError::RateLimit(_))));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_is_reported() {
        let (executor, diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![
            PlatformError::Server("502".to_string()),
            PlatformError::Network("reset".to_string()),
        ];

        let result = executor
            .execute(&RetryPolicy::posting(), "bluesky/bob", scripted(errors, calls.clone()))
            .await;

        assert_eq!(result, Ok(3));
        let entries = diagnostics.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context, "bluesky/bob");
        assert!(entries[0].message.contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_policy_does_not_retry_server_errors() {
        let (executor, _diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![PlatformError::Server("500".to_string()); 2];

        let result = executor
            .execute(&RetryPolicy::authentication(), "auth", scripted(errors, calls.clone()))
            .await;

        assert!(matches!(result, Err(PlatformError::Server(_))));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_narrows_policy() {
        let (executor, _diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![PlatformError::Server("503".to_string()); 3];

        let result = executor
            .execute_with_retry(
                &RetryPolicy::posting(),
                |kind| kind == ErrorKind::Network,
                "test",
                scripted(errors, calls.clone()),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_retry_policy_single_attempt() {
        let (executor, _diagnostics) = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![PlatformError::Network("down".to_string())];

        let result = executor
            .execute(&RetryPolicy::no_retry(), "test", scripted(errors, calls.clone()))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}

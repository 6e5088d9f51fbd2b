//! Publish orchestration
//!
//! [`PublishOrchestrator`] takes one post and a [`Selection`] and publishes it
//! to every selected (platform, account) pair concurrently. Each pair gets its
//! own truncated copy of the text and its own retried attempt; whatever
//! happens to one pair never stops the others. Outcomes are folded into a
//! single [`PostResult`] as they arrive, and every step is mirrored into the
//! shared [`PostingProgress`] and the event bus.
//!
//! Only one run is active at a time per orchestrator. Cancellation is
//! cooperative: the run stops waiting and reports pending pairs as cancelled,
//! while calls already issued to publishers run to completion in the
//! background and their results are dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosscast::platforms::{mock::MockPublisher, PublisherRegistry};
//! use libcrosscast::service::PublishOrchestrator;
//! use libcrosscast::types::{AccountRef, Platform, PostRequest, Selection};
//!
//! # async fn example() -> libcrosscast::Result<()> {
//! let registry = PublisherRegistry::new()
//!     .with(Arc::new(MockPublisher::success(Platform::Nostr)))
//!     .with(Arc::new(MockPublisher::with_limit(Platform::Bluesky, 300)));
//! let orchestrator = PublishOrchestrator::new(registry);
//!
//! let selection = Selection::from_accounts([
//!     AccountRef::new("main", Platform::Nostr),
//!     AccountRef::new("me.bsky.social", Platform::Bluesky),
//! ])?;
//!
//! let result = orchestrator
//!     .publish(&PostRequest::new("Hello decentralized world!"), &selection)
//!     .await?;
//! for line in result.failure_summaries() {
//!     eprintln!("{}", line);
//! }
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::content::{needs_truncation, truncate_for_limit};
use crate::diagnostics::{redact, Diagnostics, TracingDiagnostics};
use crate::error::{CrosscastError, ErrorKind, PlatformError, Result};
use crate::platforms::{Publisher, PublisherRegistry};
use crate::retry::{RetryExecutor, RetryPolicies, RetryPolicy};
use crate::service::events::{Event, EventBus, EventReceiver};
use crate::service::outcome::{PostResult, PublishOutcome};
use crate::service::progress::{PairState, PostingProgress, PostingState};
use crate::types::{AccountKey, AccountRef, Platform, PostRequest, Selection};

/// Result of checking one account's connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub platform: Platform,
    pub account_id: String,
    pub reachable: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ConnectionCheck {
    fn from_result(account: &AccountRef, result: std::result::Result<bool, PlatformError>) -> Self {
        match result {
            Ok(reachable) => Self {
                platform: account.platform,
                account_id: account.id.clone(),
                reachable,
                error: None,
                error_kind: None,
            },
            Err(e) => Self {
                platform: account.platform,
                account_id: account.id.clone(),
                reachable: false,
                error: Some(redact(&e.to_string())),
                error_kind: Some(e.kind()),
            },
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.platform, self.account_id.clone())
    }
}

/// Token of the run currently allowed to be cancelled
struct ActiveRun {
    run_id: String,
    token: CancellationToken,
}

/// One pair that passed preparation and will be dispatched
struct Attempt {
    account: AccountRef,
    publisher: Arc<dyn Publisher>,
    request: PostRequest,
}

/// Coordinates concurrent publishing across platforms and accounts
///
/// Cloning is cheap; clones share progress, the event bus and the
/// single-flight guard.
#[derive(Clone)]
pub struct PublishOrchestrator {
    publishers: PublisherRegistry,
    policies: RetryPolicies,
    executor: RetryExecutor,
    diagnostics: Arc<dyn Diagnostics>,
    event_bus: EventBus,
    progress: Arc<RwLock<PostingProgress>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl PublishOrchestrator {
    /// Create an orchestrator with the default retry presets
    pub fn new(publishers: PublisherRegistry) -> Self {
        let diagnostics: Arc<dyn Diagnostics> = Arc::new(TracingDiagnostics);
        Self {
            publishers,
            policies: RetryPolicies::default(),
            executor: RetryExecutor::new(diagnostics.clone()),
            diagnostics,
            event_bus: EventBus::default(),
            progress: Arc::new(RwLock::new(PostingProgress::idle())),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Create an orchestrator with retry policies and event capacity from
    /// configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a retry override is invalid.
    pub fn from_config(publishers: PublisherRegistry, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(publishers)
            .with_policies(config.retry.policies()?)
            .with_event_bus(EventBus::new(config.events.capacity)))
    }

    /// Override the retry presets (typically shortened delays in tests)
    pub fn with_policies(mut self, policies: RetryPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.executor = RetryExecutor::new(diagnostics.clone());
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn publishers(&self) -> &PublisherRegistry {
        &self.publishers
    }

    pub fn policies(&self) -> &RetryPolicies {
        &self.policies
    }

    /// Subscribe to progress events for every future run
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Snapshot of the current (or most recent) run
    pub fn current_progress(&self) -> PostingProgress {
        read(&self.progress).clone()
    }

    /// Character limits of the given platforms, for previewing truncation
    ///
    /// Platforms without a registered publisher are left out; 0 means
    /// unlimited.
    pub fn character_limit_for<I>(&self, platforms: I) -> BTreeMap<Platform, usize>
    where
        I: IntoIterator<Item = Platform>,
    {
        self.publishers.character_limits(platforms)
    }

    /// Text each platform would receive for `content`
    pub fn preview_truncation<I>(&self, content: &str, platforms: I) -> BTreeMap<Platform, String>
    where
        I: IntoIterator<Item = Platform>,
    {
        self.character_limit_for(platforms)
            .into_iter()
            .map(|(platform, limit)| (platform, truncate_for_limit(content, limit)))
            .collect()
    }

    /// Publish `request` to every pair in `selection`
    ///
    /// Per-pair failures end up in the returned [`PostResult`]; the result is
    /// returned whether the run completed, was cancelled, or failed.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the request has neither text nor media, or the
    ///   selection is empty
    /// - `AlreadyInProgress` if another run on this orchestrator has not
    ///   finished
    pub async fn publish(&self, request: &PostRequest, selection: &Selection) -> Result<PostResult> {
        request.validate()?;
        if selection.is_empty() {
            return Err(CrosscastError::InvalidInput(
                "No accounts selected".to_string(),
            ));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        {
            let mut progress = write(&self.progress);
            progress
                .start(&run_id, &request.content, selection)
                .map_err(|_| CrosscastError::AlreadyInProgress)?;
            *lock(&self.active) = Some(ActiveRun {
                run_id: run_id.clone(),
                token: token.clone(),
            });
        }
        let _guard = RunGuard {
            run: self.run_context(&run_id),
            active: self.active.clone(),
        };
        let run = self.run_context(&run_id);

        let platforms: Vec<Platform> = selection.platforms().collect();
        info!(
            "Publishing run {} to {} account(s) across {} platform(s)",
            run_id,
            selection.pair_count(),
            platforms.len()
        );
        self.event_bus.emit(Event::PublishStarted {
            run_id: run_id.clone(),
            platforms,
            pairs: selection.pair_count(),
        });

        let attempts = self.prepare(&run, request, selection);

        write(&self.progress).transition(PostingState::Posting)?;
        debug!("Run {} dispatching {} attempt(s)", run_id, attempts.len());

        let mut keys = Vec::with_capacity(attempts.len());
        let mut handles = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let key = attempt.account.key();
            run.update(&key, PairState::Posting, None);
            handles.push(tokio::spawn(run_attempt(
                run.clone(),
                self.executor.clone(),
                self.policies.posting.clone(),
                attempt,
            )));
            keys.push(key);
        }

        // Dropping the handles on cancellation detaches the attempts rather
        // than aborting them.
        let joined = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            results = join_all(handles) => Some(results),
        };

        let result = match joined {
            None => self.finish_cancelled(&run),
            Some(results) => {
                let panicked: Vec<String> = keys
                    .iter()
                    .zip(results)
                    .filter_map(|(key, joined)| {
                        joined
                            .err()
                            .map(|e| format!("{}: {}", key, e))
                    })
                    .collect();

                if panicked.is_empty() {
                    self.finish_completed(&run)?
                } else {
                    self.finish_failed(&run, &panicked.join("; "))?
                }
            }
        };

        info!(
            "Run {} finished: {} succeeded, {} failed",
            run_id,
            result.success_count(),
            result.failure_count()
        );
        Ok(result)
    }

    /// Request cancellation of the in-flight run
    ///
    /// No-op unless a run is posting with at least one pair still pending.
    pub fn cancel(&self) {
        let token = {
            let progress = read(&self.progress);
            if progress.state() != PostingState::Posting || !progress.has_pending() {
                debug!("Nothing to cancel (state: {})", progress.state());
                return;
            }
            let active = lock(&self.active);
            match active.as_ref() {
                Some(run) if progress.run_id() == Some(run.run_id.as_str()) => run.token.clone(),
                _ => return,
            }
        };

        info!("Cancelling publish run");
        token.cancel();
    }

    /// Reset a finished run back to idle
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInProgress` while a run is active.
    pub fn clear(&self) -> Result<()> {
        write(&self.progress)
            .reset()
            .map_err(|_| CrosscastError::AlreadyInProgress)
    }

    /// Check an account's credentials under the authentication policy
    ///
    /// # Errors
    ///
    /// Returns the last platform error once retries are exhausted, or
    /// `PlatformUnavailable` if no publisher is registered for the account's
    /// platform.
    pub async fn authenticate(&self, account: &AccountRef) -> Result<bool> {
        let context = account.key().to_string();
        let publisher = self.publishers.get(account.platform).ok_or_else(|| {
            PlatformError::PlatformUnavailable(format!(
                "No publisher registered for {}",
                account.platform
            ))
        })?;

        let publisher = &publisher;
        let result = self
            .executor
            .execute(&self.policies.authentication, &context, || async move {
                publisher.authenticate(account).await
            })
            .await;

        result.map_err(|e| {
            self.diagnostics.record_failure(&context, &e);
            CrosscastError::from(e)
        })
    }

    /// Check every selected account concurrently under the validation policy
    ///
    /// Accounts without a publisher or missing credential fields are reported
    /// unreachable without contacting the platform.
    pub async fn validate_connections(&self, selection: &Selection) -> Vec<ConnectionCheck> {
        let checks = selection.iter().map(|(platform, account)| async move {
            let context = account.key().to_string();
            let result = match self.publishers.get(platform) {
                None => Err(unavailable(platform)),
                Some(publisher) => match missing_credentials(publisher.as_ref(), account) {
                    Some(e) => Err(e),
                    None => {
                        let publisher = &publisher;
                        self.executor
                            .execute(&self.policies.validation, &context, || async move {
                                publisher.validate_connection(account).await
                            })
                            .await
                    }
                },
            };

            if let Err(e) = &result {
                self.diagnostics.record_failure(&context, e);
            }
            ConnectionCheck::from_result(account, result)
        });

        join_all(checks).await
    }

    fn run_context(&self, run_id: &str) -> RunContext {
        RunContext {
            run_id: run_id.to_string(),
            progress: self.progress.clone(),
            event_bus: self.event_bus.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// Resolve publishers, check credentials and shape content per pair
    ///
    /// Pairs that cannot be attempted are recorded as failed right away.
    fn prepare(&self, run: &RunContext, request: &PostRequest, selection: &Selection) -> Vec<Attempt> {
        let mut attempts = Vec::with_capacity(selection.pair_count());

        for (platform, account) in selection.iter() {
            let key = account.key();
            let publisher = match self.publishers.get(platform) {
                Some(publisher) => publisher,
                None => {
                    run.fail(account, &unavailable(platform));
                    continue;
                }
            };

            if let Some(e) = missing_credentials(publisher.as_ref(), account) {
                run.fail(account, &e);
                continue;
            }

            let limit = publisher.character_limit();
            if needs_truncation(&request.content, limit) {
                debug!("Truncating content for {} to {} characters", key, limit);
                run.update(
                    &key,
                    PairState::Preparing,
                    Some(format!("Truncated to {} characters", limit)),
                );
            }

            attempts.push(Attempt {
                account: account.clone(),
                publisher,
                request: request.with_content(truncate_for_limit(&request.content, limit)),
            });
        }

        attempts
    }

    fn finish_completed(&self, run: &RunContext) -> Result<PostResult> {
        let result = {
            let mut progress = write(&self.progress);
            progress.transition(PostingState::Completed)?;
            final_result(&progress)
        };

        self.event_bus.emit(Event::PublishCompleted {
            run_id: run.run_id.clone(),
            outcomes: result.outcomes().cloned().collect(),
        });
        Ok(result)
    }

    fn finish_cancelled(&self, run: &RunContext) -> PostResult {
        let (cancelled, result) = {
            let mut progress = write(&self.progress);
            // Every attempt may have landed between the signal and this lock
            let cancelled = progress.cancel_pending().ok();
            if cancelled.is_none() {
                if let Err(e) = progress.transition(PostingState::Completed) {
                    warn!("Run {} could not complete after cancellation: {}", run.run_id, e);
                }
            }
            (cancelled, final_result(&progress))
        };

        match cancelled {
            Some(keys) => {
                info!("Run {} cancelled with {} pending pair(s)", run.run_id, keys.len());
                for key in &keys {
                    run.emit_status(key, PairState::Cancelled, None, Some(ErrorKind::Unknown));
                }
                self.event_bus.emit(Event::PublishCancelled {
                    run_id: run.run_id.clone(),
                    cancelled: keys,
                });
            }
            None => {
                self.event_bus.emit(Event::PublishCompleted {
                    run_id: run.run_id.clone(),
                    outcomes: result.outcomes().cloned().collect(),
                });
            }
        }
        result
    }

    fn finish_failed(&self, run: &RunContext, reason: &str) -> Result<PostResult> {
        let reason = redact(reason);
        error!("Run {} failed: {}", run.run_id, reason);
        let (failed, result) = {
            let mut progress = write(&self.progress);
            let failed = progress.fail_pending(&reason)?;
            (failed, final_result(&progress))
        };

        for key in &failed {
            run.emit_status(key, PairState::Failed, None, Some(ErrorKind::Unknown));
        }
        self.event_bus.emit(Event::PublishFailed {
            run_id: run.run_id.clone(),
            error: reason,
        });
        Ok(result)
    }
}

impl std::fmt::Debug for PublishOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOrchestrator")
            .field("publishers", &self.publishers)
            .field("policies", &self.policies)
            .field("state", &read(&self.progress).state())
            .finish()
    }
}

/// Handle a task uses to report into one run's progress
#[derive(Clone)]
struct RunContext {
    run_id: String,
    progress: Arc<RwLock<PostingProgress>>,
    event_bus: EventBus,
    diagnostics: Arc<dyn Diagnostics>,
}

impl RunContext {
    fn update(&self, key: &AccountKey, state: PairState, message: Option<String>) {
        let updated = {
            let mut progress = write(&self.progress);
            progress.run_id() == Some(self.run_id.as_str())
                && progress.update_pair(key, state, message.clone())
        };
        if updated {
            self.emit_status(key, state, message, None);
        }
    }

    /// Fold an outcome into progress; false if it arrived too late
    fn record(&self, outcome: PublishOutcome) -> bool {
        let key = outcome.key();
        let status = {
            let mut progress = write(&self.progress);
            if !progress.record(&self.run_id, outcome) {
                return false;
            }
            progress.statuses().get(&key).cloned()
        };

        if let Some(status) = status {
            let message = status.message.or(status.error);
            self.emit_status(&key, status.state, message, status.error_kind);
        }
        true
    }

    fn fail(&self, account: &AccountRef, error: &PlatformError) {
        let context = account.key().to_string();
        warn!("Skipping {}: {}", context, redact(&error.to_string()));
        self.diagnostics.record_failure(&context, error);
        self.record(PublishOutcome::failed(account, error));
    }

    fn emit_status(
        &self,
        key: &AccountKey,
        state: PairState,
        message: Option<String>,
        error_kind: Option<ErrorKind>,
    ) {
        self.event_bus.emit(Event::PairStatusChanged {
            run_id: self.run_id.clone(),
            platform: key.platform,
            account_id: key.account_id.clone(),
            state,
            message,
            error_kind,
        });
    }
}

/// Marks a run failed if `publish` returns early or its future is dropped
/// while the run is still active, and releases the cancellation token.
struct RunGuard {
    run: RunContext,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let failed = {
            let mut progress = write(&self.run.progress);
            if progress.run_id() == Some(self.run.run_id.as_str()) && progress.is_active() {
                progress.fail_pending("Publish run ended before completion").ok()
            } else {
                None
            }
        };

        if let Some(keys) = failed {
            warn!("Run {} ended before completion", self.run.run_id);
            for key in &keys {
                self.run
                    .emit_status(key, PairState::Failed, None, Some(ErrorKind::Unknown));
            }
            self.run.event_bus.emit(Event::PublishFailed {
                run_id: self.run.run_id.clone(),
                error: "Publish run ended before completion".to_string(),
            });
        }

        let mut active = lock(&self.active);
        if active
            .as_ref()
            .is_some_and(|run| run.run_id == self.run.run_id)
        {
            *active = None;
        }
    }
}

/// One pair's publish, retried under the posting policy
async fn run_attempt(run: RunContext, executor: RetryExecutor, policy: RetryPolicy, attempt: Attempt) {
    let Attempt {
        account,
        publisher,
        request,
    } = attempt;
    let context = account.key().to_string();

    let (publisher, account, request) = (&publisher, &account, &request);
    let result = executor
        .execute(&policy, &context, || async move {
            if request.has_media() {
                publisher.publish_with_media(request, account).await
            } else {
                publisher.publish(&request.content, account).await
            }
        })
        .await;

    let outcome = match result {
        Ok(receipt) => {
            info!("Published to {}: {}", context, receipt.post_id);
            PublishOutcome::succeeded(account, receipt)
        }
        Err(e) => {
            run.diagnostics.record_failure(&context, &e);
            PublishOutcome::failed(account, &e)
        }
    };

    if !run.record(outcome) {
        debug!("Discarding late result for {} from run {}", context, run.run_id);
    }
}

fn unavailable(platform: Platform) -> PlatformError {
    PlatformError::PlatformUnavailable(format!("No publisher registered for {}", platform))
}

fn missing_credentials(publisher: &dyn Publisher, account: &AccountRef) -> Option<PlatformError> {
    let missing = account.credentials.missing(publisher.required_credential_fields());
    if missing.is_empty() {
        None
    } else {
        Some(PlatformError::InvalidCredentials(format!(
            "Account '{}' is missing credential fields: {}",
            account.id,
            missing.join(", ")
        )))
    }
}

fn final_result(progress: &PostingProgress) -> PostResult {
    progress
        .result()
        .cloned()
        .unwrap_or_else(|| progress.partial_result().clone())
}

fn read(progress: &RwLock<PostingProgress>) -> RwLockReadGuard<'_, PostingProgress> {
    progress.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(progress: &RwLock<PostingProgress>) -> RwLockWriteGuard<'_, PostingProgress> {
    progress.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Per-account publish outcomes and their aggregate
//!
//! A [`PublishOutcome`] is created once per (platform, account) attempt and
//! never changed afterwards. A [`PostResult`] folds outcomes keyed by
//! [`AccountKey`], so several accounts on one platform each keep their own
//! outcome, and folding the same outcome twice does not double count.
//!
//! Error messages are redacted when an outcome is built, so results, progress
//! and events never carry credential-shaped text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::diagnostics::redact;
use crate::error::{ErrorKind, PlatformError};
use crate::platforms::PublishReceipt;
use crate::types::{AccountKey, AccountRef, Platform};

/// Result of one publish attempt for one (platform, account) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub platform: Platform,
    pub account_id: String,
    /// Display name of the account, for failure summaries
    pub account_name: String,
    pub success: bool,
    /// Platform-specific post ID (if successful)
    pub post_id: Option<String>,
    pub url: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl PublishOutcome {
    pub fn succeeded(account: &AccountRef, receipt: PublishReceipt) -> Self {
        Self {
            platform: account.platform,
            account_id: account.id.clone(),
            account_name: account.display_name.clone(),
            success: true,
            post_id: Some(receipt.post_id),
            url: receipt.url,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(account: &AccountRef, error: &PlatformError) -> Self {
        Self {
            platform: account.platform,
            account_id: account.id.clone(),
            account_name: account.display_name.clone(),
            success: false,
            post_id: None,
            url: None,
            error: Some(redact(&error.to_string())),
            error_kind: Some(error.kind()),
        }
    }

    /// Failure recorded for a pair that never produced its own outcome
    ///
    /// Used when a run is cancelled or aborted while the pair is pending.
    pub fn abandoned(key: &AccountKey, account_name: &str, error: &PlatformError) -> Self {
        Self {
            platform: key.platform,
            account_id: key.account_id.clone(),
            account_name: account_name.to_string(),
            success: false,
            post_id: None,
            url: None,
            error: Some(redact(&error.to_string())),
            error_kind: Some(error.kind()),
        }
    }

    /// Outcome for a pair that was still pending when the run was cancelled
    pub fn cancelled(key: &AccountKey, account_name: &str) -> Self {
        Self::abandoned(
            key,
            account_name,
            &PlatformError::Unknown("Cancelled before completion".to_string()),
        )
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.platform, self.account_id.clone())
    }

    /// "platform / account: label" line for this outcome, if it failed
    pub fn failure_summary(&self) -> Option<String> {
        if self.success {
            return None;
        }
        let label = self.error_kind.unwrap_or(ErrorKind::Unknown).label();
        Some(format!("{} / {}: {}", self.platform, self.account_name, label))
    }
}

/// Overall shape of a [`PostResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    AllSucceeded,
    PartiallyFailed,
    AllFailed,
    /// No outcomes were recorded
    Empty,
}

/// Aggregate of every outcome of one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResult {
    pub original_content: String,
    outcomes: BTreeMap<AccountKey, PublishOutcome>,
}

impl PostResult {
    pub fn new(original_content: impl Into<String>) -> Self {
        Self {
            original_content: original_content.into(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Fold a set of outcomes into a fresh result
    pub fn from_outcomes<I>(original_content: impl Into<String>, outcomes: I) -> Self
    where
        I: IntoIterator<Item = PublishOutcome>,
    {
        outcomes
            .into_iter()
            .fold(Self::new(original_content), Self::with_outcome)
    }

    /// Fold one outcome, replacing any earlier outcome for the same pair
    pub fn with_outcome(mut self, outcome: PublishOutcome) -> Self {
        self.record(outcome);
        self
    }

    pub(crate) fn record(&mut self, outcome: PublishOutcome) {
        self.outcomes.insert(outcome.key(), outcome);
    }

    pub fn contains(&self, key: &AccountKey) -> bool {
        self.outcomes.contains_key(key)
    }

    pub fn outcome(&self, platform: Platform, account_id: &str) -> Option<&PublishOutcome> {
        self.outcomes
            .get(&AccountKey::new(platform, account_id))
    }

    /// All outcomes, ordered by platform then account id
    pub fn outcomes(&self) -> impl Iterator<Item = &PublishOutcome> {
        self.outcomes.values()
    }

    pub fn outcomes_for(&self, platform: Platform) -> Vec<&PublishOutcome> {
        self.outcomes
            .values()
            .filter(|outcome| outcome.platform == platform)
            .collect()
    }

    /// Platform-level view for display
    pub fn by_platform(&self) -> BTreeMap<Platform, Vec<&PublishOutcome>> {
        let mut grouped: BTreeMap<Platform, Vec<&PublishOutcome>> = BTreeMap::new();
        for outcome in self.outcomes.values() {
            grouped.entry(outcome.platform).or_default().push(outcome);
        }
        grouped
    }

    pub fn failures(&self) -> Vec<&PublishOutcome> {
        self.outcomes.values().filter(|o| !o.success).collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }

    pub fn all_successful(&self) -> bool {
        !self.is_empty() && self.failure_count() == 0
    }

    pub fn all_failed(&self) -> bool {
        !self.is_empty() && self.success_count() == 0
    }

    pub fn has_errors(&self) -> bool {
        self.failure_count() > 0
    }

    pub fn status(&self) -> ResultStatus {
        if self.is_empty() {
            ResultStatus::Empty
        } else if self.all_successful() {
            ResultStatus::AllSucceeded
        } else if self.all_failed() {
            ResultStatus::AllFailed
        } else {
            ResultStatus::PartiallyFailed
        }
    }

    /// One line per failing pair ("mastodon / alice: rate-limited")
    pub fn failure_summaries(&self) -> Vec<String> {
        self.outcomes
            .values()
            .filter_map(PublishOutcome::failure_summary)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(platform: Platform, id: &str) -> PublishOutcome {
        PublishOutcome::succeeded(
            &AccountRef::new(id, platform),
            PublishReceipt::new(format!("{}-post", id)),
        )
    }

    fn err(platform: Platform, id: &str, error: PlatformError) -> PublishOutcome {
        PublishOutcome::failed(&AccountRef::new(id, platform), &error)
    }

    #[test]
    fn test_partial_failure_predicates() {
        let result = PostResult::from_outcomes(
            "hello",
            [
                ok(Platform::Nostr, "main"),
                err(Platform::Mastodon, "alice", PlatformError::Server("502".to_string())),
            ],
        );

        assert!(result.has_errors());
        assert!(!result.all_failed());
        assert!(!result.all_successful());
        assert_eq!(result.status(), ResultStatus::PartiallyFailed);
        assert!(result.outcome(Platform::Nostr, "main").unwrap().success);
    }

    #[test]
    fn test_all_successful_and_all_failed() {
        let good = PostResult::from_outcomes("x", [ok(Platform::Nostr, "a"), ok(Platform::Bluesky, "b")]);
        assert!(good.all_successful());
        assert_eq!(good.status(), ResultStatus::AllSucceeded);

        let bad = PostResult::from_outcomes(
            "x",
            [err(Platform::Nostr, "a", PlatformError::Network("down".to_string()))],
        );
        assert!(bad.all_failed());
        assert_eq!(bad.status(), ResultStatus::AllFailed);
    }

    #[test]
    fn test_empty_result() {
        let result = PostResult::new("x");
        assert!(!result.all_successful());
        assert!(!result.all_failed());
        assert!(!result.has_errors());
        assert_eq!(result.status(), ResultStatus::Empty);
    }

    #[test]
    fn test_multiple_accounts_same_platform_kept_apart() {
        let result = PostResult::from_outcomes(
            "x",
            [
                ok(Platform::Nostr, "main"),
                err(Platform::Nostr, "alt", PlatformError::RateLimit("slow down".to_string())),
            ],
        );

        assert_eq!(result.len(), 2);
        assert_eq!(result.outcomes_for(Platform::Nostr).len(), 2);
        assert_eq!(result.by_platform()[&Platform::Nostr].len(), 2);
        assert!(result.outcome(Platform::Nostr, "main").unwrap().success);
        assert_eq!(
            result.outcome(Platform::Nostr, "alt").unwrap().error_kind,
            Some(ErrorKind::RateLimit)
        );
    }

    #[test]
    fn test_folding_twice_is_idempotent() {
        let outcomes = vec![
            ok(Platform::Nostr, "main"),
            err(Platform::Mastodon, "alice", PlatformError::Server("500".to_string())),
        ];

        let once = PostResult::from_outcomes("x", outcomes.clone());
        let twice = outcomes.iter().cloned().fold(once.clone(), PostResult::with_outcome);

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn test_failure_summaries() {
        let alice = AccountRef::new("alice", Platform::Mastodon).with_display_name("Alice");
        let result = PostResult::new("x")
            .with_outcome(PublishOutcome::failed(
                &alice,
                &PlatformError::RateLimit("429".to_string()),
            ))
            .with_outcome(ok(Platform::Nostr, "main"));

        assert_eq!(result.failure_summaries(), vec!["mastodon / Alice: rate-limited"]);
        assert_eq!(result.failures().len(), 1);
    }

    #[test]
    fn test_cancelled_outcome_is_unknown_failure() {
        let key = AccountKey::new(Platform::Nostr, "main");
        let outcome = PublishOutcome::cancelled(&key, "Main");
        assert!(!outcome.success);
        assert_eq!(outcome.key(), key);
        assert_eq!(outcome.account_name, "Main");
        assert_eq!(outcome.error_kind, Some(ErrorKind::Unknown));
    }

    #[test]
    fn test_failed_outcome_redacts_error_text() {
        let account = AccountRef::new("alice", Platform::Mastodon);
        let outcome = PublishOutcome::failed(
            &account,
            &PlatformError::Authentication(
                "rejected Authorization: Bearer sk_live_abc123 for alice@example.com".to_string(),
            ),
        );

        let error = outcome.error.as_deref().unwrap();
        assert!(!error.contains("sk_live_abc123"), "{}", error);
        assert!(!error.contains("alice@example.com"), "{}", error);
        assert!(error.starts_with("Authentication failed: rejected"));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Authentication));

        let abandoned = PublishOutcome::abandoned(
            &account.key(),
            "alice",
            &PlatformError::Unknown("task panicked with message \"token=hunter2\"".to_string()),
        );
        assert!(!abandoned.error.unwrap().contains("hunter2"));
    }
}

//! Progress state machine for one publish run
//!
//! A run moves `idle -> preparing -> posting -> {completed, cancelled, failed}`.
//! Each (platform, account) pair has its own status that only ever moves
//! forward; once a pair is terminal, later updates for it are ignored. That is
//! what lets the orchestrator stop waiting on cancellation while attempts that
//! are still in flight keep running: their late results bounce off here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::error::{ErrorKind, PlatformError};
use crate::service::outcome::{PostResult, PublishOutcome};
use crate::types::{AccountKey, Platform, Selection};

/// Overall state of a publish run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostingState {
    #[default]
    Idle,
    Preparing,
    Posting,
    Completed,
    Cancelled,
    Failed,
}

impl PostingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingState::Idle => "idle",
            PostingState::Preparing => "preparing",
            PostingState::Posting => "posting",
            PostingState::Completed => "completed",
            PostingState::Cancelled => "cancelled",
            PostingState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostingState::Completed | PostingState::Cancelled | PostingState::Failed
        )
    }

    /// A run is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, PostingState::Preparing | PostingState::Posting)
    }

    pub fn can_transition_to(&self, next: PostingState) -> bool {
        use PostingState::*;
        match (self, next) {
            (Idle, Preparing) => true,
            (Preparing, Posting) | (Preparing, Failed) => true,
            (Posting, Completed) | (Posting, Cancelled) | (Posting, Failed) => true,
            (Completed | Cancelled | Failed, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PostingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one (platform, account) pair within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Preparing,
    Posting,
    Completed,
    Failed,
    Cancelled,
}

impl PairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::Preparing => "preparing",
            PairState::Posting => "posting",
            PairState::Completed => "completed",
            PairState::Failed => "failed",
            PairState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairState::Completed | PairState::Failed | PairState::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            PairState::Preparing => 0,
            PairState::Posting => 1,
            PairState::Completed | PairState::Failed | PairState::Cancelled => 2,
        }
    }

    /// Whether a pair in this state may move to `next`
    ///
    /// Terminal states are final; otherwise a pair may stay where it is (to
    /// update its message) or move forward.
    pub fn can_advance_to(&self, next: PairState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live status of one (platform, account) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPostingStatus {
    pub state: PairState,
    pub message: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl PlatformPostingStatus {
    pub fn new(state: PairState) -> Self {
        Self {
            state,
            message: None,
            error: None,
            error_kind: None,
        }
    }

    fn from_outcome(outcome: &PublishOutcome) -> Self {
        if outcome.success {
            Self {
                state: PairState::Completed,
                message: outcome.post_id.clone(),
                error: None,
                error_kind: None,
            }
        } else {
            Self {
                state: PairState::Failed,
                message: None,
                error: outcome.error.clone(),
                error_kind: outcome.error_kind,
            }
        }
    }
}

/// Rejected change of overall run state
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot move publish progress from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PostingState,
    pub to: PostingState,
}

/// Progress of the current (or most recent) publish run
///
/// Read-only outside the crate; the orchestrator hands out snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingProgress {
    run_id: Option<String>,
    state: PostingState,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    target_platforms: BTreeSet<Platform>,
    statuses: BTreeMap<AccountKey, PlatformPostingStatus>,
    account_names: BTreeMap<AccountKey, String>,
    collected: PostResult,
    result: Option<PostResult>,
}

impl Default for PostingProgress {
    fn default() -> Self {
        Self::idle()
    }
}

impl PostingProgress {
    pub fn idle() -> Self {
        Self {
            run_id: None,
            state: PostingState::Idle,
            start_time: None,
            finish_time: None,
            target_platforms: BTreeSet::new(),
            statuses: BTreeMap::new(),
            account_names: BTreeMap::new(),
            collected: PostResult::new(String::new()),
            result: None,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn state(&self) -> PostingState {
        self.state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.finish_time
    }

    pub fn target_platforms(&self) -> &BTreeSet<Platform> {
        &self.target_platforms
    }

    /// Status of every pair, ordered by platform then account id
    pub fn statuses(&self) -> &BTreeMap<AccountKey, PlatformPostingStatus> {
        &self.statuses
    }

    pub fn status(&self, platform: Platform, account_id: &str) -> Option<&PlatformPostingStatus> {
        self.statuses.get(&AccountKey::new(platform, account_id))
    }

    pub fn statuses_for(&self, platform: Platform) -> Vec<(&AccountKey, &PlatformPostingStatus)> {
        self.statuses
            .iter()
            .filter(|(key, _)| key.platform == platform)
            .collect()
    }

    /// Final result, set once the run reaches a terminal state
    pub fn result(&self) -> Option<&PostResult> {
        self.result.as_ref()
    }

    /// Outcomes folded so far, including before the run finishes
    pub fn partial_result(&self) -> &PostResult {
        &self.collected
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn pair_count(&self) -> usize {
        self.statuses.len()
    }

    pub fn finished_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|status| status.state.is_terminal())
            .count()
    }

    pub fn pending_pairs(&self) -> Vec<AccountKey> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.state.is_terminal())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.statuses
            .values()
            .any(|status| !status.state.is_terminal())
    }

    /// Share of pairs with a terminal status, from 0.0 to 1.0
    pub fn fraction_complete(&self) -> f64 {
        if self.statuses.is_empty() {
            return 0.0;
        }
        self.finished_count() as f64 / self.statuses.len() as f64
    }

    /// Start a new run: reset to idle, then move to `preparing`
    ///
    /// Every selected pair starts out `preparing`.
    pub(crate) fn start(
        &mut self,
        run_id: &str,
        content: &str,
        selection: &Selection,
    ) -> Result<(), InvalidTransition> {
        if self.state.is_active() {
            return Err(InvalidTransition {
                from: self.state,
                to: PostingState::Preparing,
            });
        }

        *self = Self::idle();
        self.transition(PostingState::Preparing)?;
        self.run_id = Some(run_id.to_string());
        self.start_time = Some(Utc::now());
        self.collected = PostResult::new(content);

        for (platform, account) in selection.iter() {
            let key = AccountKey::new(platform, account.id.clone());
            self.target_platforms.insert(platform);
            self.account_names
                .insert(key.clone(), account.display_name.clone());
            self.statuses
                .insert(key, PlatformPostingStatus::new(PairState::Preparing));
        }
        Ok(())
    }

    /// Move the run to `next`, storing the result on terminal states
    pub(crate) fn transition(&mut self, next: PostingState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        if next.is_terminal() {
            self.finish_time = Some(Utc::now());
            self.result = Some(self.collected.clone());
        }
        Ok(())
    }

    /// Move one pair forward, returning false if the update was dropped
    pub(crate) fn update_pair(
        &mut self,
        key: &AccountKey,
        state: PairState,
        message: Option<String>,
    ) -> bool {
        match self.statuses.get_mut(key) {
            Some(status) if status.state.can_advance_to(state) => {
                status.state = state;
                if message.is_some() {
                    status.message = message;
                }
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of one attempt from run `run_id`
    ///
    /// Returns false, changing nothing, when the outcome belongs to another
    /// run, to a pair outside this run, or to a pair that is already terminal.
    pub(crate) fn record(&mut self, run_id: &str, outcome: PublishOutcome) -> bool {
        if self.run_id.as_deref() != Some(run_id) {
            return false;
        }

        let key = outcome.key();
        match self.statuses.get_mut(&key) {
            Some(status) if !status.state.is_terminal() => {
                *status = PlatformPostingStatus::from_outcome(&outcome);
            }
            _ => return false,
        }

        self.collected.record(outcome);
        true
    }

    /// Cancel every pending pair and move the run to `cancelled`
    ///
    /// Only valid while posting with at least one pair still pending.
    pub(crate) fn cancel_pending(&mut self) -> Result<Vec<AccountKey>, InvalidTransition> {
        if self.state != PostingState::Posting || !self.has_pending() {
            return Err(InvalidTransition {
                from: self.state,
                to: PostingState::Cancelled,
            });
        }

        let pending = self.pending_pairs();
        for key in &pending {
            let name = self.account_name(key);
            let outcome = PublishOutcome::cancelled(key, &name);
            if let Some(status) = self.statuses.get_mut(key) {
                *status = PlatformPostingStatus {
                    state: PairState::Cancelled,
                    message: None,
                    error: outcome.error.clone(),
                    error_kind: outcome.error_kind,
                };
            }
            self.collected.record(outcome);
        }

        self.transition(PostingState::Cancelled)?;
        Ok(pending)
    }

    /// Fail every pending pair with `reason` and move the run to `failed`
    pub(crate) fn fail_pending(&mut self, reason: &str) -> Result<Vec<AccountKey>, InvalidTransition> {
        if !self.state.can_transition_to(PostingState::Failed) {
            return Err(InvalidTransition {
                from: self.state,
                to: PostingState::Failed,
            });
        }

        let error = PlatformError::Unknown(reason.to_string());
        let pending = self.pending_pairs();
        for key in &pending {
            let name = self.account_name(key);
            let outcome = PublishOutcome::abandoned(key, &name, &error);
            if let Some(status) = self.statuses.get_mut(key) {
                *status = PlatformPostingStatus::from_outcome(&outcome);
            }
            self.collected.record(outcome);
        }

        self.transition(PostingState::Failed)?;
        Ok(pending)
    }

    /// Return a finished run to `idle`, dropping its statuses and result
    pub(crate) fn reset(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            PostingState::Idle => Ok(()),
            state if state.is_terminal() => {
                *self = Self::idle();
                Ok(())
            }
            state => Err(InvalidTransition {
                from: state,
                to: PostingState::Idle,
            }),
        }
    }

    fn account_name(&self, key: &AccountKey) -> String {
        self.account_names
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.account_id.clone())
    }
}

//! Mock publisher implementation for testing
//!
//! This module provides a configurable mock publisher that can simulate
//! successes, scripted failures of any kind, per-account failures and network
//! latency. It records every call so tests can verify fan-out, truncation and
//! retry behaviour without credentials or network access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::content::needs_truncation;
use crate::error::{PlatformError, PlatformResult};
use crate::platforms::{PublishReceipt, Publisher};
use crate::types::{AccountRef, Platform, PostRequest};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,

    /// Character limit reported to the orchestrator (0 = unlimited)
    pub character_limit: usize,

    pub required_fields: Vec<&'static str>,

    /// Delay before completing any operation (simulates network latency)
    pub delay: Duration,

    /// Errors returned by successive publish calls before succeeding
    pub script: Vec<PlatformError>,

    /// Error returned by every publish call once the script is exhausted
    pub failure: Option<PlatformError>,

    /// Accounts whose publish calls always fail
    pub account_failures: HashMap<String, PlatformError>,

    pub auth_result: PlatformResult<bool>,

    pub connection_result: PlatformResult<bool>,

    /// Panic with this message inside publish calls
    pub panic_message: Option<String>,
}

impl MockConfig {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            character_limit: 0,
            required_fields: Vec::new(),
            delay: Duration::ZERO,
            script: Vec::new(),
            failure: None,
            account_failures: HashMap::new(),
            auth_result: Ok(true),
            connection_result: Ok(true),
            panic_message: None,
        }
    }
}

/// One recorded publish call
#[derive(Debug, Clone)]
pub struct PublishCall {
    pub account_id: String,
    pub text: String,
    pub media_count: usize,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<PlatformError>,
    publish_calls: Vec<PublishCall>,
    auth_calls: usize,
    validate_calls: usize,
}

/// Mock publisher for testing
#[derive(Debug)]
pub struct MockPublisher {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockPublisher {
    /// Create a new mock publisher with the given configuration
    pub fn new(config: MockConfig) -> Self {
        let state = MockState {
            script: config.script.iter().cloned().collect(),
            ..Default::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Create a mock publisher that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// Create a mock publisher with a character limit
    pub fn with_limit(platform: Platform, limit: usize) -> Self {
        Self::new(MockConfig {
            character_limit: limit,
            ..MockConfig::new(platform)
        })
    }

    /// Create a mock publisher whose publish calls always fail
    pub fn failing(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            failure: Some(error),
            ..MockConfig::new(platform)
        })
    }

    /// Create a mock publisher that fails with `errors` in order, then succeeds
    pub fn flaky(platform: Platform, errors: Vec<PlatformError>) -> Self {
        Self::new(MockConfig {
            script: errors,
            ..MockConfig::new(platform)
        })
    }

    /// Create a mock publisher with a delay
    pub fn with_delay(platform: Platform, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    /// Create a mock publisher whose publish calls panic
    ///
    /// Simulates a publisher bug; the call is recorded before the panic.
    pub fn panicking(platform: Platform, message: impl Into<String>) -> Self {
        Self::new(MockConfig {
            panic_message: Some(message.into()),
            ..MockConfig::new(platform)
        })
    }

    /// Require credential fields on every account
    pub fn requiring(mut self, fields: &[&'static str]) -> Self {
        self.config.required_fields = fields.to_vec();
        self
    }

    /// Make publish calls for one account always fail
    pub fn failing_for(mut self, account_id: &str, error: PlatformError) -> Self {
        self.config
            .account_failures
            .insert(account_id.to_string(), error);
        self
    }

    pub fn with_auth_result(mut self, result: PlatformResult<bool>) -> Self {
        self.config.auth_result = result;
        self
    }

    pub fn with_connection_result(mut self, result: PlatformResult<bool>) -> Self {
        self.config.connection_result = result;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Get the number of times publish (with or without media) was called
    pub fn publish_call_count(&self) -> usize {
        self.state().publish_calls.len()
    }

    pub fn publish_calls(&self) -> Vec<PublishCall> {
        self.state().publish_calls.clone()
    }

    /// Get all text that was sent for publishing
    pub fn published_texts(&self) -> Vec<String> {
        self.state()
            .publish_calls
            .iter()
            .map(|call| call.text.clone())
            .collect()
    }

    pub fn auth_call_count(&self) -> usize {
        self.state().auth_calls
    }

    pub fn validate_call_count(&self) -> usize {
        self.state().validate_calls
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }

    async fn do_publish(
        &self,
        text: &str,
        media_count: usize,
        account: &AccountRef,
    ) -> PlatformResult<PublishReceipt> {
        self.state().publish_calls.push(PublishCall {
            account_id: account.id.clone(),
            text: text.to_string(),
            media_count,
            at: Instant::now(),
        });

        self.simulate_latency().await;

        if needs_truncation(text, self.config.character_limit) {
            return Err(PlatformError::ContentTooLong(format!(
                "Content exceeds {} character limit (got {} characters)",
                self.config.character_limit,
                text.chars().count()
            )));
        }

        if let Some(message) = &self.config.panic_message {
            panic!("{}", message);
        }

        if let Some(error) = self.config.account_failures.get(&account.id) {
            return Err(error.clone());
        }

        if let Some(error) = self.state().script.pop_front() {
            return Err(error);
        }

        if let Some(error) = &self.config.failure {
            return Err(error.clone());
        }

        Ok(PublishReceipt::new(format!(
            "{}:mock-{}",
            self.config.platform,
            uuid::Uuid::new_v4()
        )))
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn character_limit(&self) -> usize {
        self.config.character_limit
    }

    fn required_credential_fields(&self) -> &[&'static str] {
        &self.config.required_fields
    }

    async fn authenticate(&self, _account: &AccountRef) -> PlatformResult<bool> {
        self.state().auth_calls += 1;
        self.simulate_latency().await;
        self.config.auth_result.clone()
    }

    async fn publish(&self, text: &str, account: &AccountRef) -> PlatformResult<PublishReceipt> {
        self.do_publish(text, 0, account).await
    }

    async fn publish_with_media(
        &self,
        request: &PostRequest,
        account: &AccountRef,
    ) -> PlatformResult<PublishReceipt> {
        self.do_publish(&request.content, request.media_attachments.len(), account)
            .await
    }

    async fn validate_connection(&self, _account: &AccountRef) -> PlatformResult<bool> {
        self.state().validate_calls += 1;
        self.simulate_latency().await;
        self.config.connection_result.clone()
    }
}

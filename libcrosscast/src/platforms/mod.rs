//! Platform publisher contract and registry
//!
//! Each social network is reached through one [`Publisher`] implementation.
//! The orchestrator never looks at wire details; it relies on this trait and
//! on every failure carrying the right [`ErrorKind`](crate::error::ErrorKind),
//! since retry eligibility depends entirely on it.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosscast::platforms::{mock::MockPublisher, PublisherRegistry};
//! use libcrosscast::types::Platform;
//!
//! let registry = PublisherRegistry::new()
//!     .with(Arc::new(MockPublisher::success(Platform::Nostr)))
//!     .with(Arc::new(MockPublisher::with_limit(Platform::Mastodon, 500)));
//!
//! assert_eq!(registry.character_limit(Platform::Mastodon), Some(500));
//! ```

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::PlatformResult;
use crate::types::{AccountRef, Platform, PostRequest};

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// What a successful publish returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Platform-specific post ID (e.g. "note1abc..." for Nostr, "12345" for Mastodon)
    pub post_id: String,
    /// Public URL of the post, when the platform provides one
    pub url: Option<String>,
}

impl PublishReceipt {
    pub fn new(post_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Capability interface every platform client implements
///
/// Implementations are shared across concurrent attempts (`&self` methods),
/// so any session state must use interior synchronization.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The platform this publisher talks to
    fn platform(&self) -> Platform;

    /// Maximum post length in characters; 0 means unlimited
    fn character_limit(&self) -> usize;

    /// Credential fields an account must carry to publish
    ///
    /// Accounts missing any of these fail with `InvalidCredentials` without
    /// a network call.
    fn required_credential_fields(&self) -> &[&'static str];

    /// Check the account's credentials with the platform
    ///
    /// # Errors
    ///
    /// Returns a `PlatformError` tagged with the failure kind; `Ok(false)`
    /// means the platform answered but rejected the credentials.
    async fn authenticate(&self, account: &AccountRef) -> PlatformResult<bool>;

    /// Publish text-only content
    async fn publish(&self, text: &str, account: &AccountRef) -> PlatformResult<PublishReceipt>;

    /// Publish text with media attachments
    ///
    /// `request.content` has already been shaped to this platform's limit.
    async fn publish_with_media(
        &self,
        request: &PostRequest,
        account: &AccountRef,
    ) -> PlatformResult<PublishReceipt>;

    /// Check that the platform is reachable with this account
    async fn validate_connection(&self, account: &AccountRef) -> PlatformResult<bool>;
}

/// Publishers keyed by platform, built once at startup
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher under its own platform, replacing any previous one
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.publishers.contains_key(&platform)
    }

    pub fn character_limit(&self, platform: Platform) -> Option<usize> {
        self.publishers.get(&platform).map(|p| p.character_limit())
    }

    /// Character limits for the given platforms
    ///
    /// Platforms without a registered publisher are left out.
    pub fn character_limits<I>(&self, platforms: I) -> BTreeMap<Platform, usize>
    where
        I: IntoIterator<Item = Platform>,
    {
        platforms
            .into_iter()
            .filter_map(|platform| self.character_limit(platform).map(|limit| (platform, limit)))
            .collect()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

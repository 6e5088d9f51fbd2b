//! Core types for Crosscast

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AccountError, CrosscastError, Result};

/// A social network posting surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mastodon,
    Bluesky,
    Nostr,
    Twitter,
    Micropub,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Mastodon,
        Platform::Bluesky,
        Platform::Nostr,
        Platform::Twitter,
        Platform::Micropub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mastodon => "mastodon",
            Platform::Bluesky => "bluesky",
            Platform::Nostr => "nostr",
            Platform::Twitter => "twitter",
            Platform::Micropub => "micropub",
        }
    }

    /// Credential store service name (e.g. "crosscast.nostr")
    pub fn service_name(&self) -> String {
        format!("crosscast.{}", self.as_str())
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = CrosscastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mastodon" => Ok(Platform::Mastodon),
            "bluesky" | "atproto" => Ok(Platform::Bluesky),
            "nostr" => Ok(Platform::Nostr),
            "twitter" | "x" => Ok(Platform::Twitter),
            "micropub" => Ok(Platform::Micropub),
            _ => Err(CrosscastError::InvalidInput(format!(
                "Unknown platform: '{}'. Valid options: mastodon, bluesky, nostr, twitter, micropub",
                s
            ))),
        }
    }
}

// ============================================================================
// Post content
// ============================================================================

/// Where the bytes of a media attachment live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

/// Opaque handle to one media attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub source: MediaSource,
    pub mime_type: String,
    pub description: Option<String>,
}

impl MediaRef {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            source: MediaSource::Bytes(bytes.into()),
            mime_type: mime_type.into(),
            description: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            source: MediaSource::File(path.into()),
            mime_type: mime_type.into(),
            description: None,
        }
    }

    /// Attach alt text
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Content to publish: text plus ordered media attachments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostRequest {
    pub content: String,
    pub media_attachments: Vec<MediaRef>,
}

impl PostRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media_attachments: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media_attachments.push(media);
        self
    }

    pub fn has_media(&self) -> bool {
        !self.media_attachments.is_empty()
    }

    /// A request is publishable when it carries text or at least one attachment
    pub fn is_valid(&self) -> bool {
        !self.content.is_empty() || self.has_media()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CrosscastError::InvalidInput(
                "Post must contain text or at least one media attachment".to_string(),
            ))
        }
    }

    /// Same attachments, different text (used for per-platform truncation)
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media_attachments: self.media_attachments.clone(),
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// Credential fields of an account, keyed by field name
///
/// Values never appear in `Debug` output. The map is shared, so cloning an
/// `AccountRef` never copies secret material.
#[derive(Clone, Default)]
pub struct Credentials(Arc<HashMap<String, SecretString>>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain `(field, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), SecretString::from(v.into())))
            .collect();
        Self(Arc::new(map))
    }

    pub fn get(&self, field: &str) -> Option<&SecretString> {
        self.0.get(field)
    }

    /// True when the field is present and non-empty
    pub fn has(&self, field: &str) -> bool {
        self.0
            .get(field)
            .is_some_and(|value| !value.expose_secret().is_empty())
    }

    /// Required fields that are absent or empty, in the given order
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|field| !self.has(field))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, SecretString)> for Credentials {
    fn from_iter<T: IntoIterator<Item = (String, SecretString)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<&str> = self.fields().collect();
        fields.sort_unstable();
        f.debug_struct("Credentials")
            .field("fields", &fields)
            .field("values", &"[REDACTED]")
            .finish()
    }
}

/// One configured account on one platform
#[derive(Debug, Clone)]
pub struct AccountRef {
    pub id: String,
    pub platform: Platform,
    pub display_name: String,
    pub username: String,
    pub is_active: bool,
    pub credentials: Credentials,
}

impl AccountRef {
    pub fn new(id: impl Into<String>, platform: Platform) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            username: id.clone(),
            id,
            platform,
            is_active: true,
            credentials: Credentials::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.platform, self.id.clone())
    }
}

/// Composite identity of one (platform, account) pair
///
/// Every result and progress map is keyed by this, never by platform alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub platform: Platform,
    pub account_id: String,
}

impl AccountKey {
    pub fn new(platform: Platform, account_id: impl Into<String>) -> Self {
        Self {
            platform,
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.platform, self.account_id)
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Accounts chosen for one publish call, grouped by platform
///
/// Every account's platform matches its key and every account is active.
/// Platforms are iterated in a stable order and accounts keep insertion
/// order; adding an account id twice to the same platform keeps the first.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    accounts: BTreeMap<Platform, Vec<AccountRef>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account under its own platform
    pub fn insert(&mut self, account: AccountRef) -> Result<()> {
        if !account.is_active {
            return Err(AccountError::Inactive(account.id.clone()).into());
        }
        let accounts = self.accounts.entry(account.platform).or_default();
        if !accounts.iter().any(|existing| existing.id == account.id) {
            accounts.push(account);
        }
        Ok(())
    }

    /// Add an account under an explicit platform key
    pub fn insert_for(&mut self, platform: Platform, account: AccountRef) -> Result<()> {
        if account.platform != platform {
            return Err(AccountError::PlatformMismatch {
                account: account.id.clone(),
                expected: platform.to_string(),
                actual: account.platform.to_string(),
            }
            .into());
        }
        self.insert(account)
    }

    /// Builder-style variant of [`Selection::insert`]
    pub fn with(mut self, account: AccountRef) -> Result<Self> {
        self.insert(account)?;
        Ok(self)
    }

    pub fn from_accounts<I: IntoIterator<Item = AccountRef>>(accounts: I) -> Result<Self> {
        let mut selection = Self::new();
        for account in accounts {
            selection.insert(account)?;
        }
        Ok(selection)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.values().all(Vec::is_empty)
    }

    /// Number of (platform, account) pairs
    pub fn pair_count(&self) -> usize {
        self.accounts.values().map(Vec::len).sum()
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.accounts
            .iter()
            .filter(|(_, accounts)| !accounts.is_empty())
            .map(|(platform, _)| *platform)
    }

    pub fn accounts_for(&self, platform: Platform) -> &[AccountRef] {
        self.accounts
            .get(&platform)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All pairs, grouped by platform
    pub fn iter(&self) -> impl Iterator<Item = (Platform, &AccountRef)> {
        self.accounts
            .iter()
            .flat_map(|(platform, accounts)| accounts.iter().map(move |account| (*platform, account)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_str() {
        assert_eq!("nostr".parse::<Platform>().unwrap(), Platform::Nostr);
        assert_eq!("Mastodon".parse::<Platform>().unwrap(), Platform::Mastodon);
        assert_eq!("atproto".parse::<Platform>().unwrap(), Platform::Bluesky);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_service_name() {
        assert_eq!(Platform::Nostr.service_name(), "crosscast.nostr");
    }

    #[test]
    fn test_post_request_validity() {
        assert!(PostRequest::new("hello").is_valid());
        assert!(!PostRequest::new("").is_valid());

        let media_only = PostRequest::new("").with_media(MediaRef::from_bytes(vec![1u8, 2, 3], "image/png"));
        assert!(media_only.is_valid());
        assert!(media_only.has_media());
    }

    #[test]
    fn test_with_content_keeps_attachments() {
        let request = PostRequest::new("original")
            .with_media(MediaRef::from_file("/tmp/cat.jpg", "image/jpeg").with_description("a cat"));
        let shortened = request.with_content("orig...");
        assert_eq!(shortened.content, "orig...");
        assert_eq!(shortened.media_attachments, request.media_attachments);
    }

    #[test]
    fn test_credentials_missing_fields() {
        let credentials = Credentials::from_pairs([("access_token", "abc"), ("instance", "")]);
        assert!(credentials.has("access_token"));
        assert!(!credentials.has("instance"));
        assert_eq!(
            credentials.missing(&["access_token", "instance", "client_id"]),
            vec!["instance", "client_id"]
        );
    }

    #[test]
    fn test_credentials_debug_redacts_values() {
        let credentials = Credentials::from_pairs([("private_key", "nsec1supersecret")]);
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("private_key"));
        assert!(!debug.contains("nsec1supersecret"));
    }

    #[test]
    fn test_selection_rejects_inactive_account() {
        let mut selection = Selection::new();
        let result = selection.insert(AccountRef::new("old", Platform::Nostr).inactive());
        assert!(result.is_err());
        assert!(selection.is_empty());
    }

    #[test]
    fn test_selection_rejects_platform_mismatch() {
        let mut selection = Selection::new();
        let result = selection.insert_for(Platform::Nostr, AccountRef::new("alice", Platform::Mastodon));
        assert!(matches!(
            result,
            Err(CrosscastError::Account(AccountError::PlatformMismatch { .. }))
        ));
    }

    #[test]
    fn test_selection_multiple_accounts_per_platform() {
        let selection = Selection::from_accounts([
            AccountRef::new("main", Platform::Nostr),
            AccountRef::new("alt", Platform::Nostr),
            AccountRef::new("main", Platform::Nostr),
            AccountRef::new("alice", Platform::Mastodon),
        ])
        .unwrap();

        assert_eq!(selection.pair_count(), 3);
        let ids: Vec<&str> = selection
            .accounts_for(Platform::Nostr)
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["main", "alt"]);
        assert_eq!(
            selection.platforms().collect::<Vec<_>>(),
            vec![Platform::Mastodon, Platform::Nostr]
        );
    }
}

//! Account registry for multi-account publishing
//!
//! Holds the configured accounts per platform and whether each is active, and
//! builds the [`Selection`] a publish call works on. Account CRUD beyond this
//! (persistence, UI) lives outside the library.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::credentials::{load_credentials, CredentialStore};
use crate::error::{AccountError, Result};
use crate::platforms::PublisherRegistry;
use crate::types::{AccountKey, AccountRef, Platform, Selection};

const MAX_ACCOUNT_ID_LEN: usize = 64;
const RESERVED_IDS: [&str; 3] = ["all", "none", "list"];

/// Registry of configured accounts
///
/// Thread-safe via `Arc<RwLock<..>>`; clones share the same accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Arc<RwLock<BTreeMap<Platform, Vec<AccountRef>>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate account id format
    ///
    /// Rules:
    /// - Alphanumeric characters, hyphens, and underscores only
    /// - Maximum 64 characters
    /// - Cannot be empty
    /// - Cannot be a reserved name ("all", "none", "list")
    pub fn validate_account_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(AccountError::InvalidId("Account id cannot be empty".to_string()).into());
        }

        let len = id.chars().count();
        if len > MAX_ACCOUNT_ID_LEN {
            return Err(AccountError::InvalidId(format!(
                "Account id too long: {} characters (max {})",
                len, MAX_ACCOUNT_ID_LEN
            ))
            .into());
        }

        if !id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(AccountError::InvalidId(format!(
                "Invalid account id '{}'. Must be alphanumeric with hyphens/underscores only",
                id
            ))
            .into());
        }

        if RESERVED_IDS.contains(&id.to_lowercase().as_str()) {
            return Err(AccountError::InvalidId(format!("'{}' is a reserved name", id)).into());
        }

        Ok(())
    }

    /// Register an account, replacing any existing one with the same id
    ///
    /// Replacement keeps the account's position in the platform's list.
    pub fn register(&self, account: AccountRef) -> Result<()> {
        Self::validate_account_id(&account.id)?;

        let mut accounts = self.write();
        let platform_accounts = accounts.entry(account.platform).or_default();
        match platform_accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => platform_accounts.push(account),
        }
        Ok(())
    }

    /// Remove an account and return it
    pub fn unregister(&self, platform: Platform, id: &str) -> Result<AccountRef> {
        let mut accounts = self.write();
        let platform_accounts = accounts
            .get_mut(&platform)
            .ok_or_else(|| not_found(platform, id))?;
        let index = platform_accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| not_found(platform, id))?;
        Ok(platform_accounts.remove(index))
    }

    /// Mark an account active or inactive
    pub fn set_active(&self, platform: Platform, id: &str, active: bool) -> Result<()> {
        let mut accounts = self.write();
        let account = accounts
            .get_mut(&platform)
            .and_then(|list| list.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| not_found(platform, id))?;
        account.is_active = active;
        Ok(())
    }

    pub fn get(&self, platform: Platform, id: &str) -> Option<AccountRef> {
        self.read()
            .get(&platform)
            .and_then(|list| list.iter().find(|a| a.id == id))
            .cloned()
    }

    pub fn account_exists(&self, platform: Platform, id: &str) -> bool {
        self.get(platform, id).is_some()
    }

    /// All accounts for a platform, in registration order
    pub fn list(&self, platform: Platform) -> Vec<AccountRef> {
        self.read().get(&platform).cloned().unwrap_or_default()
    }

    pub fn active_accounts(&self, platform: Platform) -> Vec<AccountRef> {
        self.list(platform)
            .into_iter()
            .filter(|a| a.is_active)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every active account of the given platforms
    ///
    /// Platforms with no active account are skipped, so the selection may be
    /// empty.
    pub fn selection_for<I>(&self, platforms: I) -> Result<Selection>
    where
        I: IntoIterator<Item = Platform>,
    {
        let mut selection = Selection::new();
        for platform in platforms {
            for account in self.active_accounts(platform) {
                selection.insert(account)?;
            }
        }
        Ok(selection)
    }

    /// Selection of specific accounts
    ///
    /// # Errors
    ///
    /// Returns `AccountError::NotFound` for an unknown key and
    /// `AccountError::Inactive` for an inactive account.
    pub fn selection_of(&self, keys: &[AccountKey]) -> Result<Selection> {
        let mut selection = Selection::new();
        for key in keys {
            let account = self
                .get(key.platform, &key.account_id)
                .ok_or_else(|| not_found(key.platform, &key.account_id))?;
            selection.insert(account)?;
        }
        Ok(selection)
    }

    /// Load each account's required credential fields from `store`
    ///
    /// Only platforms with a registered publisher are touched. Returns the
    /// number of accounts updated.
    pub fn hydrate_credentials(
        &self,
        store: &dyn CredentialStore,
        publishers: &PublisherRegistry,
    ) -> Result<usize> {
        let mut updated = 0;
        let mut accounts = self.write();

        for (platform, list) in accounts.iter_mut() {
            let Some(publisher) = publishers.get(*platform) else {
                continue;
            };
            let fields = publisher.required_credential_fields();
            if fields.is_empty() {
                continue;
            }

            for account in list.iter_mut() {
                account.credentials = load_credentials(store, *platform, &account.id, fields)?;
                updated += 1;
            }
        }

        tracing::debug!(
            "Loaded credentials for {} account(s) from {}",
            updated,
            store.backend_name()
        );
        Ok(updated)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Platform, Vec<AccountRef>>> {
        self.accounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Platform, Vec<AccountRef>>> {
        self.accounts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(platform: Platform, id: &str) -> crate::error::CrosscastError {
    AccountError::NotFound(id.to_string(), platform.to_string()).into()
}

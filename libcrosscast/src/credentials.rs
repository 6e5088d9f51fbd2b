//! Credential storage abstraction
//!
//! The orchestrator never reads secrets directly. Accounts are hydrated from a
//! [`CredentialStore`] before publishing, and only the fields a publisher
//! declares as required are loaded.
//!
//! # Service and Key Naming
//!
//! - **Service**: `crosscast.{platform}` (see [`Platform::service_name`])
//! - **Key**: the credential field (e.g. "access_token", "app_password")
//! - **Account**: the account id (e.g. "default", "work")
//!
//! # Example
//!
//! ```no_run
//! use libcrosscast::credentials::{CredentialStore, MemoryStore};
//!
//! # fn example() -> libcrosscast::Result<()> {
//! let store = MemoryStore::new();
//! store.store_account("crosscast.mastodon", "access_token", "work", "abc123")?;
//!
//! if store.exists_account("crosscast.mastodon", "access_token", "work")? {
//!     println!("Mastodon credentials found");
//! }
//! # Ok(())
//! # }
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{CredentialError, Result};
use crate::types::{Credentials, Platform};

/// Account used by the single-account convenience methods
pub const DEFAULT_ACCOUNT: &str = "default";

/// Trait for credential storage backends
///
/// Implementations must be safe to share between threads. Retrieved values
/// are returned as [`SecretString`] so they never show up in `Debug` output.
pub trait CredentialStore: Send + Sync {
    /// Store a credential for a specific account
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend is unavailable.
    fn store_account(&self, service: &str, key: &str, account: &str, value: &str) -> Result<()>;

    /// Retrieve a credential for a specific account
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if nothing is stored under
    /// (service, key, account), or a backend error.
    fn retrieve_account(&self, service: &str, key: &str, account: &str) -> Result<SecretString>;

    /// Delete a credential for a specific account
    ///
    /// It is not an error to delete a non-existent credential.
    fn delete_account(&self, service: &str, key: &str, account: &str) -> Result<()>;

    fn exists_account(&self, service: &str, key: &str, account: &str) -> Result<bool>;

    /// Accounts that have a credential for this service/key, sorted
    fn list_accounts(&self, service: &str, key: &str) -> Result<Vec<String>>;

    /// Human-readable backend name for diagnostics
    fn backend_name(&self) -> &str;

    /// Store a credential for the default account
    fn store(&self, service: &str, key: &str, value: &str) -> Result<()> {
        self.store_account(service, key, DEFAULT_ACCOUNT, value)
    }

    /// Retrieve a credential for the default account
    fn retrieve(&self, service: &str, key: &str) -> Result<SecretString> {
        self.retrieve_account(service, key, DEFAULT_ACCOUNT)
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        self.delete_account(service, key, DEFAULT_ACCOUNT)
    }

    fn exists(&self, service: &str, key: &str) -> Result<bool> {
        self.exists_account(service, key, DEFAULT_ACCOUNT)
    }
}

/// Load `fields` of one account from `store`
///
/// Fields that are not stored are left out, so a publisher requiring them
/// reports the account as having invalid credentials. Backend failures are
/// returned as errors.
pub fn load_credentials(
    store: &dyn CredentialStore,
    platform: Platform,
    account_id: &str,
    fields: &[&str],
) -> Result<Credentials> {
    let service = platform.service_name();
    let mut loaded = Vec::with_capacity(fields.len());

    for field in fields {
        match store.retrieve_account(&service, field, account_id) {
            Ok(value) => loaded.push((field.to_string(), value)),
            Err(crate::error::CrosscastError::Credential(CredentialError::NotFound(_))) => {
                tracing::debug!(
                    "No '{}' credential stored for {}/{} in {}",
                    field,
                    platform,
                    account_id,
                    store.backend_name()
                );
            }
            Err(e) => return Err(e),
        }
    }

    Ok(loaded.into_iter().collect())
}

type CredentialKey = (String, String, String);

/// In-process credential store
///
/// Holds values in memory only; nothing is persisted.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<CredentialKey, SecretString>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(service: &str, key: &str, account: &str) -> CredentialKey {
        (service.to_string(), key.to_string(), account.to_string())
    }
}

impl CredentialStore for MemoryStore {
    fn store_account(&self, service: &str, key: &str, account: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(service, key, account), SecretString::from(value.to_string()));
        Ok(())
    }

    fn retrieve_account(&self, service: &str, key: &str, account: &str) -> Result<SecretString> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(service, key, account))
            .map(|value| SecretString::from(value.expose_secret().to_string()))
            .ok_or_else(|| {
                CredentialError::NotFound(format!("{}/{} for account '{}'", service, key, account))
                    .into()
            })
    }

    fn delete_account(&self, service: &str, key: &str, account: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(service, key, account));
        Ok(())
    }

    fn exists_account(&self, service: &str, key: &str, account: &str) -> Result<bool> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&Self::key(service, key, account)))
    }

    fn list_accounts(&self, service: &str, key: &str) -> Result<Vec<String>> {
        let mut accounts: Vec<String> = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(s, k, _)| s == service && k == key)
            .map(|(_, _, account)| account.clone())
            .collect();
        accounts.sort();
        Ok(accounts)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MemoryStore")
            .field("credentials", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosscastError;

    #[test]
    fn test_memory_store_operations() {
        let store = MemoryStore::new();
        let service = "crosscast.test";

        store.store_account(service, "token", "work", "value_12345").unwrap();
        assert!(store.exists_account(service, "token", "work").unwrap());
        assert!(!store.exists_account(service, "token", "personal").unwrap());

        let retrieved = store.retrieve_account(service, "token", "work").unwrap();
        assert_eq!(retrieved.expose_secret(), "value_12345");

        store.delete_account(service, "token", "work").unwrap();
        assert!(!store.exists_account(service, "token", "work").unwrap());

        // Deleting again is fine
        store.delete_account(service, "token", "work").unwrap();
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let store = MemoryStore::new();
        let result = store.retrieve_account("crosscast.nostr", "private_key", "main");
        assert!(matches!(
            result,
            Err(CrosscastError::Credential(CredentialError::NotFound(_)))
        ));
    }

    #[test]
    fn test_default_account_methods() {
        let store = MemoryStore::new();
        store.store("crosscast.nostr", "private_key", "nsec1abc").unwrap();

        assert!(store.exists("crosscast.nostr", "private_key").unwrap());
        assert!(store
            .exists_account("crosscast.nostr", "private_key", DEFAULT_ACCOUNT)
            .unwrap());

        store.delete("crosscast.nostr", "private_key").unwrap();
        assert!(store.retrieve("crosscast.nostr", "private_key").is_err());
    }

    #[test]
    fn test_list_accounts_sorted_and_scoped() {
        let store = MemoryStore::new();
        store.store_account("crosscast.nostr", "private_key", "work", "a").unwrap();
        store.store_account("crosscast.nostr", "private_key", "alt", "b").unwrap();
        store.store_account("crosscast.mastodon", "access_token", "work", "c").unwrap();

        assert_eq!(
            store.list_accounts("crosscast.nostr", "private_key").unwrap(),
            vec!["alt", "work"]
        );
        assert!(store.list_accounts("crosscast.bluesky", "app_password").unwrap().is_empty());
    }

    #[test]
    fn test_load_credentials_skips_missing_fields() {
        let store = MemoryStore::new();
        store
            .store_account("crosscast.bluesky", "handle", "me", "me.bsky.social")
            .unwrap();

        let credentials =
            load_credentials(&store, Platform::Bluesky, "me", &["handle", "app_password"]).unwrap();

        assert!(credentials.has("handle"));
        assert_eq!(credentials.missing(&["handle", "app_password"]), vec!["app_password"]);
    }

    /// Store whose backing keychain is locked
    struct LockedStore;

    impl CredentialStore for LockedStore {
        fn store_account(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
            Err(CredentialError::Backend("keychain locked".to_string()).into())
        }

        fn retrieve_account(&self, _: &str, _: &str, _: &str) -> Result<SecretString> {
            Err(CredentialError::Backend("keychain locked".to_string()).into())
        }

        fn delete_account(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        fn exists_account(&self, _: &str, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }

        fn list_accounts(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn backend_name(&self) -> &str {
            "locked"
        }
    }

    #[test]
    fn test_load_credentials_propagates_backend_errors() {
        let result = load_credentials(&LockedStore, Platform::Nostr, "main", &["private_key"]);

        match result {
            Err(CrosscastError::Credential(CredentialError::Backend(reason))) => {
                assert_eq!(reason, "keychain locked")
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_does_not_leak_values() {
        let store = MemoryStore::new();
        store.store("crosscast.nostr", "private_key", "nsec1secret").unwrap();
        let debug = format!("{:?}", store);
        assert!(!debug.contains("nsec1secret"));
        assert!(debug.contains("credentials: 1"));
    }
}

//! Crosscast - publish one post to many social accounts at once
//!
//! This library fans a post out to every selected (platform, account) pair
//! concurrently, retries transient failures with backoff, tracks progress
//! through a cancellable state machine and reports a per-pair result that
//! tolerates partial failure.

pub mod accounts;
pub mod config;
pub mod content;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod retry;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use accounts::AccountRegistry;
pub use config::Config;
pub use credentials::{CredentialStore, MemoryStore};
pub use error::{CrosscastError, ErrorKind, PlatformError, Result};
pub use platforms::{PublishReceipt, Publisher, PublisherRegistry};
pub use retry::{RetryPolicies, RetryPolicy};
pub use service::{
    PostResult, PostingProgress, PostingState, PublishOrchestrator, PublishOutcome, ResultStatus,
};
pub use types::{AccountKey, AccountRef, Credentials, MediaRef, Platform, PostRequest, Selection};

//! Event system for publish progress
//!
//! This module provides an in-process event bus that mirrors every change
//! the orchestrator makes to its progress, so UIs can follow a run without
//! polling.
//!
//! # Architecture
//!
//! The event bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! Events carry the run id they belong to; per-pair events arrive in
//! `preparing -> posting -> terminal` order for each pair, with no ordering
//! across pairs.
//!
//! # Non-Blocking Behavior
//!
//! If no subscribers exist, events are dropped immediately. Subscribers can
//! lag without blocking emitters.
//!
//! # Example
//!
//! ```no_run
//! use libcrosscast::service::events::{Event, EventBus};
//! use libcrosscast::types::Platform;
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     run_id: "abc123".to_string(),
//!     platforms: vec![Platform::Nostr],
//!     pairs: 1,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::service::outcome::PublishOutcome;
use crate::service::progress::PairState;
use crate::types::{AccountKey, Platform};

/// Buffer used when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 100;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
///
/// Events are dropped if no subscribers exist, ensuring non-blocking
/// behavior.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configuration loading rejects a zero
    /// capacity before it gets here.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Events emitted by the orchestrator during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Run accepted and moved to `preparing`
    PublishStarted {
        run_id: String,
        platforms: Vec<Platform>,
        /// Number of (platform, account) pairs
        pairs: usize,
    },

    /// One pair moved forward
    PairStatusChanged {
        run_id: String,
        platform: Platform,
        account_id: String,
        state: PairState,
        /// Status message (e.g. "Truncated to 300 characters") or post id
        message: Option<String>,
        error_kind: Option<ErrorKind>,
    },

    /// Every pair reached a terminal status
    PublishCompleted {
        run_id: String,
        outcomes: Vec<PublishOutcome>,
    },

    /// Run cancelled; `cancelled` lists the pairs that were still pending
    PublishCancelled {
        run_id: String,
        cancelled: Vec<AccountKey>,
    },

    /// Run aborted by an unexpected error
    PublishFailed { run_id: String, error: String },
}

impl Event {
    pub fn run_id(&self) -> &str {
        match self {
            Event::PublishStarted { run_id, .. }
            | Event::PairStatusChanged { run_id, .. }
            | Event::PublishCompleted { run_id, .. }
            | Event::PublishCancelled { run_id, .. }
            | Event::PublishFailed { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends a run
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Event::PublishCompleted { .. } | Event::PublishCancelled { .. } | Event::PublishFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run_id: &str) -> Event {
        Event::PublishStarted {
            run_id: run_id.to_string(),
            platforms: vec![Platform::Nostr],
            pairs: 2,
        }
    }

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(started("run-1"));

        match receiver.recv().await.unwrap() {
            Event::PublishStarted {
                run_id,
                platforms,
                pairs,
            } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(platforms, vec![Platform::Nostr]);
                assert_eq!(pairs, 2);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        let event = Event::PairStatusChanged {
            run_id: "run-1".to_string(),
            platform: Platform::Mastodon,
            account_id: "alice".to_string(),
            state: PairState::Posting,
            message: None,
            error_kind: None,
        };
        event_bus.emit(event.clone());

        assert_eq!(receiver1.recv().await.unwrap(), event);
        assert_eq!(receiver2.recv().await.unwrap(), event);
    }

    #[test]
    fn test_no_subscribers() {
        let event_bus = EventBus::default();

        // Emitting with nobody listening must not panic
        event_bus.emit(started("run-1"));
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::PairStatusChanged {
            run_id: "run-1".to_string(),
            platform: Platform::Bluesky,
            account_id: "me".to_string(),
            state: PairState::Failed,
            message: None,
            error_kind: Some(ErrorKind::RateLimit),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"pair_status_changed""#), "{}", json);
        assert!(json.contains(r#""platform":"bluesky""#), "{}", json);
        assert!(json.contains(r#""state":"failed""#), "{}", json);
        assert!(json.contains(r#""error_kind":"rate_limit""#), "{}", json);

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn test_cancelled_event_serializes_keys() {
        let event = Event::PublishCancelled {
            run_id: "run-9".to_string(),
            cancelled: vec![AccountKey::new(Platform::Nostr, "alt")],
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""account_id":"alt""#), "{}", json);
        assert!(event.is_final());
        assert_eq!(event.run_id(), "run-9");
    }

    #[test]
    fn test_subscriber_count() {
        let event_bus = EventBus::new(10);
        assert_eq!(event_bus.subscriber_count(), 0);

        let _receiver1 = event_bus.subscribe();
        let _receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);
        assert!(!started("x").is_final());
    }
}

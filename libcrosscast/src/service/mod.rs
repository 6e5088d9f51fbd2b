//! Service layer for Crosscast
//!
//! The service layer is what a UI talks to. [`PublishOrchestrator`] is the
//! entry point; the other modules hold the values it hands back:
//!
//! - `orchestrator`: concurrent, retried, cancellable publishing
//! - `progress`: the run and per-pair state machine behind `current_progress`
//! - `outcome`: per-pair outcomes and the aggregated `PostResult`
//! - `events`: progress event distribution

pub mod events;
pub mod orchestrator;
pub mod outcome;
pub mod progress;

// Re-export commonly used types
pub use events::{Event, EventBus, EventReceiver};
pub use orchestrator::{ConnectionCheck, PublishOrchestrator};
pub use outcome::{PostResult, PublishOutcome, ResultStatus};
pub use progress::{
    InvalidTransition, PairState, PlatformPostingStatus, PostingProgress, PostingState,
};

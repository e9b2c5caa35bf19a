//! Sync pipeline
//!
//! - [`SyncCoordinator`]: fetch, score, push, and the durable retry queue
//! - [`BackgroundSync`]: interval-guarded periodic and app-open triggers

mod coordinator;
mod scheduler;

pub use coordinator::{
    Dashboard, RetryReport, SyncCoordinator, SyncOptions, SyncOutcome, SyncReport,
};
pub use scheduler::{BackgroundSync, TriggerOutcome};

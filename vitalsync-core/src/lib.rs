//! # vitalsync-core
//!
//! Core library for vitalsync: daily health and device-usage aggregation,
//! productivity and vitality scoring, and offline-first sync to a remote
//! dashboard.
//!
//! This library provides:
//! - Domain types for samples, scores and sync state
//! - Capability providers over platform health and screen-time sources
//! - Pure scoring engines (productivity, vitality)
//! - A sync coordinator with a durable retry queue
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! providers ──▶ scoring ──▶ sync::SyncCoordinator ──▶ remote::RemoteSink
//!                                  │
//!                                  └──▶ db::Database (state, retry queue, history)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitalsync_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, FailureClass, Result, SyncFailure};
pub use sync::{BackgroundSync, SyncCoordinator, SyncOptions, SyncOutcome};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod onboarding;
pub mod providers;
pub mod remote;
pub mod scoring;
pub mod sync;
pub mod types;

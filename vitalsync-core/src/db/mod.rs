//! Database layer for vitalsync
//!
//! This module provides the persistent state store using SQLite with:
//! - Schema migrations
//! - Sync state and the durable retry queue
//! - Local score history and cached samples

pub mod repo;
pub mod schema;

pub use repo::Database;

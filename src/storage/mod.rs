//! SQLite storage layer for taskdoc.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Audit events for history
//! - A broadcast change feed for observers
//!
//! # Submodules
//!
//! - [`events`] - Audit events and the change feed
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use events::{Event, EventType, StoreEvent};
pub use sqlite::{MutationContext, SqliteStorage};

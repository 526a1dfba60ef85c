//! SQLite storage layer for chunksync.
//!
//! This module provides the system of record using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Audit events for every status transition
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation
//! - [`repository`] - Async repository adapter used by the sync engine

pub mod events;
pub mod repository;
pub mod schema;
pub mod sqlite;

pub use repository::SqliteRepository;
pub use sqlite::{Document, IngestStats, MutationContext, SqliteStorage};

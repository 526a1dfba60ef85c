//! chunksync - chunk synchronization engine
//!
//! Pushes document chunks into a hosted, rate-limited knowledge-graph
//! service and keeps enough local state to retry, resume and roll back.
//!
//! # Architecture
//!
//! - [`sync`] - `SyncService`: batch worker pool, per-chunk status tracking
//! - [`resilience`] - token-bucket rate limiter, circuit breaker, retry handler
//! - [`mapping`] - content normalization, metadata and quality scoring
//! - [`episode`] - active-episode registry with TTL
//! - [`recovery`] - checkpoints, rollback, resumption, error reports
//! - [`graph`] - remote memory service client
//! - [`storage`] - SQLite system of record
//! - [`api`] - transport-neutral sync endpoint handlers
//! - [`cli`] - command-line interface using clap
//! - [`config`] - configuration management
//! - [`error`] - error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod episode;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod mapping;
pub mod model;
pub mod recovery;
pub mod repository;
pub mod resilience;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

//! Data models for chunksync.
//!
//! - `ChunkRecord` and its sync-status patch
//! - `Episode`, the remote grouping of one document-sync session
//! - `Checkpoint`, an immutable progress snapshot

pub mod checkpoint;
pub mod chunk;
pub mod episode;

pub use checkpoint::{Checkpoint, CheckpointState, SyncPhase};
pub use chunk::{ChunkPatch, ChunkRecord, SyncStatistics, SyncStatus};
pub use episode::{Episode, EpisodeMetadata, EpisodeStatus};

//! Persistence seams used by the sync engine.
//!
//! The engine never touches SQL directly. It talks to a system of record
//! through these traits, which the SQLite layer implements and tests replace
//! freely.

use crate::error::Result;
use crate::model::{Checkpoint, ChunkPatch, ChunkRecord, Episode, SyncStatistics};
use std::future::Future;

/// Durable chunk storage and per-chunk sync status.
pub trait ChunkRepository: Send + Sync {
    /// Chunks still needing a remote write (`pending` or `syncing`),
    /// ordered by `chunk_index`.
    fn fetch_unsynced(&self, document_id: &str) -> impl Future<Output = Result<Vec<ChunkRecord>>> + Send;

    /// Chunks in terminal `failed` state, ordered by `chunk_index`.
    fn fetch_failed(&self, document_id: &str) -> impl Future<Output = Result<Vec<ChunkRecord>>> + Send;

    /// Look up chunks by id. Unknown ids are skipped.
    fn fetch_chunks(&self, ids: &[String]) -> impl Future<Output = Result<Vec<ChunkRecord>>> + Send;

    /// Apply a partial update to one chunk atomically.
    fn update_chunk(&self, id: &str, patch: &ChunkPatch) -> impl Future<Output = Result<()>> + Send;

    /// Counts by status for one document.
    fn get_sync_statistics(&self, document_id: &str) -> impl Future<Output = Result<SyncStatistics>> + Send;

    /// Display title of a document, if known.
    fn document_title(&self, document_id: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Mirror of in-memory engine state into the system of record.
pub trait StateMirror: Send + Sync {
    fn mirror_episode(&self, episode: &Episode) -> impl Future<Output = Result<()>> + Send;

    fn mirror_checkpoint(&self, checkpoint: &Checkpoint) -> impl Future<Output = Result<()>> + Send;

    fn delete_checkpoint(&self, checkpoint_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Checkpoints taken at or after `since_ms`, oldest first.
    fn load_checkpoints(&self, since_ms: i64) -> impl Future<Output = Result<Vec<Checkpoint>>> + Send;
}

/// Local cache of chunk embedding vectors.
pub trait EmbeddingCache: Send + Sync {
    fn store_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Drop cached vectors for `chunk_ids`. Returns how many were removed.
    fn invalidate(&self, chunk_ids: &[String]) -> impl Future<Output = Result<usize>> + Send;
}

/// Everything the sync and recovery services need from storage.
pub trait SyncStore: ChunkRepository + StateMirror + EmbeddingCache {}

impl<T: ChunkRepository + StateMirror + EmbeddingCache> SyncStore for T {}

//! Async repository adapter over [`SqliteStorage`].
//!
//! The sync engine is async and shares one store across workers, while the
//! SQLite connection is a single-threaded handle. The adapter serializes
//! access behind a mutex. Each call holds the lock only for one short
//! statement or transaction and never across an await point.

use crate::error::{Error, Result};
use crate::model::{Checkpoint, ChunkPatch, ChunkRecord, Episode, SyncStatistics, SyncStatus};
use crate::repository::{ChunkRepository, EmbeddingCache, StateMirror};
use crate::storage::SqliteStorage;
use std::sync::Mutex;

/// Shared, thread-safe handle to the system of record.
#[derive(Debug)]
pub struct SqliteRepository {
    storage: Mutex<SqliteStorage>,
    actor: String,
}

impl SqliteRepository {
    /// Wrap a storage handle. `actor` is recorded on every audit event.
    #[must_use]
    pub fn new(storage: SqliteStorage, actor: &str) -> Self {
        Self {
            storage: Mutex::new(storage),
            actor: actor.to_string(),
        }
    }

    /// Run `f` with exclusive access to the storage.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `Error::Other` if a previous holder panicked.
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        let mut guard = self
            .storage
            .lock()
            .map_err(|_| Error::Other("storage lock poisoned".to_string()))?;
        f(&mut guard)
    }
}

impl ChunkRepository for SqliteRepository {
    async fn fetch_unsynced(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        self.with_storage(|s| s.list_chunks(document_id, &[SyncStatus::Pending, SyncStatus::Syncing]))
    }

    async fn fetch_failed(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        self.with_storage(|s| s.list_chunks(document_id, &[SyncStatus::Failed]))
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<ChunkRecord>> {
        self.with_storage(|s| s.get_chunks_by_ids(ids))
    }

    async fn update_chunk(&self, id: &str, patch: &ChunkPatch) -> Result<()> {
        self.with_storage(|s| s.update_chunk(id, patch, &self.actor))
    }

    async fn get_sync_statistics(&self, document_id: &str) -> Result<SyncStatistics> {
        self.with_storage(|s| s.sync_statistics(document_id))
    }

    async fn document_title(&self, document_id: &str) -> Result<Option<String>> {
        self.with_storage(|s| Ok(s.get_document(document_id)?.and_then(|d| d.title)))
    }
}

impl StateMirror for SqliteRepository {
    async fn mirror_episode(&self, episode: &Episode) -> Result<()> {
        self.with_storage(|s| s.save_episode(episode, &self.actor))
    }

    async fn mirror_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.with_storage(|s| s.save_checkpoint(checkpoint, &self.actor))
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        self.with_storage(|s| s.delete_checkpoint(checkpoint_id, &self.actor).map(|_| ()))
    }

    async fn load_checkpoints(&self, since_ms: i64) -> Result<Vec<Checkpoint>> {
        self.with_storage(|s| s.list_checkpoints(None, since_ms))
    }
}

impl EmbeddingCache for SqliteRepository {
    async fn store_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        self.with_storage(|s| s.store_embedding(chunk_id, vector, model, &self.actor))
    }

    async fn invalidate(&self, chunk_ids: &[String]) -> Result<usize> {
        self.with_storage(|s| s.delete_embeddings(chunk_ids, &self.actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repository_fetches_in_index_order() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .ingest_chunks(
                &[
                    ChunkRecord::new("b", "doc1", "two", 1),
                    ChunkRecord::new("a", "doc1", "one", 0),
                ],
                "test",
            )
            .unwrap();
        let repo = SqliteRepository::new(storage, "test");

        let unsynced = repo.fetch_unsynced("doc1").await.unwrap();
        assert_eq!(unsynced[0].id, "a");

        repo.update_chunk("a", &ChunkPatch::failed("x")).await.unwrap();
        let failed = repo.fetch_failed("doc1").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(repo.fetch_unsynced("doc1").await.unwrap().len(), 1);

        let stats = repo.get_sync_statistics("doc1").await.unwrap();
        assert_eq!((stats.failed, stats.pending), (1, 1));
        assert_eq!(repo.document_title("doc1").await.unwrap(), None);
    }
}

//! SQLite storage implementation.
//!
//! The system of record for documents, chunks, mirrored episodes and
//! checkpoints, and the local embedding cache. Every write goes through
//! [`SqliteStorage::mutate`] so it commits atomically with its audit events.

use crate::error::{Error, Result};
use crate::model::{
    Checkpoint, ChunkPatch, ChunkRecord, Episode, EpisodeMetadata, EpisodeStatus, SyncStatistics,
    SyncStatus,
};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, collecting audit events.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    /// Record an event carrying a free-form comment.
    pub fn record_comment(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        comment: &str,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor).with_comment(comment),
        );
    }
}

/// A source document known to the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: Option<String>,
    pub source_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of loading upstream chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// New chunks.
    pub inserted: usize,
    /// Existing chunks whose content changed; reset to pending.
    pub updated: usize,
    /// Existing chunks with identical content.
    pub unchanged: usize,
}

const CHUNK_COLUMNS: &str = "id, document_id, content, chunk_index, word_count, character_count, \
     headings, overlap_with_previous, overlap_with_next, sync_status, sync_attempt_count, \
     last_sync_error, external_chunk_id";

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_usize(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

/// Decode a JSON TEXT column.
fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_chunk(row: &Row) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        document_id: row.get(1)?,
        content: row.get(2)?,
        chunk_index: row.get(3)?,
        word_count: row.get(4)?,
        character_count: row.get(5)?,
        headings: json_column(row, 6)?,
        overlap_with_previous: row.get(7)?,
        overlap_with_next: row.get(8)?,
        sync_status: SyncStatus::from_str(&row.get::<_, String>(9)?),
        sync_attempt_count: row.get(10)?,
        last_sync_error: row.get(11)?,
        external_chunk_id: row.get(12)?,
    })
}

fn map_episode(row: &Row) -> rusqlite::Result<Episode> {
    let metadata: EpisodeMetadata = json_column(row, 7)?;
    Ok(Episode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        document_id: row.get(3)?,
        status: EpisodeStatus::from_str(&row.get::<_, String>(4)?),
        chunk_ids: json_column(row, 5)?,
        error: row.get(6)?,
        metadata,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout_ms.map_or(Duration::from_secs(5), Duration::from_millis))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read queries).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside an immediate transaction.
    ///
    /// Events recorded on the context are written before commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the closure fails or the transaction cannot commit.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ==================
    // Document Operations
    // ==================

    /// Create or update a document. A `None` title keeps the stored one.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_document(
        &mut self,
        id: &str,
        title: Option<&str>,
        source_path: Option<&str>,
        actor: &str,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument("document id must not be empty".into()));
        }
        self.mutate("upsert_document", actor, |tx, ctx| {
            let now = chrono::Utc::now().timestamp_millis();
            tx.execute(
                "INSERT INTO documents (id, title, source_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    title = COALESCE(excluded.title, documents.title),
                    source_path = COALESCE(excluded.source_path, documents.source_path),
                    updated_at = excluded.updated_at",
                rusqlite::params![id, title, source_path, now],
            )?;
            ctx.record_event("document", id, EventType::DocumentIngested);
            Ok(())
        })
    }

    /// Get a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = self
            .conn
            .query_row(
                "SELECT id, title, source_path, created_at, updated_at FROM documents WHERE id = ?1",
                [id],
                |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        source_path: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    /// List all documents, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, source_path, created_at, updated_at
             FROM documents ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Document {
                id: row.get(0)?,
                title: row.get(1)?,
                source_path: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Chunk Operations
    // ==================

    /// Load upstream chunks.
    ///
    /// New chunks are inserted as given. A chunk whose content changed is
    /// overwritten and reset to `pending`. Identical chunks are left alone,
    /// which keeps re-ingesting the same file idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert or update fails; nothing is written then.
    pub fn ingest_chunks(&mut self, chunks: &[ChunkRecord], actor: &str) -> Result<IngestStats> {
        self.mutate("ingest_chunks", actor, |tx, ctx| {
            let now = chrono::Utc::now().timestamp_millis();
            let mut stats = IngestStats::default();

            for chunk in chunks {
                if chunk.id.trim().is_empty() || chunk.document_id.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "chunk at index {} is missing its id or document id",
                        chunk.chunk_index
                    )));
                }
                let mut chunk = chunk.clone();
                chunk.fill_missing_counts();
                let headings = serde_json::to_string(&chunk.headings)?;

                tx.execute(
                    "INSERT OR IGNORE INTO documents (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                    rusqlite::params![chunk.document_id, now],
                )?;

                let existing: Option<String> = tx
                    .query_row("SELECT content FROM chunks WHERE id = ?1", [&chunk.id], |row| {
                        row.get(0)
                    })
                    .optional()?;

                match existing {
                    None => {
                        tx.execute(
                            "INSERT INTO chunks (id, document_id, content, chunk_index, word_count,
                                character_count, headings, overlap_with_previous, overlap_with_next,
                                sync_status, sync_attempt_count, last_sync_error, external_chunk_id,
                                created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                            rusqlite::params![
                                chunk.id,
                                chunk.document_id,
                                chunk.content,
                                chunk.chunk_index,
                                chunk.word_count,
                                chunk.character_count,
                                headings,
                                chunk.overlap_with_previous,
                                chunk.overlap_with_next,
                                chunk.sync_status.as_str(),
                                chunk.sync_attempt_count,
                                chunk.last_sync_error,
                                chunk.external_chunk_id,
                                now,
                            ],
                        )?;
                        ctx.record_event("chunk", &chunk.id, EventType::ChunkIngested);
                        stats.inserted += 1;
                    }
                    Some(content) if content == chunk.content => stats.unchanged += 1,
                    Some(_) => {
                        tx.execute(
                            "UPDATE chunks SET content = ?2, chunk_index = ?3, word_count = ?4,
                                character_count = ?5, headings = ?6, overlap_with_previous = ?7,
                                overlap_with_next = ?8, sync_status = 'pending',
                                sync_attempt_count = 0, last_sync_error = NULL,
                                external_chunk_id = NULL, updated_at = ?9
                             WHERE id = ?1",
                            rusqlite::params![
                                chunk.id,
                                chunk.content,
                                chunk.chunk_index,
                                chunk.word_count,
                                chunk.character_count,
                                headings,
                                chunk.overlap_with_previous,
                                chunk.overlap_with_next,
                                now,
                            ],
                        )?;
                        ctx.record_comment("chunk", &chunk.id, EventType::ChunkReset, "content changed");
                        stats.updated += 1;
                    }
                }
            }

            Ok(stats)
        })
    }

    /// Get a chunk by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], map_chunk).optional()?)
    }

    /// List a document's chunks in the given statuses, ordered by `chunk_index`.
    ///
    /// An empty `statuses` slice lists every chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_chunks(&self, document_id: &str, statuses: &[SyncStatus]) -> Result<Vec<ChunkRecord>> {
        let mut sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ?1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(document_id.to_string())];

        if !statuses.is_empty() {
            let placeholders: Vec<String> = (0..statuses.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND sync_status IN ({})", placeholders.join(", ")));
            for status in statuses {
                params.push(Box::new(status.as_str()));
            }
        }
        sql.push_str(" ORDER BY chunk_index ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), map_chunk)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Get chunks by id, in the order given. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<ChunkRecord>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = stmt.query_row([id], map_chunk).optional()? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Apply a partial sync-status update to one chunk.
    ///
    /// Runs as a single `UPDATE` inside its own transaction, so concurrent
    /// writers never see a half-applied patch.
    ///
    /// # Errors
    ///
    /// Returns `ChunkNotFound` if the chunk doesn't exist.
    pub fn update_chunk(&mut self, id: &str, patch: &ChunkPatch, actor: &str) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        self.mutate("update_chunk", actor, |tx, ctx| {
            let old_status: Option<String> = tx
                .query_row("SELECT sync_status FROM chunks WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(old_status) = old_status else {
                return Err(Error::ChunkNotFound { id: id.to_string() });
            };

            let now = chrono::Utc::now().timestamp_millis();
            let mut updates = vec!["updated_at = ?1".to_string()];
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
            let mut param_idx = 2;

            if let Some(status) = patch.sync_status {
                updates.push(format!("sync_status = ?{param_idx}"));
                params.push(Box::new(status.as_str()));
                param_idx += 1;
            }
            if let Some(count) = patch.sync_attempt_count {
                updates.push(format!("sync_attempt_count = ?{param_idx}"));
                params.push(Box::new(count));
                param_idx += 1;
            }
            if let Some(error) = &patch.last_sync_error {
                updates.push(format!("last_sync_error = ?{param_idx}"));
                params.push(Box::new(error.clone()));
                param_idx += 1;
            }
            if let Some(external_id) = &patch.external_chunk_id {
                updates.push(format!("external_chunk_id = ?{param_idx}"));
                params.push(Box::new(external_id.clone()));
                param_idx += 1;
            }

            params.push(Box::new(id.to_string()));
            let sql = format!(
                "UPDATE chunks SET {} WHERE id = ?{param_idx}",
                updates.join(", ")
            );
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, param_refs.as_slice())?;

            let event_type = match patch.sync_status {
                Some(SyncStatus::Syncing) => EventType::ChunkSyncing,
                Some(SyncStatus::Synced) => EventType::ChunkSynced,
                Some(SyncStatus::Failed) => EventType::ChunkFailed,
                Some(SyncStatus::Pending) => EventType::ChunkReset,
                None => EventType::ChunkUpdated,
            };
            ctx.record_change(
                "chunk",
                id,
                event_type,
                Some(old_status),
                patch.sync_status.map(|s| s.as_str().to_string()),
            );
            Ok(())
        })
    }

    /// Count a document's chunks by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sync_statistics(&self, document_id: &str) -> Result<SyncStatistics> {
        let mut stmt = self.conn.prepare(
            "SELECT sync_status, COUNT(*) FROM chunks WHERE document_id = ?1 GROUP BY sync_status",
        )?;
        let rows = stmt.query_map([document_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = SyncStatistics::default();
        for row in rows {
            let (status, count) = row?;
            stats.add(SyncStatus::from_str(&status), to_usize(count));
        }
        Ok(stats)
    }

    /// Audit events for a chunk, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunk_events(&self, chunk_id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        Ok(get_events(&self.conn, "chunk", chunk_id, limit)?)
    }

    // ==================
    // Episode Operations
    // ==================

    /// Insert or replace an episode.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_episode(&mut self, episode: &Episode, actor: &str) -> Result<()> {
        let chunk_ids = serde_json::to_string(&episode.chunk_ids)?;
        let metadata = serde_json::to_string(&episode.metadata)?;

        self.mutate("save_episode", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO episodes (id, user_id, session_id, document_id, status, chunk_ids,
                    error, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    chunk_ids = excluded.chunk_ids,
                    error = excluded.error,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    episode.id,
                    episode.user_id,
                    episode.session_id,
                    episode.document_id,
                    episode.status.as_str(),
                    chunk_ids,
                    episode.error,
                    metadata,
                    episode.created_at,
                    episode.updated_at,
                ],
            )?;
            ctx.record_change(
                "episode",
                &episode.id,
                EventType::EpisodeSaved,
                None,
                Some(episode.status.as_str().to_string()),
            );
            Ok(())
        })
    }

    /// Get an episode by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, session_id, document_id, status, chunk_ids, error, metadata,
                    created_at, updated_at
                 FROM episodes WHERE id = ?1",
                [id],
                map_episode,
            )
            .optional()?)
    }

    /// List a document's episodes, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn list_episodes(&self, document_id: &str) -> Result<Vec<Episode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, session_id, document_id, status, chunk_ids, error, metadata,
                created_at, updated_at
             FROM episodes WHERE document_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([document_id], map_episode)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Checkpoint Operations
    // ==================

    /// Insert or replace a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_checkpoint(&mut self, checkpoint: &Checkpoint, actor: &str) -> Result<()> {
        let payload = serde_json::to_string(checkpoint)?;

        self.mutate("save_checkpoint", actor, |tx, ctx| {
            tx.execute(
                "INSERT OR REPLACE INTO checkpoints (id, document_id, episode_id, processed_chunks,
                    total_chunks, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    checkpoint.id,
                    checkpoint.document_id,
                    checkpoint.episode_id,
                    to_i64(checkpoint.processed_chunks),
                    to_i64(checkpoint.total_chunks),
                    payload,
                    checkpoint.timestamp,
                ],
            )?;
            ctx.record_comment(
                "checkpoint",
                &checkpoint.id,
                EventType::CheckpointSaved,
                &format!("{}/{}", checkpoint.processed_chunks, checkpoint.total_chunks),
            );
            Ok(())
        })
    }

    /// Get a checkpoint by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .conn
            .query_row("SELECT payload FROM checkpoints WHERE id = ?1", [id], |row| {
                json_column(row, 0)
            })
            .optional()?)
    }

    /// List checkpoints taken at or after `since_ms`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn list_checkpoints(&self, document_id: Option<&str>, since_ms: i64) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM checkpoints
             WHERE created_at >= ?1 AND (?2 IS NULL OR document_id = ?2)
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![since_ms, document_id], |row| {
            json_column(row, 0)
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Delete a checkpoint. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_checkpoint(&mut self, id: &str, actor: &str) -> Result<bool> {
        self.mutate("delete_checkpoint", actor, |tx, ctx| {
            let affected = tx.execute("DELETE FROM checkpoints WHERE id = ?1", [id])?;
            if affected > 0 {
                ctx.record_event("checkpoint", id, EventType::CheckpointDeleted);
            }
            Ok(affected > 0)
        })
    }

    // ==================
    // Embedding Cache
    // ==================

    /// Store (or replace) a chunk's embedding vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk doesn't exist or the write fails.
    pub fn store_embedding(
        &mut self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        actor: &str,
    ) -> Result<()> {
        let blob = encode_embedding(vector);
        self.mutate("store_embedding", actor, |tx, ctx| {
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM chunks WHERE id = ?1", [chunk_id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(Error::ChunkNotFound { id: chunk_id.to_string() });
            }
            tx.execute(
                "INSERT OR REPLACE INTO chunk_embeddings (chunk_id, model, dimensions, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    chunk_id,
                    model,
                    to_i64(vector.len()),
                    blob,
                    chrono::Utc::now().timestamp_millis(),
                ],
            )?;
            ctx.record_comment("chunk", chunk_id, EventType::EmbeddingStored, model);
            Ok(())
        })
    }

    /// Get a chunk's cached embedding.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_embedding(&self, chunk_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM chunk_embeddings WHERE chunk_id = ?1",
                [chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| decode_embedding(&b)))
    }

    /// Delete cached embeddings. Returns how many rows were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails; nothing is removed then.
    pub fn delete_embeddings(&mut self, chunk_ids: &[String], actor: &str) -> Result<usize> {
        self.mutate("delete_embeddings", actor, |tx, ctx| {
            let mut removed = 0;
            for id in chunk_ids {
                let affected = tx.execute("DELETE FROM chunk_embeddings WHERE chunk_id = ?1", [id])?;
                if affected > 0 {
                    ctx.record_event("chunk", id, EventType::EmbeddingInvalidated);
                }
                removed += affected;
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckpointState, SyncPhase};

    fn seeded() -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.upsert_document("doc1", Some("Doc One"), None, "test").unwrap();
        let chunks = vec![
            ChunkRecord::new("c2", "doc1", "second chunk", 1),
            ChunkRecord::new("c1", "doc1", "first chunk", 0),
            ChunkRecord::new("c3", "doc1", "third chunk", 2),
        ];
        storage.ingest_chunks(&chunks, "test").unwrap();
        storage
    }

    #[test]
    fn test_ingest_orders_and_counts() {
        let storage = seeded();
        let chunks = storage.list_chunks("doc1", &[]).unwrap();
        let ids: Vec<_> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(chunks[0].word_count, 2);
    }

    #[test]
    fn test_reingest_is_idempotent_and_detects_changes() {
        let mut storage = seeded();
        storage
            .update_chunk("c1", &ChunkPatch::synced("ext-1"), "test")
            .unwrap();

        let same = vec![ChunkRecord::new("c1", "doc1", "first chunk", 0)];
        let stats = storage.ingest_chunks(&same, "test").unwrap();
        assert_eq!(stats, IngestStats { inserted: 0, updated: 0, unchanged: 1 });
        assert_eq!(storage.get_chunk("c1").unwrap().unwrap().sync_status, SyncStatus::Synced);

        let changed = vec![ChunkRecord::new("c1", "doc1", "first chunk, edited", 0)];
        let stats = storage.ingest_chunks(&changed, "test").unwrap();
        assert_eq!(stats.updated, 1);
        let chunk = storage.get_chunk("c1").unwrap().unwrap();
        assert_eq!(chunk.sync_status, SyncStatus::Pending);
        assert!(chunk.external_chunk_id.is_none());
    }

    #[test]
    fn test_update_chunk_patch_and_events() {
        let mut storage = seeded();
        storage.update_chunk("c2", &ChunkPatch::syncing(1), "test").unwrap();
        storage.update_chunk("c2", &ChunkPatch::failed("boom"), "test").unwrap();

        let chunk = storage.get_chunk("c2").unwrap().unwrap();
        assert_eq!(chunk.sync_status, SyncStatus::Failed);
        assert_eq!(chunk.sync_attempt_count, 1);
        assert_eq!(chunk.last_sync_error.as_deref(), Some("boom"));

        let events = storage.chunk_events("c2", None).unwrap();
        assert_eq!(events[0].event_type, EventType::ChunkFailed);
        assert_eq!(events[0].old_value.as_deref(), Some("syncing"));
    }

    #[test]
    fn test_update_missing_chunk_is_not_found() {
        let mut storage = seeded();
        let err = storage
            .update_chunk("nope", &ChunkPatch::syncing(1), "test")
            .unwrap_err();
        assert!(matches!(err, Error::ChunkNotFound { .. }));
    }

    #[test]
    fn test_list_by_status_and_statistics() {
        let mut storage = seeded();
        storage.update_chunk("c1", &ChunkPatch::synced("e1"), "test").unwrap();
        storage.update_chunk("c3", &ChunkPatch::syncing(1), "test").unwrap();

        let unsynced = storage
            .list_chunks("doc1", &[SyncStatus::Pending, SyncStatus::Syncing])
            .unwrap();
        assert_eq!(unsynced.len(), 2);

        let stats = storage.sync_statistics("doc1").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.syncing, 1);
    }

    #[test]
    fn test_episode_roundtrip() {
        let mut storage = seeded();
        let mut episode = Episode::new("u1", "doc1", Some("Doc One"), 3);
        episode.link(&["c1".to_string()]);
        storage.save_episode(&episode, "test").unwrap();

        episode.status = EpisodeStatus::Completed;
        storage.save_episode(&episode, "test").unwrap();

        let loaded = storage.get_episode(&episode.id).unwrap().unwrap();
        assert_eq!(loaded, episode);
        assert_eq!(storage.list_episodes("doc1").unwrap().len(), 1);
    }

    #[test]
    fn test_checkpoint_roundtrip_and_delete() {
        let mut storage = seeded();
        let checkpoint = Checkpoint {
            id: "cp_1".into(),
            document_id: "doc1".into(),
            episode_id: "ep_1".into(),
            processed_chunks: 1,
            total_chunks: 3,
            embedded_chunk_ids: vec!["c1".into()],
            state: CheckpointState::new(SyncPhase::Syncing),
            timestamp: 1_000,
            metadata: Some(serde_json::json!({"reason": "interval"})),
        };
        storage.save_checkpoint(&checkpoint, "test").unwrap();

        assert_eq!(storage.get_checkpoint("cp_1").unwrap(), Some(checkpoint.clone()));
        assert_eq!(storage.list_checkpoints(Some("doc1"), 0).unwrap().len(), 1);
        assert!(storage.list_checkpoints(None, 2_000).unwrap().is_empty());

        assert!(storage.delete_checkpoint("cp_1", "test").unwrap());
        assert!(!storage.delete_checkpoint("cp_1", "test").unwrap());
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let mut storage = seeded();
        storage
            .store_embedding("c1", &[0.5, -1.25, 3.0], "test-model", "test")
            .unwrap();
        assert_eq!(storage.get_embedding("c1").unwrap(), Some(vec![0.5, -1.25, 3.0]));

        let removed = storage
            .delete_embeddings(&["c1".into(), "c2".into()], "test")
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_embedding("c1").unwrap().is_none());
    }

    #[test]
    fn test_embedding_for_unknown_chunk_rejected() {
        let mut storage = seeded();
        let err = storage.store_embedding("ghost", &[1.0], "m", "test").unwrap_err();
        assert!(matches!(err, Error::ChunkNotFound { .. }));
    }
}

//! Checkpoints, rollback and manual remediation.
//!
//! Checkpoints are kept in memory (capped, oldest pruned first) and mirrored
//! to the store so that a later process can [`hydrate`] them and roll back or
//! resume a document.
//!
//! [`hydrate`]: RollbackRecoveryService::hydrate

mod report;

pub use report::{generate_error_report, ErrorCategory, ErrorReport};

use crate::config::CheckpointConfig;
use crate::embeddings::{validate_embedding, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::graph::GraphClient;
use crate::mapping::normalize_content;
use crate::model::{Checkpoint, CheckpointState, ChunkPatch};
use crate::repository::SyncStore;
use crate::resilience::{RateLimiter, RetryHandler};
use crate::sync::best_effort;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Input to [`RollbackRecoveryService::create_checkpoint`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewCheckpoint {
    pub document_id: String,
    pub episode_id: String,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub embedded_chunk_ids: Vec<String>,
    pub state: CheckpointState,
    pub metadata: Option<serde_json::Value>,
}

/// Rollback stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStep {
    DeleteRemote,
    ResetStatus,
    InvalidateCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStepError {
    pub step: RollbackStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    pub message: String,
}

/// Outcome of [`RollbackRecoveryService::rollback_to_checkpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    /// True only if every step completed without error.
    pub success: bool,
    pub checkpoint_id: String,
    pub document_id: String,
    pub remote_deleted: usize,
    pub chunks_reset: usize,
    pub embeddings_invalidated: usize,
    /// Newer checkpoints of the same document dropped by the rollback.
    pub checkpoints_discarded: usize,
    pub errors: Vec<RollbackStepError>,
}

/// Where a resumed sync should pick up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumptionPlan {
    pub checkpoint_id: String,
    pub document_id: String,
    pub episode_id: String,
    pub resume_from: usize,
    pub remaining_chunks: usize,
    pub total_chunks: usize,
    /// Chunks already written remotely at the checkpoint.
    pub embedded_chunk_ids: Vec<String>,
    /// Chunks currently awaiting a remote write.
    pub pending_chunk_ids: Vec<String>,
}

/// Outcome of [`RollbackRecoveryService::retry_failed_embeddings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRetryResult {
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<EmbeddingFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingFailure {
    pub chunk_id: String,
    pub message: String,
}

/// Checkpoint store and rollback driver.
#[derive(Debug)]
pub struct RollbackRecoveryService<S, G> {
    store: Arc<S>,
    graph: Arc<G>,
    limiter: Arc<RateLimiter>,
    retry: RetryHandler,
    config: CheckpointConfig,
    max_attempts: u32,
    checkpoints: Mutex<VecDeque<Checkpoint>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<S: SyncStore, G: GraphClient> RollbackRecoveryService<S, G> {
    #[must_use]
    pub fn new(
        store: Arc<S>,
        graph: Arc<G>,
        limiter: Arc<RateLimiter>,
        retry: RetryHandler,
        config: &CheckpointConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            graph,
            limiter,
            retry,
            config: config.clone(),
            max_attempts,
            checkpoints: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Checkpoint>> {
        self.checkpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retention_cutoff(&self) -> i64 {
        let retention_ms = i64::try_from(self.config.retention().as_millis()).unwrap_or(i64::MAX);
        now_ms().saturating_sub(retention_ms)
    }

    /// Reload mirrored checkpoints within retention. Returns how many are held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn hydrate(&self) -> Result<usize> {
        let mut loaded = self.store.load_checkpoints(self.retention_cutoff()).await?;
        loaded.sort_by_key(|c| c.timestamp);
        let mut checkpoints = self.lock();
        for cp in loaded {
            if !checkpoints.iter().any(|c| c.id == cp.id) {
                checkpoints.push_back(cp);
            }
        }
        checkpoints.make_contiguous().sort_by_key(|c| c.timestamp);
        while checkpoints.len() > self.config.max_checkpoints.max(1) {
            checkpoints.pop_front();
        }
        Ok(checkpoints.len())
    }

    /// Record a progress snapshot, then enforce the cap and retention.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `processed_chunks > total_chunks` or the
    /// document id is empty.
    pub async fn create_checkpoint(&self, new: NewCheckpoint) -> Result<Checkpoint> {
        if new.document_id.trim().is_empty() {
            return Err(Error::Validation("checkpoint needs a document id".to_string()));
        }
        if new.processed_chunks > new.total_chunks {
            return Err(Error::Validation(format!(
                "processed chunks ({}) exceed total ({})",
                new.processed_chunks, new.total_chunks
            )));
        }

        let checkpoint = Checkpoint {
            id: format!("cp_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            document_id: new.document_id,
            episode_id: new.episode_id,
            processed_chunks: new.processed_chunks,
            total_chunks: new.total_chunks,
            embedded_chunk_ids: new.embedded_chunk_ids,
            state: new.state,
            timestamp: now_ms(),
            metadata: new.metadata,
        };

        let pruned: Vec<Checkpoint> = {
            let mut checkpoints = self.lock();
            checkpoints.push_back(checkpoint.clone());
            let cap = self.config.max_checkpoints.max(1);
            let excess = checkpoints.len().saturating_sub(cap);
            checkpoints.drain(..excess).collect()
        };

        info!(
            checkpoint_id = %checkpoint.id,
            document_id = %checkpoint.document_id,
            processed = checkpoint.processed_chunks,
            total = checkpoint.total_chunks,
            phase = checkpoint.state.phase.as_str(),
            "checkpoint created"
        );
        best_effort("mirror checkpoint", self.store.mirror_checkpoint(&checkpoint)).await;
        for old in &pruned {
            best_effort("delete pruned checkpoint", self.store.delete_checkpoint(&old.id)).await;
        }
        self.collect_garbage().await;
        Ok(checkpoint)
    }

    /// Drop checkpoints older than the retention window. Returns how many.
    pub async fn collect_garbage(&self) -> usize {
        let cutoff = self.retention_cutoff();
        let expired: Vec<String> = {
            let mut checkpoints = self.lock();
            let expired = checkpoints
                .iter()
                .filter(|c| c.timestamp < cutoff)
                .map(|c| c.id.clone())
                .collect();
            checkpoints.retain(|c| c.timestamp >= cutoff);
            expired
        };
        for id in &expired {
            best_effort("delete expired checkpoint", self.store.delete_checkpoint(id)).await;
        }
        expired.len()
    }

    /// Retained checkpoints, oldest first, optionally for one document.
    #[must_use]
    pub fn list_checkpoints(&self, document_id: Option<&str>) -> Vec<Checkpoint> {
        self.lock()
            .iter()
            .filter(|c| document_id.is_none_or(|d| c.document_id == d))
            .cloned()
            .collect()
    }

    /// Most recently recorded checkpoint of a document.
    #[must_use]
    pub fn latest_checkpoint(&self, document_id: &str) -> Option<Checkpoint> {
        self.lock()
            .iter()
            .rev()
            .find(|c| c.document_id == document_id)
            .cloned()
    }

    /// # Errors
    ///
    /// Returns `Error::CheckpointNotFound` if the id is not retained.
    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        self.lock()
            .iter()
            .find(|c| c.id == checkpoint_id)
            .cloned()
            .ok_or_else(|| Error::CheckpointNotFound { id: checkpoint_id.to_string() })
    }

    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.lock().len()
    }

    /// Undo the remote writes recorded by a checkpoint.
    ///
    /// The three steps run independently; a failure in one is recorded and
    /// the others still run. Newer checkpoints of the same document are
    /// discarded since they describe state that no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::CheckpointNotFound` for an unknown id. Step failures
    /// are reported in the result, not as an error.
    pub async fn rollback_to_checkpoint(&self, checkpoint_id: &str) -> Result<RollbackResult> {
        let checkpoint = self.get_checkpoint(checkpoint_id)?;
        let ids = checkpoint.embedded_chunk_ids.clone();
        let mut errors = Vec::new();
        info!(checkpoint_id, document_id = %checkpoint.document_id, chunks = ids.len(), "rolling back");

        let mut remote_deleted = 0;
        match self.store.fetch_chunks(&ids).await {
            Ok(chunks) => {
                for chunk in chunks {
                    let Some(external_id) = chunk.external_chunk_id.as_deref() else {
                        continue;
                    };
                    match self.delete_remote(external_id).await {
                        Ok(()) => remote_deleted += 1,
                        Err(e) => errors.push(RollbackStepError {
                            step: RollbackStep::DeleteRemote,
                            chunk_id: Some(chunk.id.clone()),
                            message: e.to_string(),
                        }),
                    }
                }
            }
            Err(e) => errors.push(RollbackStepError {
                step: RollbackStep::DeleteRemote,
                chunk_id: None,
                message: format!("could not load chunks: {e}"),
            }),
        }

        let mut chunks_reset = 0;
        let reset = ChunkPatch::reset_pending();
        for id in &ids {
            match self.store.update_chunk(id, &reset).await {
                Ok(()) => chunks_reset += 1,
                Err(e) => errors.push(RollbackStepError {
                    step: RollbackStep::ResetStatus,
                    chunk_id: Some(id.clone()),
                    message: e.to_string(),
                }),
            }
        }

        let embeddings_invalidated = match self.store.invalidate(&ids).await {
            Ok(n) => n,
            Err(e) => {
                errors.push(RollbackStepError {
                    step: RollbackStep::InvalidateCache,
                    chunk_id: None,
                    message: e.to_string(),
                });
                0
            }
        };

        // recording order, not timestamps: two checkpoints can share a millisecond
        let discarded: Vec<String> = {
            let mut checkpoints = self.lock();
            let newer: Vec<String> = checkpoints
                .iter()
                .position(|c| c.id == checkpoint.id)
                .map(|at| {
                    checkpoints
                        .iter()
                        .skip(at + 1)
                        .filter(|c| c.document_id == checkpoint.document_id)
                        .map(|c| c.id.clone())
                        .collect()
                })
                .unwrap_or_default();
            checkpoints.retain(|c| !newer.contains(&c.id));
            newer
        };
        for id in &discarded {
            best_effort("delete superseded checkpoint", self.store.delete_checkpoint(id)).await;
        }

        let result = RollbackResult {
            success: errors.is_empty(),
            checkpoint_id: checkpoint.id,
            document_id: checkpoint.document_id,
            remote_deleted,
            chunks_reset,
            embeddings_invalidated,
            checkpoints_discarded: discarded.len(),
            errors,
        };
        if result.success {
            info!(checkpoint_id, reset = result.chunks_reset, "rollback complete");
        } else {
            warn!(checkpoint_id, failures = result.errors.len(), "rollback completed with errors");
        }
        Ok(result)
    }

    async fn delete_remote(&self, external_id: &str) -> Result<()> {
        let limiter = &self.limiter;
        let graph = &self.graph;
        self.retry
            .execute_with_retry("delete chunk", || async move {
                limiter.acquire().await;
                graph.delete_chunk(external_id).await
            })
            .await
    }

    /// Work left after a checkpoint. Does not start a sync.
    ///
    /// # Errors
    ///
    /// Returns `Error::CheckpointNotFound` for an unknown id, or a store error.
    pub async fn resume_from_checkpoint(&self, checkpoint_id: &str) -> Result<ResumptionPlan> {
        let checkpoint = self.get_checkpoint(checkpoint_id)?;
        let pending = self.store.fetch_unsynced(&checkpoint.document_id).await?;
        Ok(ResumptionPlan {
            resume_from: checkpoint.processed_chunks,
            remaining_chunks: checkpoint.remaining(),
            total_chunks: checkpoint.total_chunks,
            pending_chunk_ids: pending.into_iter().map(|c| c.id).collect(),
            embedded_chunk_ids: checkpoint.embedded_chunk_ids,
            checkpoint_id: checkpoint.id,
            document_id: checkpoint.document_id,
            episode_id: checkpoint.episode_id,
        })
    }

    /// Regenerate and cache embeddings for `chunk_ids`.
    ///
    /// Vectors failing [`validate_embedding`] are not cached.
    ///
    /// # Errors
    ///
    /// Returns an error only if the chunks cannot be loaded. Per-chunk
    /// failures are reported in the result.
    pub async fn retry_failed_embeddings<P: EmbeddingProvider>(
        &self,
        provider: &P,
        chunk_ids: &[String],
    ) -> Result<EmbeddingRetryResult> {
        let info = provider.info();
        let chunks = self.store.fetch_chunks(chunk_ids).await?;
        let mut result = EmbeddingRetryResult {
            attempted: chunks.len(),
            ..EmbeddingRetryResult::default()
        };

        for chunk in chunks {
            let text = normalize_content(&chunk.content);
            let outcome = async {
                let vector = provider.generate_embedding(&text).await?;
                validate_embedding(&vector, Some(info.dimensions))?;
                self.store.store_embedding(&chunk.id, &vector, &info.model).await
            }
            .await;
            match outcome {
                Ok(()) => result.succeeded.push(chunk.id),
                Err(e) => {
                    warn!(chunk_id = %chunk.id, error = %e, "embedding retry failed");
                    result.failed.push(EmbeddingFailure {
                        chunk_id: chunk.id,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Fail chunks permanently so automatic retries skip them.
    ///
    /// Returns how many chunks were marked. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error other than a missing chunk.
    pub async fn mark_chunks_as_corrupted(&self, chunk_ids: &[String], reason: &str) -> Result<usize> {
        let patch = ChunkPatch::corrupted(reason, self.max_attempts);
        let mut marked = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            match self.store.update_chunk(id, &patch).await {
                Ok(()) => marked.push(id.clone()),
                Err(Error::ChunkNotFound { .. }) => warn!(chunk_id = %id, "cannot mark unknown chunk"),
                Err(e) => return Err(e),
            }
        }
        best_effort("invalidate corrupted embeddings", self.store.invalidate(&marked)).await;
        info!(count = marked.len(), reason, "chunks marked as corrupted");
        Ok(marked.len())
    }

    /// Categorize `errors` for `document_id`.
    #[must_use]
    pub fn generate_error_report(&self, document_id: &str, errors: &[crate::sync::ChunkError]) -> ErrorReport {
        generate_error_report(document_id, errors)
    }
}

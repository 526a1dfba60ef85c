//! Result and status types returned by the sync service.

use crate::error::Error;
use crate::model::{ChunkRecord, SyncStatistics};
use crate::resilience::{CircuitSnapshot, RateLimiterUsage};
use serde::{Deserialize, Serialize};

/// What a `POST sync` request asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    #[default]
    Sync,
    Retry,
}

impl SyncAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Retry => "retry",
        }
    }
}

/// One chunk's failure within a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkError {
    pub chunk_id: String,
    pub chunk_index: u32,
    pub message: String,
    /// Error code, absent for errors read back from storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Whether the underlying cause was transient.
    pub retryable: bool,
}

impl ChunkError {
    /// Describe `error` for `chunk`. Retryability is judged on the root cause,
    /// so an exhausted retry budget still reads as a transient problem.
    #[must_use]
    pub fn from_error(chunk: &ChunkRecord, error: &Error) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.chunk_index,
            message: error.to_string(),
            code: Some(error.error_code().as_str().to_string()),
            retryable: error.root_cause().is_retryable(),
        }
    }

    /// Rebuild an error entry from a failed chunk's stored message.
    #[must_use]
    pub fn from_stored(chunk: &ChunkRecord) -> Option<Self> {
        chunk.last_sync_error.as_ref().map(|message| Self {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.chunk_index,
            message: message.clone(),
            code: None,
            retryable: false,
        })
    }
}

/// Outcome of one `sync_document_chunks` or `retry_failed_chunks` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResult {
    pub document_id: String,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    /// Chunks never started because the run stopped early.
    pub skipped_chunks: usize,
    pub episode_id: Option<String>,
    pub errors: Vec<ChunkError>,
    pub duration_ms: u64,
    /// Whether the run ended before all batches were processed.
    #[serde(default)]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<String>,
}

impl SyncBatchResult {
    /// Result of a run with nothing to do.
    #[must_use]
    pub fn empty(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_chunks == 0 && self.skipped_chunks == 0
    }
}

/// Read-only view of a document's chunk statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub document_id: String,
    pub total_chunks: usize,
    pub pending_chunks: usize,
    pub syncing_chunks: usize,
    pub synced_chunks: usize,
    pub failed_chunks: usize,
    pub progress_percent: f64,
    /// A sync for this document is running in this process.
    pub in_flight: bool,
}

impl SyncStatusSnapshot {
    #[must_use]
    pub fn from_statistics(document_id: &str, stats: &SyncStatistics, in_flight: bool) -> Self {
        Self {
            document_id: document_id.to_string(),
            total_chunks: stats.total,
            pending_chunks: stats.pending,
            syncing_chunks: stats.syncing,
            synced_chunks: stats.synced,
            failed_chunks: stats.failed,
            progress_percent: stats.progress_percent(),
            in_flight,
        }
    }
}

/// Health of the shared remote-call machinery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub rate_limiter: RateLimiterUsage,
    pub circuit_breaker: CircuitSnapshot,
    pub in_flight_documents: Vec<String>,
    pub active_episodes: usize,
    pub retained_checkpoints: usize,
}

impl HealthSnapshot {
    /// Healthy unless the breaker is rejecting calls.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.circuit_breaker.remaining_cooldown_ms == 0
    }
}

//! Checkpoint model.
//!
//! A checkpoint is an immutable snapshot of sync progress for one document.

use serde::{Deserialize, Serialize};

/// Phase of the sync run when the checkpoint was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Syncing,
    Completed,
    Failed,
    Stopped,
}

impl SyncPhase {
    /// Get the string representation for display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Operation bookkeeping carried by a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    pub phase: SyncPhase,
    #[serde(default)]
    pub completed_operations: Vec<String>,
    #[serde(default)]
    pub failed_operations: Vec<String>,
}

impl CheckpointState {
    #[must_use]
    pub fn new(phase: SyncPhase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}

/// Snapshot of sync progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub document_id: String,
    pub episode_id: String,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    /// Chunks already written remotely when the snapshot was taken.
    pub embedded_chunk_ids: Vec<String>,
    pub state: CheckpointState,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Checkpoint {
    /// Chunks left to process after this snapshot.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.total_chunks.saturating_sub(self.processed_chunks)
    }

    /// Age relative to `now_ms`.
    #[must_use]
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }
}

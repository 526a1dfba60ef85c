//! Chunk model.
//!
//! Chunks are produced upstream and owned by the system of record. The sync
//! engine only reads them and patches the sync-status fields.

use serde::{Deserialize, Deserializer, Serialize};

/// Sync status of a single chunk.
///
/// Transitions are `pending -> syncing -> {synced | failed}`. Rollback and
/// retry move a chunk back to `pending` or `syncing`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Parse from string. Unknown values read as `pending`.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "syncing" => Self::Syncing,
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Whether the chunk still needs a remote write.
    #[must_use]
    pub const fn is_unsynced(&self) -> bool {
        matches!(self, Self::Pending | Self::Syncing)
    }
}

/// A unit of document content awaiting (or done with) synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub character_count: u32,
    /// Heading trail, outermost first. Upstream sends it either as one
    /// newline-separated string or as a list of lines.
    #[serde(default, deserialize_with = "heading_trail")]
    pub headings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_with_previous: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_with_next: Option<u32>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub sync_attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_chunk_id: Option<String>,
}

/// Split a raw heading trail into trimmed, non-empty lines.
fn split_heading_trail(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn heading_trail<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Trail {
        Raw(String),
        Lines(Vec<String>),
    }

    Ok(match Option::<Trail>::deserialize(deserializer)? {
        Some(Trail::Raw(raw)) => split_heading_trail(&raw),
        Some(Trail::Lines(lines)) => lines,
        None => Vec::new(),
    })
}

impl ChunkRecord {
    /// Create a pending chunk with counts derived from the content.
    #[must_use]
    pub fn new(id: &str, document_id: &str, content: &str, chunk_index: u32) -> Self {
        let mut chunk = Self {
            id: id.to_string(),
            document_id: document_id.to_string(),
            content: content.to_string(),
            chunk_index,
            word_count: 0,
            character_count: 0,
            headings: Vec::new(),
            overlap_with_previous: None,
            overlap_with_next: None,
            sync_status: SyncStatus::Pending,
            sync_attempt_count: 0,
            last_sync_error: None,
            external_chunk_id: None,
        };
        chunk.fill_missing_counts();
        chunk
    }

    /// Attach a heading trail.
    #[must_use]
    pub fn with_headings(mut self, headings: &[&str]) -> Self {
        self.headings = headings.iter().map(|h| (*h).to_string()).collect();
        self
    }

    /// Derive word and character counts when upstream left them at zero.
    pub fn fill_missing_counts(&mut self) {
        if self.word_count == 0 {
            self.word_count = u32::try_from(self.content.split_whitespace().count()).unwrap_or(u32::MAX);
        }
        if self.character_count == 0 {
            self.character_count = u32::try_from(self.content.chars().count()).unwrap_or(u32::MAX);
        }
    }
}

/// Partial update of a chunk's sync fields.
///
/// `None` leaves a field untouched. The doubly-optional fields distinguish
/// "leave alone" from "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPatch {
    pub sync_status: Option<SyncStatus>,
    pub sync_attempt_count: Option<u32>,
    pub last_sync_error: Option<Option<String>>,
    pub external_chunk_id: Option<Option<String>>,
}

impl ChunkPatch {
    /// Mark a chunk as in flight for the given attempt.
    #[must_use]
    pub fn syncing(attempt: u32) -> Self {
        Self {
            sync_status: Some(SyncStatus::Syncing),
            sync_attempt_count: Some(attempt),
            ..Self::default()
        }
    }

    /// Mark a chunk as written remotely.
    #[must_use]
    pub fn synced(external_id: &str) -> Self {
        Self {
            sync_status: Some(SyncStatus::Synced),
            last_sync_error: Some(None),
            external_chunk_id: Some(Some(external_id.to_string())),
            ..Self::default()
        }
    }

    /// Mark a chunk as failed.
    #[must_use]
    pub fn failed(error: &str) -> Self {
        Self {
            sync_status: Some(SyncStatus::Failed),
            last_sync_error: Some(Some(error.to_string())),
            ..Self::default()
        }
    }

    /// Put a chunk back in the queue with a fresh attempt budget.
    #[must_use]
    pub fn reset_pending() -> Self {
        Self {
            sync_status: Some(SyncStatus::Pending),
            sync_attempt_count: Some(0),
            last_sync_error: Some(None),
            external_chunk_id: Some(None),
        }
    }

    /// Fail a chunk and exhaust its attempt budget so retries skip it.
    #[must_use]
    pub fn corrupted(reason: &str, max_attempts: u32) -> Self {
        Self {
            sync_status: Some(SyncStatus::Failed),
            sync_attempt_count: Some(max_attempts),
            last_sync_error: Some(Some(format!("Corrupted: {reason}"))),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Per-status chunk counts for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl SyncStatistics {
    /// Add `count` chunks in `status`.
    pub fn add(&mut self, status: SyncStatus, count: usize) {
        match status {
            SyncStatus::Pending => self.pending += count,
            SyncStatus::Syncing => self.syncing += count,
            SyncStatus::Synced => self.synced += count,
            SyncStatus::Failed => self.failed += count,
        }
        self.total += count;
    }

    /// Percentage of chunks synced, 0 for an empty document.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.synced as f64 * 100.0 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_counts() {
        let chunk = ChunkRecord::new("c1", "doc1", "hello  wide world", 0);
        assert_eq!(chunk.word_count, 3);
        assert_eq!(chunk.character_count, 17);
        assert_eq!(chunk.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_deserialize_upstream_shape() {
        let chunk: ChunkRecord = serde_json::from_str(
            r#"{"id":"c1","documentId":"d1","content":"x","chunkIndex":4,"headings":["A","B"]}"#,
        )
        .unwrap();
        assert_eq!(chunk.chunk_index, 4);
        assert_eq!(chunk.headings, vec!["A", "B"]);
        assert_eq!(chunk.sync_status, SyncStatus::Pending);
        assert!(chunk.external_chunk_id.is_none());
    }

    #[test]
    fn test_heading_trail_string_is_split_into_lines() {
        let chunk: ChunkRecord = serde_json::from_str(
            r##"{"id":"c1","documentId":"d1","content":"x","chunkIndex":0,"headings":"# Handbook\n## Section 3\n\n  Page 12 "}"##,
        )
        .unwrap();
        assert_eq!(chunk.headings, vec!["# Handbook", "## Section 3", "Page 12"]);

        let empty: ChunkRecord = serde_json::from_str(
            r#"{"id":"c2","documentId":"d1","content":"x","chunkIndex":1,"headings":null}"#,
        )
        .unwrap();
        assert!(empty.headings.is_empty());
    }

    #[test]
    fn test_status_roundtrip_and_fallback() {
        for status in [SyncStatus::Pending, SyncStatus::Syncing, SyncStatus::Synced, SyncStatus::Failed] {
            assert_eq!(SyncStatus::from_str(status.as_str()), status);
        }
        assert_eq!(SyncStatus::from_str("bogus"), SyncStatus::Pending);
    }

    #[test]
    fn test_reset_pending_clears_remote_state() {
        let patch = ChunkPatch::reset_pending();
        assert_eq!(patch.sync_status, Some(SyncStatus::Pending));
        assert_eq!(patch.external_chunk_id, Some(None));
        assert_eq!(patch.sync_attempt_count, Some(0));
        assert!(!patch.is_empty());
        assert!(ChunkPatch::default().is_empty());
    }

    #[test]
    fn test_statistics_progress() {
        let mut stats = SyncStatistics::default();
        stats.add(SyncStatus::Synced, 3);
        stats.add(SyncStatus::Pending, 1);
        assert_eq!(stats.total, 4);
        assert!((stats.progress_percent() - 75.0).abs() < f64::EPSILON);
    }
}

//! Episode model.
//!
//! An episode groups the chunks written during one document-sync session
//! into a single remote session.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Episode lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    #[default]
    Active,
    Completed,
    Failed,
}

impl EpisodeStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from string. Unknown values read as `active`.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Active,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Descriptive data attached to an episode at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeMetadata {
    pub document_title: Option<String>,
    pub chunk_count: usize,
    pub batch_id: String,
    pub created_at: i64,
}

/// A remote session grouping one document's synced chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub document_id: String,
    /// Chunks written under this episode, in link order.
    pub chunk_ids: Vec<String>,
    pub status: EpisodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: EpisodeMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Episode {
    /// Create a new active episode.
    #[must_use]
    pub fn new(user_id: &str, document_id: &str, title: Option<&str>, chunk_count: usize) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let id = format!("ep_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let session_id = format!("sess_{document_id}_{now}");
        Self {
            id,
            user_id: user_id.to_string(),
            session_id,
            document_id: document_id.to_string(),
            chunk_ids: Vec::new(),
            status: EpisodeStatus::Active,
            error: None,
            metadata: EpisodeMetadata {
                document_title: title.map(ToString::to_string),
                chunk_count,
                batch_id: format!("batch_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
                created_at: now,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Union `ids` into the linked chunk set, preserving first-link order.
    ///
    /// Returns how many ids were new.
    pub fn link(&mut self, ids: &[String]) -> usize {
        let mut seen: HashSet<String> = self.chunk_ids.iter().cloned().collect();
        let before = self.chunk_ids.len();
        for id in ids {
            if seen.insert(id.clone()) {
                self.chunk_ids.push(id.clone());
            }
        }
        let added = self.chunk_ids.len() - before;
        if added > 0 {
            self.touch();
        }
        added
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_episode_is_active() {
        let ep = Episode::new("u1", "doc1", Some("Title"), 4);
        assert!(ep.id.starts_with("ep_"));
        assert_eq!(ep.status, EpisodeStatus::Active);
        assert_eq!(ep.metadata.chunk_count, 4);
        assert_eq!(ep.metadata.document_title.as_deref(), Some("Title"));
        assert!(ep.session_id.contains("doc1"));
    }

    #[test]
    fn test_link_is_idempotent_union() {
        let mut ep = Episode::new("u1", "doc1", None, 3);
        assert_eq!(ep.link(&["a".into(), "b".into()]), 2);
        assert_eq!(ep.link(&["b".into(), "c".into(), "a".into()]), 1);
        assert_eq!(ep.chunk_ids, vec!["a", "b", "c"]);
        assert_eq!(ep.link(&["c".into()]), 0);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!EpisodeStatus::Active.is_terminal());
        assert!(EpisodeStatus::Completed.is_terminal());
        assert_eq!(EpisodeStatus::from_str("FAILED"), EpisodeStatus::Failed);
    }
}

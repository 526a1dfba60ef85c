//! Remote knowledge-graph service.
//!
//! [`GraphClient`] is the only door to the hosted memory service. The sync
//! engine writes chunks through it, the episode manager mirrors sessions
//! through it, and rollback deletes through it. [`HttpGraphClient`] talks to
//! a Zep-style REST API; tests substitute an in-process double.

pub mod http;

pub use http::HttpGraphClient;

use crate::error::Result;
use crate::model::{Episode, EpisodeStatus};
use serde::Serialize;
use std::future::Future;

/// One chunk write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddChunkRequest {
    pub user_id: String,
    /// Remote session the chunk belongs to.
    pub session_id: String,
    /// Local chunk id, used for the source description.
    pub chunk_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Remote projection of an [`Episode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteSession {
    pub session_id: String,
    pub user_id: String,
    pub metadata: serde_json::Value,
}

impl RemoteSession {
    #[must_use]
    pub fn from_episode(episode: &Episode) -> Self {
        let mut metadata = serde_json::json!({
            "episode_id": episode.id,
            "document_id": episode.document_id,
            "status": episode.status.as_str(),
            "chunk_count": episode.metadata.chunk_count,
            "linked_chunks": episode.chunk_ids.len(),
            "batch_id": episode.metadata.batch_id,
            "created_at": episode.created_at,
            "updated_at": episode.updated_at,
        });
        if let Some(title) = &episode.metadata.document_title {
            metadata["document_title"] = serde_json::Value::String(title.clone());
        }
        if episode.status == EpisodeStatus::Failed {
            if let Some(error) = &episode.error {
                metadata["error"] = serde_json::Value::String(error.clone());
            }
        }
        Self {
            session_id: episode.session_id.clone(),
            user_id: episode.user_id.clone(),
            metadata,
        }
    }
}

/// Operations on the remote memory service.
///
/// Errors must be classified: `RateLimited` for 429, `Connection` for 5xx
/// and transport failures, anything else non-retryable.
pub trait GraphClient: Send + Sync {
    /// Write one chunk and return its external id.
    fn add_chunk(&self, request: &AddChunkRequest) -> impl Future<Output = Result<String>> + Send;

    /// Delete a previously written chunk by external id.
    fn delete_chunk(&self, external_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create the user if missing. Existing users are not an error.
    fn ensure_user(&self, user_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create the remote session for an episode. Existing sessions are not an error.
    fn create_session(&self, session: &RemoteSession) -> impl Future<Output = Result<()>> + Send;

    /// Replace the session metadata.
    fn update_session(&self, session: &RemoteSession) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_session_projection() {
        let mut ep = Episode::new("u1", "doc1", Some("Handbook"), 3);
        ep.link(&["c1".to_string()]);
        let session = RemoteSession::from_episode(&ep);
        assert_eq!(session.session_id, ep.session_id);
        assert_eq!(session.metadata["status"], "active");
        assert_eq!(session.metadata["linked_chunks"], 1);
        assert_eq!(session.metadata["document_title"], "Handbook");
        assert!(session.metadata.get("error").is_none());

        ep.status = EpisodeStatus::Failed;
        ep.error = Some("all chunks failed".into());
        let session = RemoteSession::from_episode(&ep);
        assert_eq!(session.metadata["error"], "all chunks failed");
    }
}

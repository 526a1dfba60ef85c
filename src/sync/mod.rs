//! Document sync orchestration.
//!
//! [`SyncService`] pushes a document's unsynced chunks to the remote memory
//! service:
//!
//! 1. claim the document (one in-flight sync per document)
//! 2. fetch `pending`/`syncing` chunks in `chunk_index` order
//! 3. open or reuse the document's active episode
//! 4. split into batches and drain them with a fixed pool of workers
//! 5. per chunk: `syncing` → map → rate limit → remote write → `synced`/`failed`
//! 6. settle the episode status and take a closing checkpoint
//!
//! Chunk failures never abort a run. They are returned in
//! [`SyncBatchResult::errors`].

mod service;
mod types;

pub use service::SyncService;
pub use types::{
    ChunkError, HealthSnapshot, SyncAction, SyncBatchResult, SyncStatusSnapshot,
};

use crate::error::Result;
use std::future::Future;

/// Await a secondary write, logging and swallowing its failure.
///
/// For mirrored state whose loss must not fail the primary operation.
pub async fn best_effort<T>(operation: &str, write: impl Future<Output = Result<T>>) -> Option<T> {
    match write.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation, error = %e, "best-effort write failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        assert_eq!(best_effort("ok", async { Ok(7) }).await, Some(7));
        let failed: Option<()> =
            best_effort("fails", async { Err(Error::Connection("down".into())) }).await;
        assert!(failed.is_none());
    }
}

//! Transport-neutral handlers for the sync endpoint.
//!
//! A web layer authenticates the caller, passes the user id (or `None`) and
//! the request payload here, and writes back the returned status and body.

use crate::error::{Error, ErrorCode};
use crate::graph::GraphClient;
use crate::repository::SyncStore;
use crate::sync::{SyncAction, SyncService};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

/// Status code and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn from_error(error: &Error) -> Self {
        let status = match error.error_code() {
            ErrorCode::Unauthenticated => 401,
            ErrorCode::ValidationFailed | ErrorCode::InvalidArgument | ErrorCode::JsonError => 400,
            _ => 500,
        };
        if status == 500 {
            error!(error = %error, code = error.error_code().as_str(), "sync request failed");
        }
        Self {
            status,
            body: error.to_structured_json(),
        }
    }
}

/// Body of `POST sync`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub action: SyncAction,
}

fn require_user(user_id: Option<&str>) -> Result<&str, Error> {
    user_id.filter(|u| !u.trim().is_empty()).ok_or(Error::Unauthenticated)
}

fn require_document(document_id: Option<&str>) -> Result<&str, Error> {
    document_id
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| Error::Validation("documentId is required".to_string()))
}

/// `POST sync {documentId, action}`.
pub async fn handle_sync_post<S, G>(service: &SyncService<S, G>, user_id: Option<&str>, body: &Value) -> ApiResponse
where
    S: SyncStore + 'static,
    G: GraphClient + 'static,
{
    let outcome = async {
        let user_id = require_user(user_id)?;
        let request: SyncRequest = serde_json::from_value(body.clone())?;
        let document_id = require_document(request.document_id.as_deref())?;
        debug!(document_id, action = request.action.as_str(), "sync request");

        let result = match request.action {
            SyncAction::Sync => service.sync_document_chunks(document_id, user_id).await?,
            SyncAction::Retry => service.retry_failed_chunks(document_id, user_id).await?,
        };
        Ok::<_, Error>(serde_json::to_value(result)?)
    }
    .await;

    match outcome {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiResponse::from_error(&e),
    }
}

/// `GET sync?documentId=...`.
pub async fn handle_sync_get<S, G>(
    service: &SyncService<S, G>,
    user_id: Option<&str>,
    document_id: Option<&str>,
) -> ApiResponse
where
    S: SyncStore + 'static,
    G: GraphClient + 'static,
{
    let outcome = async {
        require_user(user_id)?;
        let document_id = require_document(document_id)?;
        let status = service.get_sync_status(document_id).await?;
        Ok::<_, Error>(serde_json::to_value(status)?)
    }
    .await;

    match outcome {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiResponse::from_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::storage::{SqliteRepository, SqliteStorage};
    use crate::testing::{chunks_for, MockGraphClient};
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> SyncService<SqliteRepository, MockGraphClient> {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.ingest_chunks(&chunks_for("doc1", 2), "test").unwrap();
        let store = Arc::new(SqliteRepository::new(storage, "test"));
        SyncService::from_config(store, Arc::new(MockGraphClient::new()), &SyncConfig::default())
    }

    #[tokio::test]
    async fn test_post_sync_then_get_status() {
        let service = service();
        let response = handle_sync_post(&service, Some("user1"), &json!({"documentId": "doc1"})).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["totalChunks"], 2);
        assert_eq!(response.body["successfulChunks"], 2);
        assert_eq!(response.body["failedChunks"], 0);
        assert!(response.body["episodeId"].is_string());

        let status = handle_sync_get(&service, Some("user1"), Some("doc1")).await;
        assert_eq!(status.status, 200);
        assert_eq!(status.body["syncedChunks"], 2);
        assert_eq!(status.body["pendingChunks"], 0);
    }

    #[tokio::test]
    async fn test_retry_action() {
        let service = service();
        let response = handle_sync_post(
            &service,
            Some("user1"),
            &json!({"documentId": "doc1", "action": "retry"}),
        )
        .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["totalChunks"], 0);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let service = service();

        let unauthenticated = handle_sync_post(&service, None, &json!({"documentId": "doc1"})).await;
        assert_eq!(unauthenticated.status, 401);
        assert_eq!(unauthenticated.body["error"]["code"], "UNAUTHENTICATED");

        let missing = handle_sync_post(&service, Some("user1"), &json!({})).await;
        assert_eq!(missing.status, 400);
        assert_eq!(missing.body["error"]["code"], "VALIDATION_FAILED");

        let bad_action = handle_sync_post(
            &service,
            Some("user1"),
            &json!({"documentId": "doc1", "action": "purge"}),
        )
        .await;
        assert_eq!(bad_action.status, 400);

        let get_missing = handle_sync_get(&service, Some("user1"), None).await;
        assert_eq!(get_missing.status, 400);
        assert_eq!(handle_sync_get(&service, Some(""), Some("doc1")).await.status, 401);
    }

    #[tokio::test]
    async fn test_request_level_failures_are_500() {
        let service = service();
        for _ in 0..10 {
            service.breaker().record_failure();
        }
        let response = handle_sync_post(&service, Some("user1"), &json!({"documentId": "doc1"})).await;
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"]["code"], "CIRCUIT_OPEN");
        assert_eq!(response.body["error"]["retryable"], false);
    }
}

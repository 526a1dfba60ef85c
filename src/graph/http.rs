//! HTTP client for a Zep-style memory service.
//!
//! Endpoints used:
//!
//! | Operation      | Request                                |
//! |----------------|----------------------------------------|
//! | add chunk      | `POST /api/v2/graph`                   |
//! | delete chunk   | `DELETE /api/v2/graph/episodes/{id}`   |
//! | ensure user    | `POST /api/v2/users`                   |
//! | create session | `POST /api/v2/threads`                 |
//! | update session | `PATCH /api/v2/threads/{id}`           |

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AddChunkRequest, GraphClient, RemoteSession};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// reqwest-backed [`GraphClient`].
#[derive(Debug, Clone)]
pub struct HttpGraphClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpGraphClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no API key is configured or the HTTP
    /// client cannot be built.
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("graph.api_key is not set (ZEP_API_KEY)".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(reqwest::header::AUTHORIZATION, format!("Api-Key {}", self.api_key))
    }

    /// Send and turn non-2xx responses into classified errors.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), retry_after, &body))
    }

    /// Like [`send`](Self::send), but "already exists" conflicts count as success.
    async fn send_idempotent(&self, builder: reqwest::RequestBuilder) -> Result<()> {
        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(Error::Remote { status, message })
                if status == 409 || message.to_lowercase().contains("already exists") =>
            {
                tracing::debug!(status, "remote resource already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct GraphAddBody<'a> {
    user_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a str,
    source_description: String,
    metadata: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphEpisodeResponse {
    uuid: String,
}

#[derive(Debug, Serialize)]
struct UserBody<'a> {
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ThreadBody<'a> {
    thread_id: &'a str,
    user_id: &'a str,
    metadata: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ThreadPatchBody<'a> {
    metadata: &'a serde_json::Value,
}

impl GraphClient for HttpGraphClient {
    async fn add_chunk(&self, request: &AddChunkRequest) -> Result<String> {
        let body = GraphAddBody {
            user_id: &request.user_id,
            kind: "text",
            data: &request.content,
            source_description: format!("chunk {} of session {}", request.chunk_id, request.session_id),
            metadata: &request.metadata,
        };
        let response = self
            .send(self.request(reqwest::Method::POST, "/api/v2/graph").json(&body))
            .await?;
        let episode: GraphEpisodeResponse = response.json().await.map_err(|e| Error::Remote {
            status: 200,
            message: format!("Failed to parse graph response: {e}"),
        })?;
        Ok(episode.uuid)
    }

    async fn delete_chunk(&self, external_id: &str) -> Result<()> {
        let path = format!("/api/v2/graph/episodes/{external_id}");
        match self.send(self.request(reqwest::Method::DELETE, &path)).await {
            Ok(_) => Ok(()),
            // already gone
            Err(Error::Remote { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        self.send_idempotent(
            self.request(reqwest::Method::POST, "/api/v2/users")
                .json(&UserBody { user_id }),
        )
        .await
    }

    async fn create_session(&self, session: &RemoteSession) -> Result<()> {
        self.send_idempotent(self.request(reqwest::Method::POST, "/api/v2/threads").json(&ThreadBody {
            thread_id: &session.session_id,
            user_id: &session.user_id,
            metadata: &session.metadata,
        }))
        .await
    }

    async fn update_session(&self, session: &RemoteSession) -> Result<()> {
        let path = format!("/api/v2/threads/{}", session.session_id);
        self.send(
            self.request(reqwest::Method::PATCH, &path)
                .json(&ThreadPatchBody { metadata: &session.metadata }),
        )
        .await
        .map(|_| ())
    }
}

/// Map a transport failure. Everything below HTTP is worth retrying.
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Connection(format!("request timed out: {e}"))
    } else {
        Error::Connection(e.to_string())
    }
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

/// Classify a non-success status.
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> Error {
    let message = truncate_body(body);
    match status {
        429 => Error::RateLimited {
            message: if message.is_empty() { "too many requests".to_string() } else { message },
            retry_after,
        },
        500..=599 => Error::Connection(format!("server error {status}: {message}")),
        _ => Error::Remote { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let err = HttpGraphClient::new(&GraphConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = GraphConfig {
            api_key: Some("secret".into()),
            base_url: "https://example.test/".into(),
            ..GraphConfig::default()
        };
        let client = HttpGraphClient::new(&config).unwrap();
        assert_eq!(client.url("/api/v2/graph"), "https://example.test/api/v2/graph");
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(429, Some(Duration::from_secs(2)), "");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        assert!(matches!(classify_status(503, None, "busy"), Error::Connection(_)));
        assert!(classify_status(502, None, "").is_retryable());

        let err = classify_status(400, None, "bad payload");
        assert!(matches!(err, Error::Remote { status: 400, ref message } if message == "bad payload"));
        assert!(!err.is_retryable());
        assert!(!classify_status(401, None, "").is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_long_bodies_truncated() {
        let body = "x".repeat(1_000);
        match classify_status(400, None, &body) {
            Error::Remote { message, .. } => assert_eq!(message.chars().count(), MAX_ERROR_BODY + 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}

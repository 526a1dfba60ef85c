//! Error types for chunksync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, etc.)
//! - A single retryability classification shared by the retry handler
//!   and the circuit breaker
//! - Structured JSON output for piped / non-TTY consumers

use std::time::Duration;
use thiserror::Error;

/// Result type alias for chunksync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    NotInitialized,
    DatabaseError,

    // Not Found (exit 3)
    ChunkNotFound,
    EpisodeNotFound,
    CheckpointNotFound,
    DocumentNotFound,

    // Validation (exit 4)
    ValidationFailed,
    InvalidArgument,
    Unauthenticated,

    // Sync conflict (exit 5)
    SyncInProgress,

    // Remote (exit 6)
    RateLimited,
    ConnectionFailed,
    CircuitOpen,
    RetriesExhausted,
    RemoteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Embedding (exit 9)
    EmbeddingError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ChunkNotFound => "CHUNK_NOT_FOUND",
            Self::EpisodeNotFound => "EPISODE_NOT_FOUND",
            Self::CheckpointNotFound => "CHECKPOINT_NOT_FOUND",
            Self::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
            Self::RateLimited => "RATE_LIMITED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::EmbeddingError => "EMBEDDING_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError => 2,
            Self::ChunkNotFound
            | Self::EpisodeNotFound
            | Self::CheckpointNotFound
            | Self::DocumentNotFound => 3,
            Self::ValidationFailed | Self::InvalidArgument | Self::Unauthenticated => 4,
            Self::SyncInProgress => 5,
            Self::RateLimited
            | Self::ConnectionFailed
            | Self::CircuitOpen
            | Self::RetriesExhausted
            | Self::RemoteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::EmbeddingError => 9,
        }
    }

    /// Whether the same call may succeed if simply repeated later.
    ///
    /// Only throttling and transport failures qualify. Everything else is
    /// fatal for the operation that produced it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ConnectionFailed)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in chunksync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `chunksync init` first")]
    NotInitialized,

    #[error("Rate limited by remote service: {message}")]
    RateLimited {
        message: String,
        /// Server-provided wait hint (`Retry-After`).
        retry_after: Option<Duration>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Circuit breaker open, retry in {}ms", remaining.as_millis())]
    CircuitOpen { remaining: Duration },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Document {document_id} is already syncing")]
    ConcurrentSync { document_id: String },

    #[error("Remote service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: String },

    #[error("Episode not found: {id}")]
    EpisodeNotFound { id: String },

    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Connection(_) => ErrorCode::ConnectionFailed,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::MaxRetriesExceeded { .. } => ErrorCode::RetriesExhausted,
            Self::Remote { .. } => ErrorCode::RemoteError,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::ConcurrentSync { .. } => ErrorCode::SyncInProgress,
            Self::ChunkNotFound { .. } => ErrorCode::ChunkNotFound,
            Self::EpisodeNotFound { .. } => ErrorCode::EpisodeNotFound,
            Self::CheckpointNotFound { .. } => ErrorCode::CheckpointNotFound,
            Self::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Embedding(_) => ErrorCode::EmbeddingError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether the failed call may be repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Server-provided wait hint, if this is a throttling error that carried one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Unwrap `MaxRetriesExceeded` down to the error that caused it.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::MaxRetriesExceeded { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Context-aware recovery hint for operators.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `chunksync init` to create the database".to_string())
            }
            Self::CircuitOpen { remaining } => Some(format!(
                "The remote service is failing repeatedly. Wait {}s before syncing again.",
                remaining.as_secs().max(1)
            )),
            Self::ConcurrentSync { document_id } => Some(format!(
                "Wait for the running sync of '{document_id}' to finish, \
                 or check progress with `chunksync status {document_id}`."
            )),
            Self::RateLimited { .. } => {
                Some("Lower `rate_limit.provider_limit_per_minute` or raise the headroom.".to_string())
            }
            Self::Unauthenticated => {
                Some("Pass --user or set CHUNKSYNC_USER.".to_string())
            }
            Self::Remote { status: 401 | 403, .. } => {
                Some("Check ZEP_API_KEY or `graph.api_key` in ~/.chunksync/config.json".to_string())
            }
            Self::CheckpointNotFound { id } => Some(format!(
                "No checkpoint with ID '{id}'. Use `chunksync checkpoint list` to see retained checkpoints."
            )),
            Self::DocumentNotFound { id } => Some(format!(
                "No document '{id}'. Use `chunksync ingest <file>` to load its chunks."
            )),
            Self::MaxRetriesExceeded { .. } => Some(
                "Run `chunksync sync <document> --retry` once the remote service recovers.".to_string(),
            ),
            Self::Connection(_)
            | Self::Validation(_)
            | Self::Remote { .. }
            | Self::ChunkNotFound { .. }
            | Self::EpisodeNotFound { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Embedding(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

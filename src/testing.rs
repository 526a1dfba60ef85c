//! In-process doubles shared by unit tests.

use crate::embeddings::{EmbeddingProvider, ProviderInfo};
use crate::error::{Error, Result};
use crate::graph::{AddChunkRequest, GraphClient, RemoteSession};
use crate::model::ChunkRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Pending chunks `{doc}-{i}` with a few sentences of content each.
pub fn chunks_for(document_id: &str, count: u32) -> Vec<ChunkRecord> {
    (0..count)
        .map(|i| {
            let content = format!(
                "Section {i} of the handbook explains how the warehouse team \
                 receives inbound pallets, checks them against the manifest, \
                 and records any damage before the goods are shelved."
            );
            ChunkRecord::new(&format!("{document_id}-{i}"), document_id, &content, i)
        })
        .collect()
}

/// How a scripted chunk write fails.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedFailure {
    Connection,
    /// 429 with an optional retry-after hint.
    RateLimited(Option<Duration>),
    Remote(u16),
}

impl ScriptedFailure {
    fn to_error(self) -> Error {
        match self {
            Self::Connection => Error::Connection("connection reset by peer".into()),
            Self::RateLimited(retry_after) => Error::RateLimited {
                message: "too many requests".into(),
                retry_after,
            },
            Self::Remote(status) => Error::Remote {
                status,
                message: format!("rejected with {status}"),
            },
        }
    }
}

/// Scriptable [`GraphClient`] that records every call.
#[derive(Debug, Default)]
pub struct MockGraphClient {
    scripts: Mutex<HashMap<String, (ScriptedFailure, u32)>>,
    latency: Mutex<Option<Duration>>,
    fail_all: AtomicBool,
    fail_deletes: AtomicBool,
    fail_sessions: AtomicBool,
    add_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    sessions_created: AtomicUsize,
    sessions_updated: AtomicUsize,
}

impl MockGraphClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` writes of `chunk_id`.
    pub fn script(&self, chunk_id: &str, failure: ScriptedFailure, times: u32) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk_id.to_string(), (failure, times));
    }

    /// Fail every chunk write with a connection error.
    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    /// Delay applied to chunk writes only.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_session_writes(&self, on: bool) {
        self.fail_sessions.store(on, Ordering::SeqCst);
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_updated(&self) -> usize {
        self.sessions_updated.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, chunk_id: &str) -> Option<Error> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let (failure, remaining) = scripts.get_mut(chunk_id)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(failure.to_error())
    }

    fn session_result(&self) -> Result<()> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                status: 500,
                message: "session store unavailable".into(),
            });
        }
        Ok(())
    }
}

impl GraphClient for MockGraphClient {
    async fn add_chunk(&self, request: &AddChunkRequest) -> Result<String> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ScriptedFailure::Connection.to_error());
        }
        if let Some(err) = self.scripted_failure(&request.chunk_id) {
            return Err(err);
        }
        Ok(format!("ext-{}", request.chunk_id))
    }

    async fn delete_chunk(&self, external_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                status: 403,
                message: "delete forbidden".into(),
            });
        }
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(external_id.to_string());
        Ok(())
    }

    async fn ensure_user(&self, _user_id: &str) -> Result<()> {
        self.session_result()
    }

    async fn create_session(&self, _session: &RemoteSession) -> Result<()> {
        self.session_result()?;
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_session(&self, _session: &RemoteSession) -> Result<()> {
        self.session_result()?;
        self.sessions_updated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider that returns the same vector for every text.
#[derive(Debug, Clone)]
pub struct StaticEmbeddings {
    dimensions: usize,
    vector: Vec<f32>,
}

impl StaticEmbeddings {
    pub fn new(dimensions: usize, vector: Vec<f32>) -> Self {
        Self { dimensions, vector }
    }
}

impl EmbeddingProvider for StaticEmbeddings {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "static".to_string(),
            model: "static-test".to_string(),
            dimensions: self.dimensions,
            max_chars: 10_000,
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }
}

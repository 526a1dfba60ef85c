//! Command implementations.
//!
//! Every command opens the database, wires the services it needs and drives
//! them on a single tokio runtime.

pub mod checkpoint;
pub mod chunks;
pub mod config;
pub mod embeddings;
pub mod health;
pub mod ingest;
pub mod init;
pub mod report;
pub mod status;
pub mod sync;

use crate::config::{default_user, resolve_config, resolve_db_path, SyncConfig};
use crate::error::{Error, Result};
use crate::graph::{AddChunkRequest, GraphClient, HttpGraphClient, RemoteSession};
use crate::recovery::RollbackRecoveryService;
use crate::storage::{SqliteRepository, SqliteStorage};
use crate::sync::SyncService;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Global flags every command sees.
#[derive(Debug, Clone)]
pub struct Context {
    pub db: Option<PathBuf>,
    pub user: Option<String>,
    pub json: bool,
}

impl Context {
    /// `--user`, else `CHUNKSYNC_USER`, else the login name.
    #[must_use]
    pub fn user(&self) -> String {
        self.user.clone().filter(|u| !u.trim().is_empty()).unwrap_or_else(default_user)
    }

    /// Path of an initialized database.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` if no database exists there.
    pub fn db_path(&self) -> Result<PathBuf> {
        let path = resolve_db_path(self.db.as_deref()).ok_or(Error::NotInitialized)?;
        if !path.exists() {
            return Err(Error::NotInitialized);
        }
        Ok(path)
    }

    /// Open the database behind the async repository adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is missing or cannot be opened.
    pub fn repository(&self) -> Result<Arc<SqliteRepository>> {
        let storage = SqliteStorage::open(&self.db_path()?)?;
        Ok(Arc::new(SqliteRepository::new(storage, &self.user())))
    }

    /// Build the sync service with checkpoints reloaded from the database.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration or the database cannot be loaded.
    pub async fn services(&self) -> Result<Services> {
        let config = resolve_config()?;
        let store = self.repository()?;
        let graph = Arc::new(CliGraph::from_config(&config));
        let service = SyncService::from_config(store.clone(), graph.clone(), &config);
        service.recovery().hydrate().await?;
        Ok(Services {
            config,
            store,
            graph,
            service,
        })
    }

    /// Print `value` as JSON, or run `human` for terminal output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

/// Everything a command may need, wired from one configuration.
pub struct Services {
    pub config: SyncConfig,
    pub store: Arc<SqliteRepository>,
    pub graph: Arc<CliGraph>,
    pub service: SyncService<SqliteRepository, CliGraph>,
}

impl Services {
    #[must_use]
    pub fn recovery(&self) -> &RollbackRecoveryService<SqliteRepository, CliGraph> {
        self.service.recovery()
    }
}

/// Run an async command body on a fresh runtime.
///
/// # Errors
///
/// Returns the body's error, or `Error::Other` if no runtime can be built.
pub fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    rt.block_on(future)
}

/// Graph client that may be unconfigured.
///
/// Local-only commands still need a [`GraphClient`] to build the services.
/// Without credentials every remote call fails with the configuration error.
#[derive(Debug)]
pub struct CliGraph {
    client: std::result::Result<HttpGraphClient, String>,
}

impl CliGraph {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        let client = HttpGraphClient::new(&config.graph).map_err(|e| match e {
            Error::Config(message) => message,
            other => other.to_string(),
        });
        Self { client }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.client.is_ok()
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if the graph service is not configured.
    pub fn client(&self) -> Result<&HttpGraphClient> {
        self.client.as_ref().map_err(|message| Error::Config(message.clone()))
    }
}

impl GraphClient for CliGraph {
    async fn add_chunk(&self, request: &AddChunkRequest) -> Result<String> {
        self.client()?.add_chunk(request).await
    }

    async fn delete_chunk(&self, external_id: &str) -> Result<()> {
        self.client()?.delete_chunk(external_id).await
    }

    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        self.client()?.ensure_user(user_id).await
    }

    async fn create_session(&self, session: &RemoteSession) -> Result<()> {
        self.client()?.create_session(session).await
    }

    async fn update_session(&self, session: &RemoteSession) -> Result<()> {
        self.client()?.update_session(session).await
    }
}

/// Shorten an id list for terminal output.
#[must_use]
pub fn preview_ids(ids: &[String], max: usize) -> String {
    if ids.len() <= max {
        return ids.join(", ");
    }
    format!("{}, ... ({} more)", ids[..max].join(", "), ids.len() - max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_ids() {
        let ids: Vec<String> = (0..5).map(|i| format!("c{i}")).collect();
        assert_eq!(preview_ids(&ids[..2], 3), "c0, c1");
        assert_eq!(preview_ids(&ids, 3), "c0, c1, c2, ... (2 more)");
    }

    #[tokio::test]
    async fn test_unconfigured_graph_fails_remote_calls() {
        let graph = CliGraph::from_config(&SyncConfig::default());
        assert!(!graph.is_configured());
        assert!(matches!(graph.ensure_user("u1").await, Err(Error::Config(_))));
    }
}

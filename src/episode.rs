//! Episode lifecycle and the active-episode registry.
//!
//! At most one active episode exists per `(document_id, user_id)` pair. The
//! registry is in-process: it is the source of truth for that rule, and the
//! store and remote service only receive mirrored copies.
//!
//! Registry entries expire after the configured TTL of inactivity. Expired
//! entries are evicted lazily on lookup and by [`EpisodeManager::spawn_sweeper`].

use crate::config::EpisodeConfig;
use crate::error::{Error, Result};
use crate::graph::{GraphClient, RemoteSession};
use crate::model::{Episode, EpisodeStatus};
use crate::repository::StateMirror;
use crate::sync::best_effort;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

type RegistryKey = (String, String);

#[derive(Debug)]
struct Tracked {
    episode: Episode,
    last_activity: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    /// `(document_id, user_id)` to the id of its active episode.
    active: HashMap<RegistryKey, String>,
    episodes: HashMap<String, Tracked>,
}

/// Creates, tracks and mirrors episodes.
#[derive(Debug)]
pub struct EpisodeManager<S, G> {
    store: Arc<S>,
    graph: Arc<G>,
    ttl: Duration,
    sweep_interval: Duration,
    registry: Mutex<Registry>,
}

impl<S: StateMirror, G: GraphClient> EpisodeManager<S, G> {
    #[must_use]
    pub fn new(store: Arc<S>, graph: Arc<G>, config: &EpisodeConfig) -> Self {
        Self {
            store,
            graph,
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, tracked: &Tracked) -> bool {
        tracked.last_activity.elapsed() >= self.ttl
    }

    /// Return the live active episode for the pair, or create and register one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an empty user or document id.
    pub async fn create_or_get_episode(
        &self,
        user_id: &str,
        document_id: &str,
        title: Option<&str>,
        chunk_count: usize,
    ) -> Result<Episode> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("user id must not be empty".to_string()));
        }
        if document_id.trim().is_empty() {
            return Err(Error::Validation("document id must not be empty".to_string()));
        }

        let key = (document_id.to_string(), user_id.to_string());
        let episode = {
            let mut registry = self.lock();
            if let Some(id) = registry.active.get(&key).cloned() {
                match registry.episodes.get(&id) {
                    Some(tracked)
                        if tracked.episode.status == EpisodeStatus::Active && !self.is_expired(tracked) =>
                    {
                        debug!(episode_id = %id, document_id, "reusing active episode");
                        return Ok(tracked.episode.clone());
                    }
                    _ => {
                        info!(episode_id = %id, document_id, user_id, "active episode expired");
                        registry.active.remove(&key);
                    }
                }
            }

            let forgotten = Self::forget_idle(&mut registry, self.ttl);
            if forgotten > 0 {
                debug!(forgotten, "forgot idle episodes");
            }

            let episode = Episode::new(user_id, document_id, title, chunk_count);
            registry.active.insert(key, episode.id.clone());
            registry.episodes.insert(
                episode.id.clone(),
                Tracked {
                    episode: episode.clone(),
                    last_activity: Instant::now(),
                },
            );
            episode
        };

        info!(episode_id = %episode.id, document_id, user_id, chunk_count, "created episode");
        best_effort("mirror episode", self.store.mirror_episode(&episode)).await;
        best_effort("ensure remote user", self.graph.ensure_user(user_id)).await;
        best_effort(
            "create remote session",
            self.graph.create_session(&RemoteSession::from_episode(&episode)),
        )
        .await;
        Ok(episode)
    }

    /// Set an episode's status. Terminal statuses release the registry slot.
    ///
    /// # Errors
    ///
    /// Returns `Error::EpisodeNotFound` for an unknown id.
    pub async fn update_status(
        &self,
        episode_id: &str,
        status: EpisodeStatus,
        error: Option<&str>,
    ) -> Result<Episode> {
        let episode = {
            let mut registry = self.lock();
            let tracked = registry
                .episodes
                .get_mut(episode_id)
                .ok_or_else(|| Error::EpisodeNotFound { id: episode_id.to_string() })?;
            tracked.episode.status = status;
            tracked.episode.error = error.map(ToString::to_string);
            tracked.episode.touch();
            tracked.last_activity = Instant::now();
            let episode = tracked.episode.clone();

            if status.is_terminal() {
                let key = (episode.document_id.clone(), episode.user_id.clone());
                if registry.active.get(&key).is_some_and(|id| id == episode_id) {
                    registry.active.remove(&key);
                }
            }
            episode
        };

        info!(episode_id, status = status.as_str(), "episode status updated");
        best_effort("mirror episode", self.store.mirror_episode(&episode)).await;
        best_effort(
            "update remote session",
            self.graph.update_session(&RemoteSession::from_episode(&episode)),
        )
        .await;
        Ok(episode)
    }

    /// Union `chunk_ids` into the episode. Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns `Error::EpisodeNotFound` for an unknown id.
    pub async fn link_chunks(&self, episode_id: &str, chunk_ids: &[String]) -> Result<usize> {
        let (added, episode) = {
            let mut registry = self.lock();
            let tracked = registry
                .episodes
                .get_mut(episode_id)
                .ok_or_else(|| Error::EpisodeNotFound { id: episode_id.to_string() })?;
            let added = tracked.episode.link(chunk_ids);
            tracked.last_activity = Instant::now();
            (added, (added > 0).then(|| tracked.episode.clone()))
        };

        if let Some(episode) = episode {
            best_effort("mirror episode", self.store.mirror_episode(&episode)).await;
        }
        Ok(added)
    }

    #[must_use]
    pub fn get_episode(&self, episode_id: &str) -> Option<Episode> {
        self.lock().episodes.get(episode_id).map(|t| t.episode.clone())
    }

    /// Live active episode for the pair, if any.
    #[must_use]
    pub fn active_episode(&self, document_id: &str, user_id: &str) -> Option<Episode> {
        let registry = self.lock();
        let id = registry
            .active
            .get(&(document_id.to_string(), user_id.to_string()))?;
        registry
            .episodes
            .get(id)
            .filter(|t| !self.is_expired(t))
            .map(|t| t.episode.clone())
    }

    /// Number of registry entries that have not expired.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let registry = self.lock();
        registry
            .active
            .values()
            .filter(|id| registry.episodes.get(*id).is_some_and(|t| !self.is_expired(t)))
            .count()
    }

    /// Evict expired registry entries and forget idle episodes.
    ///
    /// Returns how many active entries were evicted.
    pub fn sweep_expired(&self) -> usize {
        let mut guard = self.lock();
        let registry = &mut *guard;

        let expired: Vec<RegistryKey> = registry
            .active
            .iter()
            .filter(|(_, id)| registry.episodes.get(*id).is_none_or(|t| self.is_expired(t)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(id) = registry.active.remove(key) {
                info!(episode_id = %id, document_id = %key.0, user_id = %key.1, "evicted abandoned episode");
            }
        }

        Self::forget_idle(registry, self.ttl);
        expired.len()
    }

    /// Drop episodes that hold no registry slot and saw no activity for `ttl`.
    fn forget_idle(registry: &mut Registry, ttl: Duration) -> usize {
        let before = registry.episodes.len();
        let Registry { active, episodes } = registry;
        episodes.retain(|id, t| active.values().any(|a| a == id) || t.last_activity.elapsed() < ttl);
        before - episodes.len()
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<S, G> EpisodeManager<S, G>
where
    S: StateMirror + 'static,
    G: GraphClient + 'static,
{
    /// Run [`sweep_expired`](Self::sweep_expired) on the configured interval
    /// until the manager is dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                let evicted = manager.sweep_expired();
                if evicted > 0 {
                    debug!(evicted, "episode sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteRepository, SqliteStorage};
    use crate::testing::MockGraphClient;

    fn manager(ttl_secs: u64) -> (Arc<EpisodeManager<SqliteRepository, MockGraphClient>>, Arc<MockGraphClient>) {
        let store = Arc::new(SqliteRepository::new(SqliteStorage::open_memory().unwrap(), "test"));
        let graph = Arc::new(MockGraphClient::new());
        let config = EpisodeConfig {
            ttl_secs,
            sweep_interval_secs: 1,
        };
        (Arc::new(EpisodeManager::new(store, graph.clone(), &config)), graph)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuses_active_episode_for_pair() {
        let (mgr, graph) = manager(600);
        let a = mgr.create_or_get_episode("u1", "doc1", Some("T"), 2).await.unwrap();
        let b = mgr.create_or_get_episode("u1", "doc1", Some("T"), 2).await.unwrap();
        assert_eq!(a.id, b.id);

        let other_user = mgr.create_or_get_episode("u2", "doc1", None, 2).await.unwrap();
        assert_ne!(a.id, other_user.id);
        assert_eq!(mgr.active_count(), 2);
        assert_eq!(graph.sessions_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_episode_replaced() {
        let (mgr, _) = manager(600);
        let a = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(mgr.active_episode("doc1", "u1").is_none());

        let b = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_releases_slot() {
        let (mgr, graph) = manager(600);
        let a = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        let done = mgr.update_status(&a.id, EpisodeStatus::Completed, None).await.unwrap();
        assert_eq!(done.status, EpisodeStatus::Completed);
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(graph.sessions_updated(), 1);

        let b = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(mgr.get_episode(&a.id).unwrap().status, EpisodeStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_chunks_is_idempotent() {
        let (mgr, _) = manager(600);
        let ep = mgr.create_or_get_episode("u1", "doc1", None, 3).await.unwrap();
        let ids = vec!["c1".to_string(), "c2".to_string()];
        assert_eq!(mgr.link_chunks(&ep.id, &ids).await.unwrap(), 2);
        assert_eq!(mgr.link_chunks(&ep.id, &ids).await.unwrap(), 0);
        assert_eq!(mgr.link_chunks(&ep.id, &["c3".to_string(), "c1".to_string()]).await.unwrap(), 1);
        assert_eq!(mgr.get_episode(&ep.id).unwrap().chunk_ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_episode() {
        let (mgr, _) = manager(600);
        let err = mgr.link_chunks("ep_missing", &[]).await.unwrap_err();
        assert!(matches!(err, Error::EpisodeNotFound { .. }));
        let err = mgr.update_status("ep_missing", EpisodeStatus::Failed, Some("x")).await.unwrap_err();
        assert!(matches!(err, Error::EpisodeNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirror_failures_do_not_fail_creation() {
        let (mgr, graph) = manager(600);
        graph.fail_session_writes(true);
        let ep = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        assert_eq!(ep.status, EpisodeStatus::Active);
        assert!(mgr.update_status(&ep.id, EpisodeStatus::Failed, Some("boom")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_expired() {
        let (mgr, _) = manager(5);
        mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        let handle = mgr.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(mgr.active_count(), 0);
        assert!(mgr.lock().active.is_empty());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_episodes_forgotten_after_ttl() {
        let (mgr, _) = manager(600);
        let done = mgr.create_or_get_episode("u1", "doc1", None, 1).await.unwrap();
        mgr.update_status(&done.id, EpisodeStatus::Completed, None).await.unwrap();
        let live = mgr.create_or_get_episode("u1", "doc2", None, 1).await.unwrap();
        assert!(mgr.get_episode(&done.id).is_some());

        tokio::time::advance(Duration::from_secs(601)).await;
        let fresh = mgr.create_or_get_episode("u2", "doc3", None, 1).await.unwrap();
        assert!(mgr.get_episode(&done.id).is_none());
        assert!(mgr.get_episode(&fresh.id).is_some());
        // still registered, only expired
        assert!(mgr.get_episode(&live.id).is_some());
    }

    #[tokio::test]
    async fn test_rejects_empty_ids() {
        let (mgr, _) = manager(600);
        assert!(matches!(
            mgr.create_or_get_episode("", "doc1", None, 1).await,
            Err(Error::Validation(_))
        ));
    }
}

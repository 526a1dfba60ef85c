//! The sync orchestrator.

use super::best_effort;
use super::types::{ChunkError, HealthSnapshot, SyncBatchResult, SyncStatusSnapshot};
use crate::config::{BatchConfig, SyncConfig};
use crate::episode::EpisodeManager;
use crate::error::{Error, ErrorCode, Result};
use crate::graph::{AddChunkRequest, GraphClient};
use crate::mapping::MetadataMapper;
use crate::model::{CheckpointState, ChunkPatch, ChunkRecord, Episode, EpisodeStatus, SyncPhase, SyncStatus};
use crate::recovery::{NewCheckpoint, RollbackRecoveryService};
use crate::repository::SyncStore;
use crate::resilience::{CircuitBreaker, RateLimiter, RetryHandler, RetryPolicy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS_MESSAGE: &str = "Max retry attempts exceeded";

/// Pause before asking a half-open breaker for a probe slot again.
const PROBE_WAIT: Duration = Duration::from_millis(100);

/// Documents with a sync running, each with its advisory stop flag.
type InFlight = Mutex<HashMap<String, Arc<AtomicBool>>>;

/// Releases a document's in-flight slot when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    document_id: String,
    stop: Arc<AtomicBool>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.document_id);
    }
}

/// Pushes document chunks to the remote memory service.
///
/// The rate limiter and circuit breaker are shared by every sync the service
/// runs, across all documents. When built inside a tokio runtime the service
/// also runs the episode sweeper until it is dropped.
#[derive(Debug)]
pub struct SyncService<S, G> {
    store: Arc<S>,
    graph: Arc<G>,
    limiter: Arc<RateLimiter>,
    retry: RetryHandler,
    episodes: Arc<EpisodeManager<S, G>>,
    recovery: Arc<RollbackRecoveryService<S, G>>,
    mapper: MetadataMapper,
    batch: BatchConfig,
    checkpoint_interval: usize,
    in_flight: InFlight,
    sweeper: Option<JoinHandle<()>>,
}

impl<S, G> Drop for SyncService<S, G> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl<S, G> SyncService<S, G>
where
    S: SyncStore + 'static,
    G: GraphClient + 'static,
{
    /// Wire a service around existing remote-call guards.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        graph: Arc<G>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        config: &SyncConfig,
    ) -> Self {
        let retry = RetryHandler::new(RetryPolicy::from_config(&config.retry), breaker);
        let episodes = Arc::new(EpisodeManager::new(store.clone(), graph.clone(), &config.episode));
        let recovery = Arc::new(RollbackRecoveryService::new(
            store.clone(),
            graph.clone(),
            limiter.clone(),
            retry.clone(),
            &config.checkpoint,
            config.batch.max_attempts,
        ));
        let sweeper = tokio::runtime::Handle::try_current()
            .is_ok()
            .then(|| episodes.spawn_sweeper());
        Self {
            store,
            graph,
            limiter,
            retry,
            episodes,
            recovery,
            mapper: MetadataMapper::new(),
            batch: config.batch.clone(),
            checkpoint_interval: config.checkpoint.interval.max(1),
            in_flight: Mutex::new(HashMap::new()),
            sweeper,
        }
    }

    /// Build a service with its own limiter and breaker.
    #[must_use]
    pub fn from_config(store: Arc<S>, graph: Arc<G>, config: &SyncConfig) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let breaker = Arc::new(CircuitBreaker::new("graph", &config.circuit_breaker));
        Self::new(store, graph, limiter, breaker, config)
    }

    #[must_use]
    pub fn episodes(&self) -> &Arc<EpisodeManager<S, G>> {
        &self.episodes
    }

    #[must_use]
    pub fn recovery(&self) -> &Arc<RollbackRecoveryService<S, G>> {
        &self.recovery
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.retry.breaker()
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, document_id: &str) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(document_id) {
            return Err(Error::ConcurrentSync {
                document_id: document_id.to_string(),
            });
        }
        let stop = Arc::new(AtomicBool::new(false));
        in_flight.insert(document_id.to_string(), stop.clone());
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            document_id: document_id.to_string(),
            stop,
        })
    }

    fn check_request(document_id: &str, user_id: &str) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::Validation("documentId is required".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(Error::Unauthenticated);
        }
        Ok(())
    }

    fn check_circuit(&self) -> Result<()> {
        let remaining = self.breaker().remaining_cooldown();
        if self.breaker().is_open() {
            return Err(Error::CircuitOpen { remaining });
        }
        Ok(())
    }

    /// Sync every unsynced chunk of a document.
    ///
    /// Chunk failures are reported in the result. Only request-level
    /// problems are errors.
    ///
    /// # Errors
    ///
    /// - `Validation` / `Unauthenticated` for empty ids
    /// - `ConcurrentSync` if this document is already syncing
    /// - `CircuitOpen` if the remote service is being shed
    /// - store errors while loading chunks or creating the episode
    pub async fn sync_document_chunks(&self, document_id: &str, user_id: &str) -> Result<SyncBatchResult> {
        Self::check_request(document_id, user_id)?;
        let guard = self.claim(document_id)?;
        self.check_circuit()?;

        let started = Instant::now();
        let chunks = self.store.fetch_unsynced(document_id).await?;
        if chunks.is_empty() {
            debug!(document_id, "nothing to sync");
            return Ok(finish(SyncBatchResult::empty(document_id), started));
        }
        // chunks left `syncing` by an interrupted run may have used their budget
        let (exhausted, ready) = self.split_exhausted(document_id, chunks).await;
        self.start(&guard, user_id, ready, exhausted, started).await
    }

    /// Re-attempt a document's failed chunks.
    ///
    /// Chunks that already used their attempt budget are reported as
    /// non-retryable errors and left alone.
    ///
    /// # Errors
    ///
    /// Same as [`sync_document_chunks`](Self::sync_document_chunks).
    pub async fn retry_failed_chunks(&self, document_id: &str, user_id: &str) -> Result<SyncBatchResult> {
        Self::check_request(document_id, user_id)?;
        let guard = self.claim(document_id)?;
        self.check_circuit()?;

        let started = Instant::now();
        let failed = self.store.fetch_failed(document_id).await?;
        let (exhausted, retryable) = self.split_exhausted(document_id, failed).await;
        self.start(&guard, user_id, retryable, exhausted, started).await
    }

    /// Separate chunks that used their attempt budget, failing any that are
    /// not already marked `failed`.
    async fn split_exhausted(
        &self,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> (Vec<ChunkError>, Vec<ChunkRecord>) {
        let (exhausted, ready): (Vec<ChunkRecord>, Vec<ChunkRecord>) = chunks
            .into_iter()
            .partition(|c| c.sync_attempt_count >= self.batch.max_attempts);
        if exhausted.is_empty() {
            return (Vec::new(), ready);
        }

        info!(document_id, count = exhausted.len(), "skipping chunks at max attempts");
        let mut errors = Vec::with_capacity(exhausted.len());
        for chunk in exhausted {
            if chunk.sync_status != SyncStatus::Failed {
                best_effort(
                    "fail exhausted chunk",
                    self.store.update_chunk(&chunk.id, &ChunkPatch::failed(MAX_ATTEMPTS_MESSAGE)),
                )
                .await;
            }
            errors.push(ChunkError {
                chunk_id: chunk.id,
                chunk_index: chunk.chunk_index,
                message: MAX_ATTEMPTS_MESSAGE.to_string(),
                code: Some(ErrorCode::RetriesExhausted.as_str().to_string()),
                retryable: false,
            });
        }
        (errors, ready)
    }

    /// Run the orchestration over `chunks`, or report `exhausted` alone when
    /// nothing is left to attempt.
    async fn start(
        &self,
        guard: &InFlightGuard<'_>,
        user_id: &str,
        chunks: Vec<ChunkRecord>,
        exhausted: Vec<ChunkError>,
        started: Instant,
    ) -> Result<SyncBatchResult> {
        if chunks.is_empty() {
            let result = SyncBatchResult {
                total_chunks: exhausted.len(),
                failed_chunks: exhausted.len(),
                errors: exhausted,
                ..SyncBatchResult::empty(&guard.document_id)
            };
            return Ok(finish(result, started));
        }
        self.run(guard, user_id, chunks, exhausted, started).await
    }

    /// Chunk counts by status. Read-only.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_sync_status(&self, document_id: &str) -> Result<SyncStatusSnapshot> {
        let stats = self.store.get_sync_statistics(document_id).await?;
        let in_flight = self.in_flight().contains_key(document_id);
        Ok(SyncStatusSnapshot::from_statistics(document_id, &stats, in_flight))
    }

    /// Ask a running sync to start no further batches.
    ///
    /// Returns false if the document is not syncing.
    pub fn request_stop(&self, document_id: &str) -> bool {
        match self.in_flight().get(document_id) {
            Some(stop) => {
                stop.store(true, Ordering::SeqCst);
                info!(document_id, "stop requested");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let mut in_flight_documents: Vec<String> = self.in_flight().keys().cloned().collect();
        in_flight_documents.sort();
        HealthSnapshot {
            rate_limiter: self.limiter.get_usage(),
            circuit_breaker: self.breaker().snapshot(),
            in_flight_documents,
            active_episodes: self.episodes.active_count(),
            retained_checkpoints: self.recovery.retained_count(),
        }
    }

    async fn run(
        &self,
        guard: &InFlightGuard<'_>,
        user_id: &str,
        chunks: Vec<ChunkRecord>,
        prior_errors: Vec<ChunkError>,
        started: Instant,
    ) -> Result<SyncBatchResult> {
        let document_id = guard.document_id.as_str();
        let title = self.store.document_title(document_id).await?;
        let episode = self
            .episodes
            .create_or_get_episode(user_id, document_id, title.as_deref(), chunks.len())
            .await?;

        let summary = {
            let batch_id = Some(episode.metadata.batch_id.as_str());
            let mapped: Vec<_> = chunks
                .iter()
                .map(|c| self.mapper.map_chunk(c, title.as_deref(), batch_id))
                .collect();
            self.mapper.create_transformation_summary(&chunks, &mapped)
        };
        debug!(
            document_id,
            average_quality = summary.average_quality,
            low_quality = summary.low_quality_chunks,
            with_issues = summary.chunks_with_issues,
            section_coverage = summary.section_coverage,
            page_coverage = summary.page_coverage,
            "transformation summary"
        );

        let total = chunks.len();
        let batch_size = self.batch.batch_size.max(1);
        let batches: Vec<Vec<ChunkRecord>> = chunks.chunks(batch_size).map(<[ChunkRecord]>::to_vec).collect();
        let worker_count = self.batch.concurrency.max(1).min(batches.len());
        info!(
            document_id,
            episode_id = %episode.id,
            chunks = total,
            batches = batches.len(),
            workers = worker_count,
            "sync started"
        );

        let run = Arc::new(RunState {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            title,
            episode: episode.clone(),
            total,
            checkpoint_interval: self.checkpoint_interval,
            stop: guard.stop.clone(),
            circuit_tripped: AtomicBool::new(false),
            progress: Mutex::new(Progress::default()),
        });

        let (tx, rx) = mpsc::channel(batches.len());
        for index in 0..batches.len() {
            // capacity equals the batch count, so this never waits
            if tx.send(index).await.is_err() {
                break;
            }
        }
        drop(tx);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let batches = Arc::new(batches);

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let worker = ChunkWorker {
                store: self.store.clone(),
                graph: self.graph.clone(),
                limiter: self.limiter.clone(),
                retry: self.retry.clone(),
                episodes: self.episodes.clone(),
                recovery: self.recovery.clone(),
                mapper: self.mapper,
                run: run.clone(),
            };
            workers.spawn(worker.drain(queue.clone(), batches.clone()));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(document_id, error = %e, "sync worker panicked");
            }
        }

        let progress = std::mem::take(&mut *run.lock_progress());
        let stopped = run.stop.load(Ordering::SeqCst);
        let tripped = run.circuit_tripped.load(Ordering::SeqCst);
        let skipped = total.saturating_sub(progress.processed);

        let mut errors = prior_errors;
        let prior_failures = errors.len();
        errors.extend(progress.errors);

        let episode_status = if progress.failed == 0 && skipped == 0 {
            Some((EpisodeStatus::Completed, None))
        } else if progress.successful == 0 && progress.failed > 0 {
            Some((EpisodeStatus::Failed, Some(format!("all {} attempted chunks failed", progress.failed))))
        } else {
            None
        };
        if let Some((status, reason)) = episode_status {
            best_effort(
                "settle episode status",
                self.episodes.update_status(&episode.id, status, reason.as_deref()),
            )
            .await;
        }

        let phase = if tripped {
            SyncPhase::Failed
        } else if stopped && skipped > 0 {
            SyncPhase::Stopped
        } else {
            SyncPhase::Completed
        };
        let mut last_checkpoint_id = progress.last_checkpoint_id;
        if progress.processed > 0 || tripped {
            let mut state = CheckpointState::new(phase);
            state.completed_operations = progress.completed_batches;
            state.failed_operations = progress.failed_ids;
            let closing = NewCheckpoint {
                document_id: document_id.to_string(),
                episode_id: episode.id.clone(),
                processed_chunks: progress.processed,
                total_chunks: total,
                embedded_chunk_ids: progress.embedded,
                state,
                metadata: Some(serde_json::json!({
                    "successful": progress.successful,
                    "failed": progress.failed,
                    "skipped": skipped,
                    "transformation": summary,
                })),
            };
            if let Some(cp) = best_effort("closing checkpoint", self.recovery.create_checkpoint(closing)).await {
                last_checkpoint_id = Some(cp.id);
            }
        }

        let result = SyncBatchResult {
            document_id: document_id.to_string(),
            total_chunks: total + prior_failures,
            successful_chunks: progress.successful,
            failed_chunks: progress.failed + prior_failures,
            skipped_chunks: skipped,
            episode_id: Some(episode.id),
            errors,
            duration_ms: 0,
            stopped: stopped && skipped > 0,
            last_checkpoint_id,
        };
        let result = finish(result, started);
        info!(
            document_id,
            successful = result.successful_chunks,
            failed = result.failed_chunks,
            skipped = result.skipped_chunks,
            duration_ms = result.duration_ms,
            "sync finished"
        );
        Ok(result)
    }
}

fn finish(mut result: SyncBatchResult, started: Instant) -> SyncBatchResult {
    result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    result
}

/// Shared state of one sync run.
#[derive(Debug)]
struct RunState {
    document_id: String,
    user_id: String,
    title: Option<String>,
    episode: Episode,
    total: usize,
    checkpoint_interval: usize,
    stop: Arc<AtomicBool>,
    circuit_tripped: AtomicBool,
    progress: Mutex<Progress>,
}

impl RunState {
    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct Progress {
    processed: usize,
    successful: usize,
    failed: usize,
    /// Chunks written remotely during this run, in completion order.
    embedded: Vec<String>,
    failed_ids: Vec<String>,
    completed_batches: Vec<String>,
    errors: Vec<ChunkError>,
    since_checkpoint: usize,
    last_checkpoint_id: Option<String>,
}

enum ChunkOutcome {
    Synced,
    Failed(ChunkError),
    /// The breaker refused the write; the chunk was put back.
    Refused,
}

/// One pool worker. Drains batch indices until the queue is empty or the
/// run is stopped.
struct ChunkWorker<S, G> {
    store: Arc<S>,
    graph: Arc<G>,
    limiter: Arc<RateLimiter>,
    retry: RetryHandler,
    episodes: Arc<EpisodeManager<S, G>>,
    recovery: Arc<RollbackRecoveryService<S, G>>,
    mapper: MetadataMapper,
    run: Arc<RunState>,
}

impl<S: SyncStore, G: GraphClient> ChunkWorker<S, G> {
    async fn drain(
        self,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<usize>>>,
        batches: Arc<Vec<Vec<ChunkRecord>>>,
    ) {
        loop {
            if self.run.stop.load(Ordering::SeqCst) {
                break;
            }
            let next = queue.lock().await.recv().await;
            let Some(index) = next else {
                break;
            };
            let Some(batch) = batches.get(index) else {
                continue;
            };

            debug!(document_id = %self.run.document_id, batch = index, size = batch.len(), "batch started");
            for chunk in batch {
                match self.process(chunk).await {
                    ChunkOutcome::Refused => {
                        self.run.circuit_tripped.store(true, Ordering::SeqCst);
                        self.run.stop.store(true, Ordering::SeqCst);
                        warn!(
                            document_id = %self.run.document_id,
                            chunk_id = %chunk.id,
                            "circuit open, stopping sync"
                        );
                        return;
                    }
                    outcome => self.record(chunk, outcome).await,
                }
            }
            self.run.lock_progress().completed_batches.push(format!("batch-{index}"));
        }
    }

    async fn process(&self, chunk: &ChunkRecord) -> ChunkOutcome {
        let attempt = chunk.sync_attempt_count.saturating_add(1);
        if let Err(e) = self.store.update_chunk(&chunk.id, &ChunkPatch::syncing(attempt)).await {
            return ChunkOutcome::Failed(ChunkError::from_error(chunk, &e));
        }

        match self.write(chunk).await {
            Ok(external_id) => {
                if let Err(e) = self.store.update_chunk(&chunk.id, &ChunkPatch::synced(&external_id)).await {
                    return ChunkOutcome::Failed(ChunkError::from_error(chunk, &e));
                }
                best_effort(
                    "link chunk to episode",
                    self.episodes.link_chunks(&self.run.episode.id, std::slice::from_ref(&chunk.id)),
                )
                .await;
                debug!(chunk_id = %chunk.id, external_id, attempt, "chunk synced");
                ChunkOutcome::Synced
            }
            Err(Error::CircuitOpen { .. }) => {
                let restore = ChunkPatch {
                    sync_status: Some(SyncStatus::Pending),
                    sync_attempt_count: Some(chunk.sync_attempt_count),
                    ..ChunkPatch::default()
                };
                best_effort("return chunk to queue", self.store.update_chunk(&chunk.id, &restore)).await;
                ChunkOutcome::Refused
            }
            Err(e) => {
                warn!(chunk_id = %chunk.id, attempt, error = %e, "chunk sync failed");
                best_effort(
                    "mark chunk failed",
                    self.store.update_chunk(&chunk.id, &ChunkPatch::failed(&e.to_string())),
                )
                .await;
                ChunkOutcome::Failed(ChunkError::from_error(chunk, &e))
            }
        }
    }

    /// Map, validate and write one chunk through the limiter and retry handler.
    async fn write(&self, chunk: &ChunkRecord) -> Result<String> {
        let mapped = self.mapper.map_chunk(
            chunk,
            self.run.title.as_deref(),
            Some(&self.run.episode.metadata.batch_id),
        );
        if mapped.content.is_empty() {
            return Err(Error::Validation("chunk content is empty after normalization".to_string()));
        }
        let validation = self.mapper.validate_metadata(&mapped.metadata);
        if !validation.valid {
            return Err(Error::Validation(validation.errors.join("; ")));
        }
        if !validation.warnings.is_empty() {
            debug!(chunk_id = %chunk.id, warnings = ?validation.warnings, "metadata warnings");
        }

        let request = AddChunkRequest {
            user_id: self.run.user_id.clone(),
            session_id: self.run.episode.session_id.clone(),
            chunk_id: chunk.id.clone(),
            content: mapped.content,
            metadata: serde_json::to_value(&mapped.metadata)?,
        };
        let limiter = &self.limiter;
        let graph = &self.graph;
        let request = &request;
        loop {
            let written = self
                .retry
                .execute_with_retry("add chunk", || async move {
                    limiter.acquire().await;
                    graph.add_chunk(request).await
                })
                .await;
            match written {
                // half-open with every probe slot taken: wait for the verdict
                Err(Error::CircuitOpen { remaining }) if remaining.is_zero() => {
                    debug!(chunk_id = %chunk.id, "waiting for circuit probes");
                    tokio::time::sleep(PROBE_WAIT).await;
                }
                other => return other,
            }
        }
    }

    async fn record(&self, chunk: &ChunkRecord, outcome: ChunkOutcome) {
        let checkpoint = {
            let mut progress = self.run.lock_progress();
            progress.processed += 1;
            progress.since_checkpoint += 1;
            match outcome {
                ChunkOutcome::Synced => {
                    progress.successful += 1;
                    progress.embedded.push(chunk.id.clone());
                }
                ChunkOutcome::Failed(error) => {
                    progress.failed += 1;
                    progress.failed_ids.push(chunk.id.clone());
                    progress.errors.push(error);
                }
                ChunkOutcome::Refused => {}
            }

            (progress.since_checkpoint >= self.run.checkpoint_interval).then(|| {
                progress.since_checkpoint = 0;
                let mut state = CheckpointState::new(SyncPhase::Syncing);
                state.completed_operations = progress.completed_batches.clone();
                state.failed_operations = progress.failed_ids.clone();
                NewCheckpoint {
                    document_id: self.run.document_id.clone(),
                    episode_id: self.run.episode.id.clone(),
                    processed_chunks: progress.processed,
                    total_chunks: self.run.total,
                    embedded_chunk_ids: progress.embedded.clone(),
                    state,
                    metadata: None,
                }
            })
        };

        if let Some(new) = checkpoint {
            if let Some(cp) = best_effort("periodic checkpoint", self.recovery.create_checkpoint(new)).await {
                self.run.lock_progress().last_checkpoint_id = Some(cp.id);
            }
        }
    }
}

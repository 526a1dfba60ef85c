//! Configuration management.
//!
//! Settings live in `~/.chunksync/config.json`. Every field has a default,
//! so a missing file or a partial file is valid. Environment variables
//! override the file; CLI flags override both where a flag exists.
//!
//! The database path resolves separately through [`resolve_db_path`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Token bucket settings for outbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size.
    pub capacity: u32,
    /// Published per-minute limit of the remote service.
    pub provider_limit_per_minute: u32,
    /// Fraction of the provider limit left unused, in `[0, 1)`.
    pub headroom: f64,
    /// Explicit refill rate. When unset it derives from the provider limit.
    pub refill_per_minute: Option<f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            provider_limit_per_minute: 60,
            headroom: 0.5,
            refill_per_minute: None,
        }
    }
}

impl RateLimitConfig {
    /// Tokens added per minute.
    #[must_use]
    pub fn effective_refill_per_minute(&self) -> f64 {
        self.refill_per_minute
            .unwrap_or_else(|| f64::from(self.provider_limit_per_minute) * (1.0 - self.headroom))
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Probes admitted while half-open; this many successes close the circuit.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_requests: 2,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Batch orchestration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Number of workers pulling batches.
    pub concurrency: usize,
    /// Per-chunk attempt budget across sync calls.
    pub max_attempts: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            concurrency: 5,
            max_attempts: 3,
        }
    }
}

/// Active-episode registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl EpisodeConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Checkpoint cadence and retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Take a checkpoint every N processed chunks.
    pub interval: usize,
    pub max_checkpoints: usize,
    pub retention_hours: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: 50,
            max_checkpoints: 100,
            retention_hours: 24,
        }
    }
}

impl CheckpointConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

/// Hosted memory graph connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.getzep.com".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Embedding provider connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    /// Expected vector width. Falls back to the model's known width.
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: None,
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub batch: BatchConfig,
    pub episode: EpisodeConfig,
    pub checkpoint: CheckpointConfig,
    pub graph: GraphConfig,
    pub embeddings: EmbeddingConfig,
}

impl SyncConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Empty and unparseable values are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            lookup(name).and_then(|v| v.trim().parse().ok())
        }
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = parsed(&lookup, "CHUNKSYNC_BATCH_SIZE") {
            self.batch.batch_size = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNKSYNC_CONCURRENCY") {
            self.batch.concurrency = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNKSYNC_MAX_ATTEMPTS") {
            self.batch.max_attempts = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNKSYNC_CHECKPOINT_INTERVAL") {
            self.checkpoint.interval = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNKSYNC_PROVIDER_LIMIT") {
            self.rate_limit.provider_limit_per_minute = v;
        }
        if let Some(v) = text("ZEP_API_URL") {
            self.graph.base_url = v;
        }
        if let Some(v) = text("ZEP_API_KEY") {
            self.graph.api_key = Some(v);
        }
        if let Some(v) = text("OLLAMA_ENDPOINT") {
            self.embeddings.endpoint = v;
        }
        if let Some(v) = text("OLLAMA_MODEL") {
            self.embeddings.model = v;
        }
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(Error::Config("batch.batch_size must be at least 1".into()));
        }
        if self.batch.concurrency == 0 {
            return Err(Error::Config("batch.concurrency must be at least 1".into()));
        }
        if self.batch.max_attempts == 0 {
            return Err(Error::Config("batch.max_attempts must be at least 1".into()));
        }
        if self.rate_limit.capacity == 0 {
            return Err(Error::Config("rate_limit.capacity must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.rate_limit.headroom) {
            return Err(Error::Config("rate_limit.headroom must be in [0, 1)".into()));
        }
        if self.rate_limit.effective_refill_per_minute() <= 0.0 {
            return Err(Error::Config("rate limiter refill rate must be positive".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be at least 1.0".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.half_open_requests == 0 {
            return Err(Error::Config(
                "circuit_breaker thresholds must be at least 1".into(),
            ));
        }
        if self.checkpoint.interval == 0 || self.checkpoint.max_checkpoints == 0 {
            return Err(Error::Config("checkpoint interval and cap must be at least 1".into()));
        }
        Ok(())
    }
}

/// Get the global chunksync directory (`~/.chunksync/`).
#[must_use]
pub fn global_chunksync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".chunksync"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `CHUNKSYNC_DB` environment variable
/// 3. Global location: `~/.chunksync/data/chunksync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("CHUNKSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_chunksync_dir().map(|dir| dir.join("data").join("chunksync.db"))
}

/// Get the config file path.
fn config_path() -> Result<PathBuf> {
    global_chunksync_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or(Error::Config("Could not determine home directory".into()))
}

/// Load configuration from a specific file. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Load the configuration file from `~/.chunksync/config.json`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config() -> Result<SyncConfig> {
    load_config_from(&config_path()?)
}

/// Load the file, apply environment overrides, and validate.
///
/// # Errors
///
/// Returns an error if loading fails or the merged settings are invalid.
pub fn resolve_config() -> Result<SyncConfig> {
    let mut config = load_config()?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Save the configuration file.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_config(config: &SyncConfig) -> Result<PathBuf> {
    let path = config_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(&path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))?;

    Ok(path)
}

/// Get the default user id for sync attribution.
///
/// Priority:
/// 1. `CHUNKSYNC_USER` environment variable
/// 2. System username
/// 3. "local"
#[must_use]
pub fn default_user() -> String {
    if let Ok(user) = std::env::var("CHUNKSYNC_USER") {
        if !user.is_empty() {
            return user;
        }
    }

    if let Ok(user) = std::env::var("USER") {
        if !user.is_empty() {
            return user;
        }
    }

    "local".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch.batch_size, 20);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.batch.max_attempts, 3);
        assert_eq!(config.rate_limit.capacity, 10);
        assert!((config.rate_limit.effective_refill_per_minute() - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout(), Duration::from_secs(60));
        assert_eq!(config.episode.ttl(), Duration::from_secs(600));
        assert_eq!(config.checkpoint.interval, 50);
        assert_eq!(config.checkpoint.retention(), Duration::from_secs(24 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"batch": {"batch_size": 5}, "retry": {"max_retries": 1}}"#)
                .unwrap();
        assert_eq!(config.batch.batch_size, 5);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_ms, 1_000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHUNKSYNC_BATCH_SIZE", "7"),
            ("CHUNKSYNC_CONCURRENCY", "not-a-number"),
            ("ZEP_API_KEY", "secret"),
            ("OLLAMA_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_env_with(|name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.batch.batch_size, 7);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.graph.api_key.as_deref(), Some("secret"));
        assert_eq!(config.embeddings.model, "nomic-embed-text");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.batch.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = SyncConfig::default();
        config.rate_limit.headroom = 1.0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }
}

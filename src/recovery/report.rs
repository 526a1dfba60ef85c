//! Error categorization and remediation advice.

use crate::sync::ChunkError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Broad cause of a chunk failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    RateLimit,
    Validation,
    Memory,
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Memory => "memory",
            Self::Unknown => "unknown",
        }
    }

    /// Classify an error by code first, then by message text.
    #[must_use]
    pub fn classify(error: &ChunkError) -> Self {
        let message = error.message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        match error.code.as_deref() {
            Some("RATE_LIMITED") => return Self::RateLimit,
            Some("VALIDATION_FAILED") => return Self::Validation,
            _ => {}
        }

        if has(&["rate limit", "too many requests", "429"]) {
            Self::RateLimit
        } else if has(&["timeout", "timed out", "deadline"]) {
            Self::Timeout
        } else if has(&["connection", "network", "econnreset", "socket", "dns", "server error", "circuit"]) {
            Self::Network
        } else if has(&["validation", "invalid", "malformed", "corrupted", "empty"]) {
            Self::Validation
        } else if has(&["memory", "heap", "allocation", "oom"]) {
            Self::Memory
        } else {
            Self::Unknown
        }
    }
}

/// Failure breakdown for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub document_id: String,
    pub total_errors: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    /// Up to three chunk ids per category.
    pub samples: BTreeMap<ErrorCategory, Vec<String>>,
    pub recommendations: Vec<String>,
    pub generated_at: String,
}

impl ErrorReport {
    #[must_use]
    pub fn count(&self, category: ErrorCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    /// Most frequent category, if any errors were reported.
    #[must_use]
    pub fn dominant(&self) -> Option<ErrorCategory> {
        self.by_category
            .iter()
            .max_by_key(|(category, count)| (**count, std::cmp::Reverse(**category)))
            .map(|(category, _)| *category)
    }
}

const SAMPLES_PER_CATEGORY: usize = 3;

/// Bucket `errors` and derive recommendations.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn generate_error_report(document_id: &str, errors: &[ChunkError]) -> ErrorReport {
    let mut by_category: BTreeMap<ErrorCategory, usize> = BTreeMap::new();
    let mut samples: BTreeMap<ErrorCategory, Vec<String>> = BTreeMap::new();

    for error in errors {
        let category = ErrorCategory::classify(error);
        *by_category.entry(category).or_default() += 1;
        let bucket = samples.entry(category).or_default();
        if bucket.len() < SAMPLES_PER_CATEGORY {
            bucket.push(error.chunk_id.clone());
        }
    }

    let total = errors.len();
    let share = |category: ErrorCategory| {
        if total == 0 {
            0.0
        } else {
            by_category.get(&category).copied().unwrap_or(0) as f64 / total as f64
        }
    };

    let mut recommendations = Vec::new();
    if share(ErrorCategory::RateLimit) > 0.3 {
        recommendations.push(
            "Rate limiting dominates: reduce batch.concurrency or rate_limit.provider_limit_per_minute".to_string(),
        );
    }
    if share(ErrorCategory::Timeout) > 0.2 {
        recommendations.push(
            "Frequent timeouts: raise graph.timeout_secs or split oversized chunks".to_string(),
        );
    }
    if share(ErrorCategory::Network) > 0.2 {
        recommendations.push(
            "Network failures: check connectivity to the memory service and wait for the circuit breaker to close".to_string(),
        );
    }
    if share(ErrorCategory::Validation) > 0.0 {
        recommendations.push(
            "Validation failures: inspect the listed chunks and mark persistent offenders with `chunksync chunks corrupt`".to_string(),
        );
    }
    if share(ErrorCategory::Memory) > 0.0 {
        recommendations.push("Memory pressure: reduce batch.batch_size".to_string());
    }
    if share(ErrorCategory::Unknown) > 0.5 {
        recommendations.push("Most errors are unclassified: review logs with RUST_LOG=chunksync=debug".to_string());
    }

    ErrorReport {
        document_id: document_id.to_string(),
        total_errors: total,
        by_category,
        samples,
        recommendations,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

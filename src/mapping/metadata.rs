//! Metadata mapping and quality scoring.
//!
//! # Quality score
//!
//! Starts at `1.0` and is clamped to `[0.1, 2.0]`:
//!
//! | Condition                                  | Adjustment |
//! |--------------------------------------------|------------|
//! | fewer than 20 words                        | -0.3       |
//! | more than 1000 words                       | -0.2       |
//! | named entities, dates or emails present    | +0.2       |
//! | section heading present                    | +0.15      |
//! | replacement or control characters in input | -0.4       |

use crate::model::ChunkRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

pub const MIN_QUALITY: f64 = 0.1;
pub const MAX_QUALITY: f64 = 2.0;

const LOW_QUALITY_THRESHOLD: f64 = 0.5;
const OVERSIZED_CHARS: u32 = 10_000;
const LONG_LINE_CHARS: usize = 500;

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid space-run regex"));
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank-run regex"));
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpage\s+(\d{1,5})\b").expect("valid page regex"));
static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:section|chapter|part|appendix)\b|^\d+(?:\.\d+)*\.?\s+\S")
        .expect("valid section regex")
});
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b",
        r"|\b\d{4}-\d{2}-\d{2}\b",
        r"|\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}\b",
        r"|[\w.+-]+@[\w-]+\.[\w.]+",
    ))
    .expect("valid entity regex")
});
static REPEATED_FILLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{10,}|_{10,}").expect("valid filler regex"));

/// How a page number was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    /// Read from a "Page N" heading.
    Explicit,
    /// Derived from the chunk position.
    Estimated,
}

/// Metadata attached to a chunk when it is written remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: u32,
    pub document_id: String,
    pub original_chunk_id: String,
    pub word_count: u32,
    pub character_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_with_previous: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_with_next: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub page_number: u32,
    pub page_source: PageSource,
    pub has_entities: bool,
    pub quality_score: f64,
    /// SHA-256 of the normalized content.
    pub content_hash: String,
    /// RFC 3339.
    pub processing_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_issues: Vec<String>,
}

/// Normalized content plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Result of [`MetadataMapper::validate_metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Advisory only; never make the metadata invalid.
    pub warnings: Vec<String>,
}

/// Aggregate view over a mapped set of chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationSummary {
    pub total_chunks: usize,
    pub mapped_chunks: usize,
    pub total_words: u64,
    pub average_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    pub low_quality_chunks: usize,
    pub chunks_with_sections: usize,
    pub chunks_with_explicit_pages: usize,
    pub chunks_with_issues: usize,
    /// Fraction of mapped chunks carrying a section title.
    pub section_coverage: f64,
    /// Fraction of mapped chunks with an explicit page number.
    pub page_coverage: f64,
}

/// Strip null, replacement and control characters (keeping newlines and
/// tabs), collapse runs of spaces, and cap blank lines at one.
#[must_use]
pub fn normalize_content(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !is_stripped(*c)).collect();
    let collapsed = SPACE_RUN.replace_all(&cleaned, " ");
    let trimmed_lines: Vec<&str> = collapsed.lines().map(str::trim_end).collect();
    let joined = trimmed_lines.join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

fn is_stripped(c: char) -> bool {
    c == '\u{FFFD}' || (c.is_control() && c != '\n' && c != '\t')
}

/// Characters that signal a damaged extraction. Carriage returns are benign.
fn is_suspicious(c: char) -> bool {
    c == '\u{FFFD}' || (c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
}

fn clean_heading(heading: &str) -> &str {
    heading.trim().trim_start_matches('#').trim()
}

/// Maps raw chunks into remote payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataMapper;

impl MetadataMapper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalize a chunk's content and build its metadata.
    #[must_use]
    pub fn map_chunk(
        &self,
        chunk: &ChunkRecord,
        document_title: Option<&str>,
        batch_id: Option<&str>,
    ) -> MappedChunk {
        let content = normalize_content(&chunk.content);
        let word_count = u32::try_from(content.split_whitespace().count()).unwrap_or(u32::MAX);
        let character_count = u32::try_from(content.chars().count()).unwrap_or(u32::MAX);

        let section_title = Self::section_title(&chunk.headings);
        let (page_number, page_source) = Self::page_number(&chunk.headings, chunk.chunk_index);
        let has_entities = ENTITY.is_match(&content);
        let has_bad_chars = chunk.content.chars().any(is_suspicious);

        let quality_score =
            Self::quality_score(word_count, has_entities, section_title.is_some(), has_bad_chars);
        let content_issues = Self::detect_issues(&chunk.content, word_count);

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let content_hash = format!("{:x}", hasher.finalize());

        MappedChunk {
            metadata: ChunkMetadata {
                chunk_index: chunk.chunk_index,
                document_id: chunk.document_id.clone(),
                original_chunk_id: chunk.id.clone(),
                word_count,
                character_count,
                overlap_with_previous: chunk.overlap_with_previous,
                overlap_with_next: chunk.overlap_with_next,
                section_title,
                page_number,
                page_source,
                has_entities,
                quality_score,
                content_hash,
                processing_timestamp: chrono::Utc::now().to_rfc3339(),
                document_title: document_title.map(ToString::to_string),
                batch_id: batch_id.map(ToString::to_string),
                content_issues,
            },
            content,
        }
    }

    /// First heading that looks like a section marker, else the first heading.
    fn section_title(headings: &[String]) -> Option<String> {
        let cleaned: Vec<&str> = headings
            .iter()
            .map(|h| clean_heading(h))
            .filter(|h| !h.is_empty() && !PAGE_MARKER.is_match(h))
            .collect();
        cleaned
            .iter()
            .find(|h| SECTION_HEADING.is_match(h))
            .or_else(|| cleaned.first())
            .map(|h| (*h).to_string())
    }

    /// "Page N" from the headings, else `ceil((chunk_index + 1) / 2)`.
    fn page_number(headings: &[String], chunk_index: u32) -> (u32, PageSource) {
        headings
            .iter()
            .find_map(|h| {
                PAGE_MARKER
                    .captures(h)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
            })
            .map_or_else(
                || (chunk_index.saturating_add(1).div_ceil(2), PageSource::Estimated),
                |page| (page, PageSource::Explicit),
            )
    }

    /// Score a chunk. The result is always within `[MIN_QUALITY, MAX_QUALITY]`.
    #[must_use]
    pub fn quality_score(word_count: u32, has_entities: bool, has_section: bool, has_bad_chars: bool) -> f64 {
        let mut score: f64 = 1.0;
        if word_count < 20 {
            score -= 0.3;
        }
        if word_count > 1000 {
            score -= 0.2;
        }
        if has_entities {
            score += 0.2;
        }
        if has_section {
            score += 0.15;
        }
        if has_bad_chars {
            score -= 0.4;
        }
        score.clamp(MIN_QUALITY, MAX_QUALITY)
    }

    fn detect_issues(raw: &str, word_count: u32) -> Vec<String> {
        let mut issues = Vec::new();

        let garbled = raw.chars().filter(|c| *c == '\u{FFFD}').count();
        if garbled > 0 {
            issues.push(format!("Encoding issues detected ({garbled} garbled characters)"));
        }
        if raw.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r')) {
            issues.push("Control characters in content".to_string());
        }
        if REPEATED_FILLER.is_match(raw) {
            issues.push("Excessive repeated characters (possible OCR error)".to_string());
        }
        if word_count < 10 {
            issues.push("Very low word count (possible extraction failure)".to_string());
        }
        if raw.lines().any(|l| l.chars().count() > LONG_LINE_CHARS) {
            issues.push("Excessively long lines (possible formatting issue)".to_string());
        }
        issues
    }

    /// Check required fields and collect advisory warnings.
    #[must_use]
    pub fn validate_metadata(&self, metadata: &ChunkMetadata) -> MetadataValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if metadata.document_id.trim().is_empty() {
            errors.push("Missing required field: document_id".to_string());
        }
        if metadata.original_chunk_id.trim().is_empty() {
            errors.push("Missing required field: original_chunk_id".to_string());
        }
        if metadata.processing_timestamp.trim().is_empty() {
            errors.push("Missing required field: processing_timestamp".to_string());
        } else if chrono::DateTime::parse_from_rfc3339(&metadata.processing_timestamp).is_err() {
            errors.push(format!(
                "Invalid processing_timestamp: {}",
                metadata.processing_timestamp
            ));
        }
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&metadata.quality_score) {
            errors.push(format!("Quality score out of range: {}", metadata.quality_score));
        }

        if metadata.quality_score < LOW_QUALITY_THRESHOLD {
            warnings.push(format!("Low quality score: {:.2}", metadata.quality_score));
        }
        if metadata.word_count < 10 {
            warnings.push(format!("Very low word count: {}", metadata.word_count));
        }
        if metadata.character_count > OVERSIZED_CHARS {
            warnings.push(format!("Oversized chunk: {} characters", metadata.character_count));
        }
        if metadata.section_title.is_none() {
            warnings.push("Missing section context".to_string());
        }
        if metadata.page_source == PageSource::Estimated {
            warnings.push("Missing page context (page number estimated)".to_string());
        }
        warnings.extend(metadata.content_issues.iter().cloned());

        MetadataValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Summarize a mapping pass over `chunks`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn create_transformation_summary(
        &self,
        chunks: &[ChunkRecord],
        mapped: &[MappedChunk],
    ) -> TransformationSummary {
        let mut summary = TransformationSummary {
            total_chunks: chunks.len(),
            mapped_chunks: mapped.len(),
            ..TransformationSummary::default()
        };
        if mapped.is_empty() {
            return summary;
        }

        let mut quality_sum = 0.0;
        summary.min_quality = f64::MAX;
        summary.max_quality = f64::MIN;
        for m in mapped {
            let meta = &m.metadata;
            summary.total_words += u64::from(meta.word_count);
            quality_sum += meta.quality_score;
            summary.min_quality = summary.min_quality.min(meta.quality_score);
            summary.max_quality = summary.max_quality.max(meta.quality_score);
            if meta.quality_score < LOW_QUALITY_THRESHOLD {
                summary.low_quality_chunks += 1;
            }
            if meta.section_title.is_some() {
                summary.chunks_with_sections += 1;
            }
            if meta.page_source == PageSource::Explicit {
                summary.chunks_with_explicit_pages += 1;
            }
            if !meta.content_issues.is_empty() {
                summary.chunks_with_issues += 1;
            }
        }

        let n = mapped.len() as f64;
        summary.average_quality = quality_sum / n;
        summary.section_coverage = summary.chunks_with_sections as f64 / n;
        summary.page_coverage = summary.chunks_with_explicit_pages as f64 / n;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["lorem"; n].join(" ")
    }

    #[test]
    fn test_normalize_collapses_and_strips() {
        let raw = "Hello\u{0}   world\u{FFFD}\r\n\n\n\n  next   line  \n\n\n";
        assert_eq!(normalize_content(raw), "Hello world\n\n next line");
    }

    #[test]
    fn test_quality_score_bounds_on_extremes() {
        let mapper = MetadataMapper::new();

        let empty = mapper.map_chunk(&ChunkRecord::new("c0", "d", "", 0), None, None);
        let huge = mapper.map_chunk(&ChunkRecord::new("c1", "d", &words(50_000), 1), None, None);
        let malformed = mapper.map_chunk(
            &ChunkRecord::new("c2", "d", "\u{0}\u{FFFD}\u{7}\u{FFFD}", 2),
            None,
            None,
        );

        for mapped in [&empty, &huge, &malformed] {
            let q = mapped.metadata.quality_score;
            assert!((MIN_QUALITY..=MAX_QUALITY).contains(&q), "score {q} out of range");
        }
        assert!((empty.metadata.quality_score - 0.7).abs() < 1e-9);
        assert!((huge.metadata.quality_score - 0.8).abs() < 1e-9);
        assert!((malformed.metadata.quality_score - 0.3).abs() < 1e-9);
        assert!(malformed.content.is_empty());
    }

    #[test]
    fn test_quality_score_clamps() {
        assert!((MetadataMapper::quality_score(0, false, false, true) - 0.3).abs() < 1e-9);
        assert!((MetadataMapper::quality_score(50, true, true, false) - 1.35).abs() < 1e-9);
    }

    #[test]
    fn test_section_and_page_extraction() {
        let mapper = MetadataMapper::new();
        let chunk = ChunkRecord::new("c1", "doc", &words(30), 4)
            .with_headings(&["# Handbook", "## Section 3: Safety", "Page 12"]);
        let meta = mapper.map_chunk(&chunk, Some("Handbook"), Some("b1")).metadata;
        assert_eq!(meta.section_title.as_deref(), Some("Section 3: Safety"));
        assert_eq!(meta.page_number, 12);
        assert_eq!(meta.page_source, PageSource::Explicit);
        assert_eq!(meta.document_title.as_deref(), Some("Handbook"));
        assert!((meta.quality_score - 1.15).abs() < 1e-9);
    }

    #[test]
    fn test_page_estimate_and_first_heading_fallback() {
        let mapper = MetadataMapper::new();
        let chunk = ChunkRecord::new("c1", "doc", "short", 4).with_headings(&["Intro", "Background"]);
        let meta = mapper.map_chunk(&chunk, None, None).metadata;
        assert_eq!(meta.section_title.as_deref(), Some("Intro"));
        assert_eq!((meta.page_number, meta.page_source), (3, PageSource::Estimated));

        let first = ChunkRecord::new("c0", "doc", "short", 0);
        assert_eq!(mapper.map_chunk(&first, None, None).metadata.page_number, 1);
    }

    #[test]
    fn test_entities_detected() {
        let mapper = MetadataMapper::new();
        let chunk = ChunkRecord::new("c1", "doc", "Contact jane@example.com about the 2024-03-01 review.", 0);
        assert!(mapper.map_chunk(&chunk, None, None).metadata.has_entities);

        let plain = ChunkRecord::new("c2", "doc", "nothing notable here at all", 0);
        assert!(!mapper.map_chunk(&plain, None, None).metadata.has_entities);
    }

    #[test]
    fn test_validation_errors_and_warnings() {
        let mapper = MetadataMapper::new();
        let mut meta = mapper
            .map_chunk(&ChunkRecord::new("c1", "doc", "tiny", 0), None, None)
            .metadata;

        let result = mapper.validate_metadata(&meta);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("word count")));
        assert!(result.warnings.iter().any(|w| w.contains("section")));

        meta.document_id.clear();
        meta.processing_timestamp = "yesterday".into();
        let result = mapper.validate_metadata(&meta);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_content_issues_detected() {
        let mapper = MetadataMapper::new();
        let raw = format!("Contents.............. 4\n{}", "x".repeat(600));
        let meta = mapper.map_chunk(&ChunkRecord::new("c1", "doc", &raw, 0), None, None).metadata;
        assert!(meta.content_issues.iter().any(|i| i.contains("repeated")));
        assert!(meta.content_issues.iter().any(|i| i.contains("long lines")));
    }

    #[test]
    fn test_transformation_summary() {
        let mapper = MetadataMapper::new();
        let chunks = vec![
            ChunkRecord::new("a", "doc", &words(30), 0).with_headings(&["Section 1"]),
            ChunkRecord::new("b", "doc", "tiny", 1).with_headings(&["Page 2"]),
        ];
        let mapped: Vec<_> = chunks.iter().map(|c| mapper.map_chunk(c, None, None)).collect();
        let summary = mapper.create_transformation_summary(&chunks, &mapped);

        assert_eq!(summary.total_chunks, 2);
        assert_eq!(summary.mapped_chunks, 2);
        assert_eq!(summary.total_words, 31);
        assert_eq!(summary.chunks_with_sections, 1);
        assert_eq!(summary.chunks_with_explicit_pages, 1);
        assert!((summary.section_coverage - 0.5).abs() < 1e-9);
        assert!((summary.min_quality - 0.7).abs() < 1e-9);
        assert!((summary.max_quality - 1.15).abs() < 1e-9);
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = MetadataMapper::new().create_transformation_summary(&[], &[]);
        assert_eq!(summary, TransformationSummary::default());
    }
}

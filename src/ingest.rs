//! JSONL loader for upstream chunker output.
//!
//! Each non-blank line is one [`ChunkRecord`] in camelCase JSON. Counts left
//! at zero are derived from the content.

use crate::error::{Error, Result};
use crate::model::ChunkRecord;
use crate::storage::{IngestStats, SqliteStorage};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Read all chunk records from a JSONL file.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist or cannot be read
/// - Any line is not a valid chunk record (the line number is reported)
pub fn read_chunk_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    if !path.exists() {
        return Err(Error::InvalidArgument(format!("file not found: {}", path.display())));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let mut record: ChunkRecord = serde_json::from_str(&line).map_err(|e| {
            Error::Validation(format!("{}:{}: invalid chunk record: {e}", path.display(), line_num + 1))
        })?;
        record.fill_missing_counts();
        records.push(record);
    }

    Ok(records)
}

/// Result of [`ingest_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestSummary {
    pub documents: Vec<String>,
    pub stats: IngestStats,
}

/// Load a JSONL file into the system of record.
///
/// `title` is applied to every document in the file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the storage writes fail.
/// Nothing is written when any record is invalid.
pub fn ingest_file(
    storage: &mut SqliteStorage,
    path: &Path,
    title: Option<&str>,
    actor: &str,
) -> Result<IngestSummary> {
    let records = read_chunk_records(path)?;
    let documents: BTreeSet<&str> = records.iter().map(|r| r.document_id.as_str()).collect();
    let source = path.display().to_string();

    let stats = storage.ingest_chunks(&records, actor)?;
    for document_id in &documents {
        storage.upsert_document(document_id, title, Some(&source), actor)?;
    }

    info!(
        path = %source,
        documents = documents.len(),
        inserted = stats.inserted,
        updated = stats.updated,
        unchanged = stats.unchanged,
        "ingested chunks"
    );
    Ok(IngestSummary {
        documents: documents.into_iter().map(ToString::to_string).collect(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MetadataMapper;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_reads_records_and_fills_counts() {
        let file = write_lines(&[
            r#"{"id":"c0","documentId":"doc1","content":"one two three","chunkIndex":0}"#,
            "",
            r#"{"id":"c1","documentId":"doc1","content":"four","chunkIndex":1,"headings":["Intro"]}"#,
        ]);
        let records = read_chunk_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].word_count, 3);
        assert_eq!(records[1].headings, vec!["Intro"]);
    }

    #[test]
    fn test_heading_trail_string_feeds_section_and_page() {
        let file = write_lines(&[
            r##"{"id":"c0","documentId":"doc1","content":"Dock doors open at six.","chunkIndex":3,"headings":"# Handbook\n## Section 3\nPage 12"}"##,
        ]);
        let records = read_chunk_records(file.path()).unwrap();
        assert_eq!(records[0].headings, vec!["# Handbook", "## Section 3", "Page 12"]);

        let meta = MetadataMapper::new().map_chunk(&records[0], None, None).metadata;
        assert_eq!(meta.section_title.as_deref(), Some("Section 3"));
        assert_eq!(meta.page_number, 12);
    }

    #[test]
    fn test_invalid_line_reports_line_number() {
        let file = write_lines(&[
            r#"{"id":"c0","documentId":"doc1","content":"ok","chunkIndex":0}"#,
            r#"{"id":"c1""#,
        ]);
        let err = read_chunk_records(file.path()).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains(":2:")));
    }

    #[test]
    fn test_missing_file() {
        let err = read_chunk_records(Path::new("/nonexistent/chunks.jsonl")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_ingest_file_is_idempotent() {
        let file = write_lines(&[
            r#"{"id":"a-0","documentId":"a","content":"alpha","chunkIndex":0}"#,
            r#"{"id":"b-0","documentId":"b","content":"beta","chunkIndex":0}"#,
        ]);
        let mut storage = SqliteStorage::open_memory().unwrap();

        let first = ingest_file(&mut storage, file.path(), Some("Manual"), "test").unwrap();
        assert_eq!(first.documents, vec!["a", "b"]);
        assert_eq!(first.stats.inserted, 2);

        let second = ingest_file(&mut storage, file.path(), None, "test").unwrap();
        assert_eq!(second.stats.unchanged, 2);
        let doc = storage.get_document("a").unwrap().unwrap();
        assert_eq!(doc.title.as_deref(), Some("Manual"));
    }
}

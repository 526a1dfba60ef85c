//! Ingest command implementation.

use super::Context;
use crate::error::Result;
use crate::ingest::ingest_file;
use crate::storage::SqliteStorage;
use colored::Colorize;
use std::path::Path;

/// Load a JSONL file of chunk records.
///
/// # Errors
///
/// Returns an error if the database is missing or the file is invalid.
pub fn execute(ctx: &Context, file: &Path, title: Option<&str>) -> Result<()> {
    let mut storage = SqliteStorage::open(&ctx.db_path()?)?;
    let summary = ingest_file(&mut storage, file, title, &ctx.user())?;

    ctx.emit(&summary, |s| {
        println!(
            "{} {} new, {} changed, {} unchanged",
            "Ingested:".green(),
            s.stats.inserted,
            s.stats.updated,
            s.stats.unchanged
        );
        for document in &s.documents {
            println!("  {document}");
        }
    })
}

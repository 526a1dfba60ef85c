//! Status command implementation.

use super::Context;
use crate::error::{Error, Result};
use crate::model::SyncStatistics;
use crate::storage::SqliteStorage;
use crate::sync::SyncStatusSnapshot;
use colored::Colorize;

/// Show chunk counts by status for one document.
///
/// Reads the database only; no sync runs in this process, so `in_flight`
/// is always false.
///
/// # Errors
///
/// Returns `Error::DocumentNotFound` if the document has no chunks.
pub fn execute(ctx: &Context, document_id: &str) -> Result<()> {
    let storage = SqliteStorage::open(&ctx.db_path()?)?;
    let stats: SyncStatistics = storage.sync_statistics(document_id)?;
    if stats.total == 0 {
        return Err(Error::DocumentNotFound {
            id: document_id.to_string(),
        });
    }
    let snapshot = SyncStatusSnapshot::from_statistics(document_id, &stats, false);

    ctx.emit(&snapshot, |s| {
        println!("{} {}", "Document:".bold(), s.document_id);
        println!("  Total:    {}", s.total_chunks);
        println!("  Synced:   {}", s.synced_chunks.to_string().green());
        println!("  Pending:  {}", s.pending_chunks);
        println!("  Syncing:  {}", s.syncing_chunks.to_string().yellow());
        println!("  Failed:   {}", s.failed_chunks.to_string().red());
        println!("  Progress: {:.1}%", s.progress_percent);
    })
}

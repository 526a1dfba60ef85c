//! Sync command implementation.

use super::{block_on, Context};
use crate::error::Result;
use crate::sync::SyncBatchResult;
use colored::Colorize;

/// Sync a document, or re-attempt its failed chunks with `retry`.
///
/// # Errors
///
/// Returns an error if the graph service is not configured, the document is
/// already syncing, or the circuit is open. Individual chunk failures are
/// reported in the output.
pub fn execute(ctx: &Context, document_id: &str, retry: bool) -> Result<()> {
    block_on(async {
        let services = ctx.services().await?;
        services.graph.client()?;
        let user = ctx.user();

        let result = if retry {
            services.service.retry_failed_chunks(document_id, &user).await?
        } else {
            services.service.sync_document_chunks(document_id, &user).await?
        };
        ctx.emit(&result, print_result)
    })
}

fn print_result(result: &SyncBatchResult) {
    if result.total_chunks == 0 {
        println!("Nothing to sync for {}", result.document_id);
        return;
    }

    let headline = if result.is_clean() {
        "Synced".green()
    } else {
        "Partially synced".yellow()
    };
    println!(
        "{} {}: {}/{} chunks in {}ms",
        headline, result.document_id, result.successful_chunks, result.total_chunks, result.duration_ms
    );
    if let Some(episode) = &result.episode_id {
        println!("  Episode:    {episode}");
    }
    if let Some(checkpoint) = &result.last_checkpoint_id {
        println!("  Checkpoint: {checkpoint}");
    }
    if result.skipped_chunks > 0 {
        println!("  Skipped:    {} (run stopped early)", result.skipped_chunks);
    }
    if result.failed_chunks > 0 {
        println!("  {} {}", "Failed:".red(), result.failed_chunks);
        for error in &result.errors {
            let marker = if error.retryable { "retryable" } else { "fatal" };
            println!(
                "    #{} {} [{}] {}",
                error.chunk_index,
                error.chunk_id,
                marker.dimmed(),
                error.message
            );
        }
    }
}

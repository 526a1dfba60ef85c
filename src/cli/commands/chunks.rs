//! Chunk maintenance commands.

use super::{block_on, Context};
use crate::cli::ChunkCommands;
use crate::error::Result;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct CorruptOutput {
    requested: usize,
    marked: usize,
    reason: String,
}

/// Execute chunk commands.
///
/// # Errors
///
/// Returns an error if the database is missing or a write fails.
pub fn execute(ctx: &Context, command: &ChunkCommands) -> Result<()> {
    match command {
        ChunkCommands::Corrupt { ids, reason } => block_on(async {
            let services = ctx.services().await?;
            let marked = services.recovery().mark_chunks_as_corrupted(ids, reason).await?;
            let output = CorruptOutput {
                requested: ids.len(),
                marked,
                reason: reason.clone(),
            };
            ctx.emit(&output, |o| {
                println!("{} {} of {} chunks as corrupted", "Marked".yellow(), o.marked, o.requested);
                if o.marked < o.requested {
                    println!("  {} unknown ids were skipped", o.requested - o.marked);
                }
            })
        }),
    }
}

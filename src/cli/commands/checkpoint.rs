//! Checkpoint command implementations.

use super::{block_on, preview_ids, Context};
use crate::cli::CheckpointCommands;
use crate::error::Result;
use crate::model::Checkpoint;
use crate::recovery::{ResumptionPlan, RollbackResult};
use colored::Colorize;
use serde::Serialize;

/// Output for checkpoint list.
#[derive(Serialize)]
struct CheckpointListOutput {
    checkpoints: Vec<CheckpointInfo>,
    count: usize,
}

#[derive(Serialize)]
struct CheckpointInfo {
    id: String,
    document_id: String,
    phase: String,
    processed_chunks: usize,
    total_chunks: usize,
    timestamp: i64,
}

impl From<&Checkpoint> for CheckpointInfo {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            id: cp.id.clone(),
            document_id: cp.document_id.clone(),
            phase: cp.state.phase.as_str().to_string(),
            processed_chunks: cp.processed_chunks,
            total_chunks: cp.total_chunks,
            timestamp: cp.timestamp,
        }
    }
}

/// Execute checkpoint commands.
///
/// # Errors
///
/// Returns an error if the database is missing or the checkpoint is unknown.
pub fn execute(ctx: &Context, command: &CheckpointCommands) -> Result<()> {
    block_on(async {
        let services = ctx.services().await?;
        let recovery = services.recovery();
        match command {
            CheckpointCommands::List { document } => {
                let checkpoints = recovery.list_checkpoints(document.as_deref());
                let output = CheckpointListOutput {
                    count: checkpoints.len(),
                    checkpoints: checkpoints.iter().map(CheckpointInfo::from).collect(),
                };
                ctx.emit(&output, print_list)
            }
            CheckpointCommands::Show { id } => {
                let checkpoint = recovery.get_checkpoint(id)?;
                ctx.emit(&checkpoint, print_checkpoint)
            }
            CheckpointCommands::Rollback { id } => {
                let result = recovery.rollback_to_checkpoint(id).await?;
                ctx.emit(&result, print_rollback)
            }
            CheckpointCommands::Resume { id } => {
                let plan = recovery.resume_from_checkpoint(id).await?;
                ctx.emit(&plan, print_plan)
            }
        }
    })
}

fn format_time(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn print_list(output: &CheckpointListOutput) {
    if output.checkpoints.is_empty() {
        println!("No checkpoints retained.");
        return;
    }
    println!("{} ({}):", "Checkpoints".bold(), output.count);
    for cp in &output.checkpoints {
        println!(
            "  {} {} {}/{} [{}] {}",
            cp.id.cyan(),
            cp.document_id,
            cp.processed_chunks,
            cp.total_chunks,
            cp.phase,
            format_time(cp.timestamp).dimmed()
        );
    }
}

fn print_checkpoint(cp: &Checkpoint) {
    println!("{} {}", "Checkpoint:".bold(), cp.id);
    println!("  Document:  {}", cp.document_id);
    println!("  Episode:   {}", cp.episode_id);
    println!("  Progress:  {}/{} ({} remaining)", cp.processed_chunks, cp.total_chunks, cp.remaining());
    println!("  Phase:     {}", cp.state.phase.as_str());
    println!("  Taken:     {}", format_time(cp.timestamp));
    println!("  Embedded:  {}", preview_ids(&cp.embedded_chunk_ids, 5));
    if !cp.state.failed_operations.is_empty() {
        println!("  Failed:    {}", preview_ids(&cp.state.failed_operations, 5));
    }
}

fn print_rollback(result: &RollbackResult) {
    let headline = if result.success {
        "Rolled back".green()
    } else {
        "Rolled back with errors".yellow()
    };
    println!("{} {} to {}", headline, result.document_id, result.checkpoint_id);
    println!("  Remote deletes:         {}", result.remote_deleted);
    println!("  Chunks reset:           {}", result.chunks_reset);
    println!("  Embeddings invalidated: {}", result.embeddings_invalidated);
    println!("  Checkpoints discarded:  {}", result.checkpoints_discarded);
    for error in &result.errors {
        let chunk = error.chunk_id.as_deref().unwrap_or("-");
        println!("  {} {:?} {}: {}", "!".red(), error.step, chunk, error.message);
    }
}

fn print_plan(plan: &ResumptionPlan) {
    println!("{} {} from {}", "Resume".bold(), plan.document_id, plan.checkpoint_id);
    println!("  Resume at:  chunk {} of {}", plan.resume_from, plan.total_chunks);
    println!("  Remaining:  {}", plan.remaining_chunks);
    println!("  Pending:    {}", preview_ids(&plan.pending_chunk_ids, 5));
    println!();
    println!("Run 'chunksync sync {}' to continue.", plan.document_id);
}

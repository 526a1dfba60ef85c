//! Embedding cache commands.

use super::{block_on, Context};
use crate::cli::EmbeddingsCommands;
use crate::embeddings::{EmbeddingProvider, OllamaProvider};
use crate::error::{Error, Result};
use crate::recovery::EmbeddingRetryResult;
use colored::Colorize;

/// Execute embeddings commands.
///
/// # Errors
///
/// Returns an error if the database is missing or the provider is down.
pub fn execute(ctx: &Context, command: &EmbeddingsCommands) -> Result<()> {
    match command {
        EmbeddingsCommands::Retry { ids } => block_on(async {
            let services = ctx.services().await?;
            let provider = OllamaProvider::from_config(&services.config.embeddings);
            if !provider.is_available().await {
                let info = provider.info();
                return Err(Error::Embedding(format!(
                    "{} model '{}' is not available at {}",
                    info.name, info.model, services.config.embeddings.endpoint
                )));
            }

            let result = services.recovery().retry_failed_embeddings(&provider, ids).await?;
            ctx.emit(&result, print_result)
        }),
    }
}

fn print_result(result: &EmbeddingRetryResult) {
    println!(
        "{} {}/{} embeddings regenerated",
        "Embeddings:".bold(),
        result.succeeded.len(),
        result.attempted
    );
    for failure in &result.failed {
        println!("  {} {}: {}", "x".red(), failure.chunk_id, failure.message);
    }
}

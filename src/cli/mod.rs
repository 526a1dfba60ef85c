//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// chunksync - push document chunks into a hosted memory graph
#[derive(Parser, Debug)]
#[command(name = "chunksync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.chunksync/data/chunksync.db)
    #[arg(long, global = true, env = "CHUNKSYNC_DB")]
    pub db: Option<PathBuf>,

    /// User id that owns synced chunks and episodes
    #[arg(long, global = true, env = "CHUNKSYNC_USER")]
    pub user: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database
    Init {
        /// Recreate the database if it exists
        #[arg(long)]
        force: bool,
    },

    /// Load chunks from a JSONL file
    Ingest {
        /// JSONL file with one chunk record per line
        file: PathBuf,

        /// Document title applied to every document in the file
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Sync a document's unsynced chunks
    Sync {
        /// Document id
        document: String,

        /// Re-attempt failed chunks instead
        #[arg(long)]
        retry: bool,
    },

    /// Show a document's sync status
    Status {
        /// Document id
        document: String,
    },

    /// Checkpoint inspection and recovery
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Chunk maintenance
    Chunks {
        #[command(subcommand)]
        command: ChunkCommands,
    },

    /// Embedding cache maintenance
    Embeddings {
        #[command(subcommand)]
        command: EmbeddingsCommands,
    },

    /// Summarize a document's sync failures
    Report {
        /// Document id
        document: String,
    },

    /// Show rate limiter, circuit breaker and checkpoint health
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// List retained checkpoints
    List {
        /// Only checkpoints of this document
        #[arg(short, long)]
        document: Option<String>,
    },

    /// Show one checkpoint
    Show {
        /// Checkpoint id
        id: String,
    },

    /// Undo the remote writes recorded by a checkpoint
    Rollback {
        /// Checkpoint id
        id: String,
    },

    /// Show what a resumed sync would still process
    Resume {
        /// Checkpoint id
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ChunkCommands {
    /// Mark chunks as permanently failed
    Corrupt {
        /// Chunk ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Why the chunks are unusable
        #[arg(short, long, default_value = "marked corrupted by operator")]
        reason: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum EmbeddingsCommands {
    /// Regenerate and cache embeddings for chunks
    Retry {
        /// Chunk ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_sync_retry() {
        let cli = Cli::parse_from(["chunksync", "--user", "u1", "sync", "doc1", "--retry"]);
        assert_eq!(cli.user.as_deref(), Some("u1"));
        assert!(matches!(cli.command, Commands::Sync { ref document, retry: true } if document == "doc1"));
    }
}

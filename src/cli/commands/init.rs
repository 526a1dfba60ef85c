//! Create the chunksync database.
//!
//! The database lives at `~/.chunksync/data/chunksync.db` unless `--db` or
//! `CHUNKSYNC_DB` points elsewhere. The schema is applied on open.

use super::Context;
use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the database exists and `force` is not set, or if the
/// directory or database cannot be created.
pub fn execute(ctx: &Context, force: bool) -> Result<()> {
    let db_path = resolve_db_path(ctx.db.as_deref())
        .ok_or_else(|| Error::Config("Could not determine the chunksync directory".to_string()))?;

    if db_path.exists() {
        if !force {
            return Err(Error::InvalidArgument(format!(
                "database already exists at {} (use --force to recreate)",
                db_path.display()
            )));
        }
        fs::remove_file(&db_path)?;
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    SqliteStorage::open(&db_path)?;

    let output = InitOutput {
        database: db_path,
        created: true,
    };
    ctx.emit(&output, |out| {
        println!("{} chunksync database", "Initialized".green());
        println!("  Database: {}", out.database.display());
        println!();
        println!("Next: run 'chunksync ingest <file.jsonl>' to load chunks.");
    })
}

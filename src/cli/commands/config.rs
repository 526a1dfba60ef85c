//! Configuration commands.

use super::Context;
use crate::cli::ConfigCommands;
use crate::config::{global_chunksync_dir, resolve_config, save_config, SyncConfig};
use crate::error::{Error, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct ConfigInitOutput {
    path: PathBuf,
}

/// Execute config commands.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or written.
pub fn execute(ctx: &Context, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => show(ctx),
        ConfigCommands::Init { force } => init(ctx, *force),
    }
}

fn show(ctx: &Context) -> Result<()> {
    let mut config = resolve_config()?;
    if config.graph.api_key.is_some() {
        config.graph.api_key = Some("********".to_string());
    }
    ctx.emit(&config, |c| match serde_json::to_string_pretty(c) {
        Ok(pretty) => println!("{pretty}"),
        Err(e) => eprintln!("Failed to render config: {e}"),
    })
}

fn init(ctx: &Context, force: bool) -> Result<()> {
    let existing = global_chunksync_dir()
        .map(|dir| dir.join("config.json"))
        .filter(|p| p.exists());
    if let Some(path) = existing {
        if !force {
            return Err(Error::InvalidArgument(format!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            )));
        }
    }

    let path = save_config(&SyncConfig::default())?;
    ctx.emit(&ConfigInitOutput { path }, |o| {
        println!("{} {}", "Wrote".green(), o.path.display());
    })
}

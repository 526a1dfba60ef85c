//! chunksync CLI entry point.

use chunksync::cli::commands::{self, Context};
use chunksync::cli::{Cli, Commands};
use chunksync::error::Error;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    // --json, or stdout is not a terminal
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());
    if json {
        colored::control::set_override(false);
    }

    let ctx = Context {
        db: cli.db.clone(),
        user: cli.user.clone(),
        json,
    };

    match run(&cli, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, ctx: &Context) -> Result<(), Error> {
    match &cli.command {
        Commands::Init { force } => commands::init::execute(ctx, *force),
        Commands::Ingest { file, title } => commands::ingest::execute(ctx, file, title.as_deref()),
        Commands::Sync { document, retry } => commands::sync::execute(ctx, document, *retry),
        Commands::Status { document } => commands::status::execute(ctx, document),
        Commands::Checkpoint { command } => commands::checkpoint::execute(ctx, command),
        Commands::Chunks { command } => commands::chunks::execute(ctx, command),
        Commands::Embeddings { command } => commands::embeddings::execute(ctx, command),
        Commands::Report { document } => commands::report::execute(ctx, document),
        Commands::Health => commands::health::execute(ctx),
        Commands::Config { command } => commands::config::execute(ctx, command),
    }
}

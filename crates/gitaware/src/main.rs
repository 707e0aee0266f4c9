//! Gitaware CLI - ignore-aware directory backups
//!
//! This is the main entry point for the gitaware command-line interface.

mod cli;
mod commands;
mod output;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

/// Exit code used when the backup was interrupted (128 + SIGINT).
pub(crate) const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI args
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.quiet);

    match commands::backup::run(cli.backup, cli.quiet).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let interrupted = e
                .downcast_ref::<gitaware_backup::Error>()
                .is_some_and(gitaware_backup::Error::is_interrupted);
            if interrupted {
                output::warning("Backup interrupted, partial archive removed");
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                output::error(&format!("{:#}", e));
                ExitCode::FAILURE
            }
        }
    }
}

/// Initialize tracing with appropriate verbosity
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

//! CLI argument parsing with clap

use clap::Parser;

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;

/// Gitaware - back up a directory tree, honoring its .gitignore files
#[derive(Parser, Debug)]
#[command(name = "gitaware")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress everything but errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub backup: BackupArgs,
}

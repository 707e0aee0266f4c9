//! Backup command

use anyhow::{Context, Result};
use clap::Args;
use gitaware_backup::{
    Backup, BackupConfig, BackupReport, CancellationToken, CompressionMode, ProgressBarObserver,
    TracingObserver, DEFAULT_IGNORE_FILE,
};
use std::path::{Path, PathBuf};

use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Source directory to back up
    pub source: PathBuf,

    /// Output archive file, or a directory to place a timestamped archive in
    #[arg(short, long, env = "GITAWARE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Compression: none, gzip or zstd [default: gzip]
    #[arg(short, long, env = "GITAWARE_COMPRESSION")]
    pub compression: Option<CompressionMode>,

    /// Compression level (gzip 1-9, zstd 1-19)
    #[arg(short, long, env = "GITAWARE_LEVEL")]
    pub level: Option<u32>,

    /// Store a SHA-256 manifest of every archived file in the archive
    #[arg(short, long, env = "GITAWARE_MANIFEST")]
    pub manifest: bool,

    /// Additional exclude patterns (gitignore syntax, relative to the source)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Additional ignore-file names to honor next to .gitignore
    #[arg(long = "ignore-file", value_name = "NAME")]
    pub ignore_files: Vec<String>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl BackupArgs {
    /// Builds the library configuration from the parsed flags.
    fn to_config(&self) -> BackupConfig {
        let mut ignore_filenames = vec![DEFAULT_IGNORE_FILE.to_string()];
        ignore_filenames.extend(
            self.ignore_files
                .iter()
                .filter(|name| name.as_str() != DEFAULT_IGNORE_FILE)
                .cloned(),
        );

        let mut config = BackupConfig::new()
            .with_compression(self.compression.unwrap_or_default())
            .with_manifest(self.manifest)
            .with_ignore_filenames(ignore_filenames)
            .with_excludes(self.exclude.clone());
        if let Some(output) = &self.output {
            config = config.with_output(output);
        }
        if let Some(level) = self.level {
            config = config.with_compression_level(level);
        }
        config
    }
}

pub async fn run(args: BackupArgs, quiet: bool) -> Result<()> {
    let config = args.to_config();
    let cancel = CancellationToken::new();
    let backup = Backup::new(&args.source, config)?.with_cancellation(cancel.clone());

    if !quiet {
        output::header("Backup");
        output::kv("Source", backup.source().display());
        output::kv("Output", backup.output().display());
        let config = backup.config();
        match config.compression {
            CompressionMode::None => output::kv("Compression", "none"),
            mode => output::kv(
                "Compression",
                format!("{} (level {})", mode, config.effective_level()),
            ),
        }
        output::kv("Manifest", enabled(config.manifest));
        println!();
    }

    let show_progress = !quiet && !args.no_progress && console::Term::stderr().is_term();
    let interrupt = tokio::spawn(watch_interrupt(cancel, backup.output().to_path_buf()));

    let result = tokio::task::spawn_blocking(move || {
        let mut backup = backup;
        if show_progress {
            backup.run(&(TracingObserver, ProgressBarObserver::new()))
        } else {
            backup.run(&TracingObserver)
        }
    })
    .await
    .context("Backup task panicked")?;
    interrupt.abort();

    let report = result?;
    if !quiet {
        print_summary(&report);
    }
    Ok(())
}

/// Response to the n-th Ctrl-C (counting from zero) during a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Ask the backup to stop and remove its partial archive
    Cancel,
    /// Exit immediately without waiting for cleanup
    ForceExit,
}

fn interrupt_action(presses: u32) -> InterruptAction {
    if presses == 0 {
        InterruptAction::Cancel
    } else {
        InterruptAction::ForceExit
    }
}

/// Trips `cancel` on the first Ctrl-C so the running backup stops and cleans
/// up. A second Ctrl-C exits with the interrupt status right away.
async fn watch_interrupt(cancel: CancellationToken, archive: PathBuf) {
    let mut presses = 0;
    while tokio::signal::ctrl_c().await.is_ok() {
        match interrupt_action(presses) {
            InterruptAction::Cancel => {
                tracing::warn!("Interrupt received, stopping backup");
                tracing::warn!("Press Ctrl-C again to force exit immediately");
                cancel.cancel();
            }
            InterruptAction::ForceExit => force_exit(&archive),
        }
        presses += 1;
    }
}

fn force_exit(archive: &Path) -> ! {
    output::warning(&format!(
        "Forced exit, a partial archive may remain at {}",
        archive.display()
    ));
    std::process::exit(i32::from(crate::EXIT_INTERRUPTED));
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn print_summary(report: &BackupReport) {
    println!();
    output::success(&format!("Backup created: {}", report.archive_path.display()));
    output::kv("Files archived", report.processed);
    if report.failed > 0 {
        output::kv(
            "Files skipped",
            format!("{} ({} unreadable)", report.skipped(), report.failed),
        );
    } else {
        output::kv("Files skipped", report.skipped());
    }
    if report.symlinks > 0 {
        output::kv("Symlinks", report.symlinks);
    }
    if let Some(entries) = report.manifest_entries {
        output::kv("Manifest entries", entries);
    }
    match report.compression {
        CompressionMode::None => output::kv("Archive size", report.human_readable_size()),
        _ => output::kv(
            "Archive size",
            format!(
                "{} ({}% smaller)",
                report.human_readable_size(),
                report.compression_percentage()
            ),
        ),
    }
    output::kv("Duration", format!("{:.2}s", report.duration.as_secs_f64()));

    if report.failed > 0 {
        output::warning(&format!(
            "{} file(s) could not be read and were left out",
            report.failed
        ));
    }
}

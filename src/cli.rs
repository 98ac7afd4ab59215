use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::commands::CommandReport;
use crate::vault::config::load_config;
use crate::vault::import::ConflictPolicy;

#[derive(Debug, Parser)]
#[command(
    name = "convault",
    version,
    about = "Conversation archive lifecycle: snapshot backups, retention cleanup, import/merge"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a full backup of the conversation store
    Backup {
        /// Run the retention sweep after a successful backup
        #[arg(long)]
        cleanup: bool,
    },
    /// Back up only records modified after a timestamp
    Incremental {
        /// Lower bound (exclusive), e.g. 2026-01-01T00:00:00
        #[arg(long)]
        since: String,
    },
    /// Import conversations from an export file
    Import {
        path: String,
        /// Conflict policy: skip, update, or overwrite
        #[arg(long, default_value = "skip")]
        policy: String,
    },
    /// Merge another conversation store into this one
    Merge {
        store_path: String,
        /// Conflict policy: skip, update, or overwrite
        #[arg(long, default_value = "skip")]
        policy: String,
    },
    /// Export all conversations to a file (format from the extension)
    Export { out: String },
    /// Check an import file without touching the store
    Validate { path: String },
    /// Verify a backup file's integrity
    Verify { path: String },
    /// Apply the retention policy to the backup directory
    Cleanup,
    /// Show recorded backup history
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show store, backup, and configuration state
    Status,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config()?;

    let report = match cli.command {
        Command::Backup { cleanup } => {
            commands::backup::run(&config, &commands::backup::BackupOptions { cleanup })?
        }
        Command::Incremental { since } => commands::incremental::run(
            &config,
            &commands::incremental::IncrementalOptions { since },
        )?,
        Command::Import { path, policy } => {
            let policy: ConflictPolicy = policy.parse()?;
            commands::import::run(&config, &commands::import::ImportOptions { path, policy })?
        }
        Command::Merge { store_path, policy } => {
            let policy: ConflictPolicy = policy.parse()?;
            commands::merge::run(&config, &commands::merge::MergeOptions { store_path, policy })?
        }
        Command::Export { out } => {
            commands::export::run(&config, &commands::export::ExportOptions { out })?
        }
        Command::Validate { path } => {
            commands::validate::run(&config, &commands::validate::ValidateOptions { path })?
        }
        Command::Verify { path } => {
            commands::verify::run(&config, &commands::verify::VerifyOptions { path })?
        }
        Command::Cleanup => commands::cleanup::run(&config)?,
        Command::History { limit } => {
            commands::history::run(&config, &commands::history::HistoryOptions { limit })?
        }
        Command::Status => commands::status::run(&config)?,
    };

    finish(report)
}

fn finish(report: CommandReport) -> Result<()> {
    for detail in &report.details {
        println!("{}: {detail}", report.command);
    }
    for issue in &report.issues {
        eprintln!("{}: issue: {issue}", report.command);
    }
    if report.ok {
        Ok(())
    } else {
        anyhow::bail!("{} completed with issues", report.command)
    }
}

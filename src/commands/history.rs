use anyhow::Result;

use crate::commands::CommandReport;
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;

#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub limit: usize,
}

pub fn run(config: &VaultConfig, opts: &HistoryOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("history");
    let engine = BackupEngine::new(config.backup.clone());

    let history = engine.backup_history();
    report.detail(format!("recorded_backups={}", history.len()));

    let start = history.len().saturating_sub(opts.limit);
    for archive in &history[start..] {
        report.detail(format!(
            "{} {} {} ({} bytes, {} conversations)",
            archive.timestamp,
            archive.backup_type.as_str(),
            archive.filename,
            archive.size,
            archive.conversation_count
        ));
    }

    Ok(report)
}

use anyhow::Result;

use crate::commands::CommandReport;
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;

pub fn run(config: &VaultConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("cleanup");
    let engine = BackupEngine::new(config.backup.clone());

    report.detail(format!(
        "retention: {} day(s), max {} backup(s)",
        config.backup.retention_days, config.backup.max_backups
    ));

    let outcome = engine.cleanup_old_backups();
    report.detail(format!("removed {} backup file(s)", outcome.removed));
    for issue in outcome.issues {
        report.issue(issue);
    }

    Ok(report)
}

use anyhow::Result;

use crate::commands::{CommandReport, open_store};
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOptions {
    /// Run the retention sweep after a successful backup.
    pub cleanup: bool,
}

pub fn run(config: &VaultConfig, opts: &BackupOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup");
    let store = open_store(config)?;
    let engine = BackupEngine::new(config.backup.clone());

    report.detail(format!("store={}", config.store.db_path.display()));
    report.detail(format!("backup_dir={}", config.backup.dir.display()));
    report.detail(format!("format={}", config.backup.format.as_str()));

    let outcome = engine.create_full_backup(&store);
    for archive in &outcome.archives {
        report.detail(format!(
            "created {} ({} bytes, {} conversations)",
            archive.filename, archive.size, archive.conversation_count
        ));
    }
    for issue in outcome.issues {
        report.issue(issue);
    }
    if outcome.archives.is_empty() && report.ok {
        report.issue("no backup produced");
    }

    if opts.cleanup && report.ok {
        let swept = engine.cleanup_old_backups();
        report.detail(format!("cleanup removed {} file(s)", swept.removed));
        for issue in swept.issues {
            report.issue(issue);
        }
    }

    Ok(report)
}

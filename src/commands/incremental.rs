use anyhow::Result;

use crate::commands::{CommandReport, open_store};
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;

#[derive(Debug, Clone)]
pub struct IncrementalOptions {
    /// Only records with `last_modified_at` strictly after this timestamp
    /// are included.
    pub since: String,
}

pub fn run(config: &VaultConfig, opts: &IncrementalOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("incremental");
    let store = open_store(config)?;
    let engine = BackupEngine::new(config.backup.clone());

    let outcome = engine.create_incremental_backup(&store, &opts.since);
    for issue in outcome.issues {
        report.issue(issue);
    }
    match outcome.archive {
        Some(archive) => report.detail(format!(
            "created {} ({} conversations newer than {})",
            archive.filename, archive.conversation_count, opts.since
        )),
        None if report.ok => {
            report.detail(format!("no records newer than {}; nothing to back up", opts.since));
        }
        None => {}
    }

    Ok(report)
}

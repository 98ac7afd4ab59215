use anyhow::Result;

use crate::commands::CommandReport;
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;
use crate::vault::guard::{self, PathRules};

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub path: String,
}

pub fn run(config: &VaultConfig, opts: &VerifyOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let engine = BackupEngine::new(config.backup.clone());

    let path = guard::validate_path(&opts.path, &PathRules::existing_anywhere())?;
    report.detail(format!("file={}", path.display()));

    if engine.verify_backup(&path)? {
        report.detail("backup verification passed");
    } else {
        report.issue("backup file is invalid or corrupt");
    }

    Ok(report)
}

use anyhow::Result;

use crate::commands::{CommandReport, open_store};
use crate::vault::config::VaultConfig;
use crate::vault::import::ImportEngine;

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub path: String,
}

pub fn run(config: &VaultConfig, opts: &ValidateOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("validate");
    let store = open_store(config)?;
    let engine = ImportEngine::new(&store);

    let validation = engine.validate(&opts.path)?;
    if validation.ok {
        report.detail(validation.message);
        report.detail(format!("declared_count={}", validation.declared_count));
    } else {
        report.issue(validation.message);
    }

    Ok(report)
}

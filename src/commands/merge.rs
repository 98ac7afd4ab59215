use anyhow::Result;

use crate::commands::{CommandReport, import::describe_result, open_store};
use crate::vault::audit;
use crate::vault::config::VaultConfig;
use crate::vault::import::{ConflictPolicy, ImportEngine};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub store_path: String,
    pub policy: ConflictPolicy,
}

pub fn run(config: &VaultConfig, opts: &MergeOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("merge");
    let store = open_store(config)?;
    let engine = ImportEngine::new(&store);

    report.detail(format!("source_store={}", opts.store_path));
    report.detail(format!("policy={}", opts.policy.as_str()));

    let result = engine.merge_from_store(&opts.store_path, opts.policy)?;
    describe_result(&mut report, &result);

    let _ = audit::append_event(
        &config.backup.dir,
        "merge",
        if result.success { "done" } else { "failed" },
        &format!(
            "{}: imported={} skipped={} errors={}",
            opts.store_path, result.imported_count, result.skipped_count, result.error_count
        ),
    );

    Ok(report)
}

use anyhow::Result;

use crate::commands::{CommandReport, open_store};
use crate::vault::audit;
use crate::vault::config::VaultConfig;
use crate::vault::import::{ConflictPolicy, ImportEngine, ImportResult};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub path: String,
    pub policy: ConflictPolicy,
}

pub fn describe_result(report: &mut CommandReport, result: &ImportResult) {
    report.detail(format!(
        "imported={} skipped={} errors={}",
        result.imported_count, result.skipped_count, result.error_count
    ));
    if result.success {
        // Per-record failures do not fail the batch; they are surfaced
        // alongside the counts.
        for error in &result.errors {
            report.detail(format!("record error: {error}"));
        }
    } else {
        for error in &result.errors {
            report.issue(error.clone());
        }
    }
}

pub fn run(config: &VaultConfig, opts: &ImportOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("import");
    let store = open_store(config)?;
    let engine = ImportEngine::new(&store);

    report.detail(format!("file={}", opts.path));
    report.detail(format!("policy={}", opts.policy.as_str()));

    let result = engine.import_file(&opts.path, opts.policy)?;
    describe_result(&mut report, &result);

    let _ = audit::append_event(
        &config.backup.dir,
        "import",
        if result.success { "done" } else { "failed" },
        &format!(
            "{}: imported={} skipped={} errors={}",
            opts.path, result.imported_count, result.skipped_count, result.error_count
        ),
    );

    Ok(report)
}

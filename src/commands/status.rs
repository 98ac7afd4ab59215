use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::vault::backup::BackupEngine;
use crate::vault::config::VaultConfig;
use crate::vault::store::ConversationStore;

include!(concat!(env!("OUT_DIR"), "/convault_env_allowlist.rs"));

/// Flag `CONVAULT_*` variables that are set but unknown to this build;
/// a typo in an override silently falls back to defaults otherwise.
fn unrecognized_env_vars() -> Vec<String> {
    env::vars()
        .map(|(name, _)| name)
        .filter(|name| name.starts_with("CONVAULT_"))
        .filter(|name| !GENERATED_CONVAULT_ENV_ALLOWLIST.contains(&name.as_str()))
        .collect()
}

pub fn run(config: &VaultConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("store={}", config.store.db_path.display()));
    report.detail(format!("backup_dir={}", config.backup.dir.display()));
    report.detail(format!(
        "format={} compression={} retention_days={} max_backups={}",
        config.backup.format.as_str(),
        config.backup.enable_compression,
        config.backup.retention_days,
        config.backup.max_backups
    ));

    match ConversationStore::open(&config.store.db_path) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                report.detail(format!("conversations={}", stats.total_count));
                report.detail(format!("payload_bytes={}", stats.total_payload_bytes));
                if let Some(newest) = stats.newest_timestamp {
                    report.detail(format!("newest_conversation={newest}"));
                }
            }
            Err(err) => report.issue(format!("failed to read store stats: {err:#}")),
        },
        Err(err) => report.issue(format!("{err:#}")),
    }

    let engine = BackupEngine::new(config.backup.clone());
    match engine.backup_stats() {
        Ok(stats) => {
            report.detail(format!(
                "backups={} total_size={}",
                stats.total_backups, stats.total_size
            ));
            if let Some(newest) = stats.newest_backup {
                report.detail(format!("newest_backup={newest}"));
            }
            for (kind, count) in &stats.by_type {
                report.detail(format!("backups_{kind}={count}"));
            }
        }
        Err(err) => report.issue(format!("failed to read backup directory: {err:#}")),
    }
    report.detail(format!("recorded_history={}", engine.backup_history().len()));

    for name in unrecognized_env_vars() {
        report.issue(format!("unrecognized environment variable: {name}"));
    }

    Ok(report)
}

use anyhow::{Result, anyhow};
use chrono::Local;
use std::fs;
use std::path::Path;

use crate::commands::{CommandReport, open_store};
use crate::vault::codec::{self, Encoding};
use crate::vault::config::VaultConfig;
use crate::vault::guard::{self, MAX_FILENAME_LEN, PathRules};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Target file; the extension picks the format (`.json`, `.csv`,
    /// `.sqlite`, optionally `.gz`-compressed).
    pub out: String,
}

pub fn run(config: &VaultConfig, opts: &ExportOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("export");
    let store = open_store(config)?;

    let requested = Path::new(&opts.out);
    let raw_name = requested
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("export target has no filename: {}", opts.out))?;
    let safe_name = guard::sanitize_filename(raw_name, MAX_FILENAME_LEN)?;

    let parent = match requested.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            guard::validate_path(&parent.display().to_string(), &PathRules::anywhere())?
        }
        _ => guard::validate_path(".", &PathRules::anywhere())?,
    };
    fs::create_dir_all(&parent)?;
    let target = parent.join(&safe_name);

    let Some(format) = codec::detect_format(&safe_name) else {
        return Err(anyhow!("unsupported export format: {safe_name}"));
    };

    let generated_at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    match format.encoding {
        Encoding::Portable => {
            let records = store.list_all()?;
            let stats = if config.backup.include_metadata {
                Some(store.stats()?)
            } else {
                None
            };
            let bytes = codec::encode_portable(&records, &generated_at, None, stats)?;
            codec::write_bytes(&target, &bytes, format.compressed)?;
            report.detail(format!("exported {} conversations", records.len()));
        }
        Encoding::Tabular => {
            let records = store.list_all()?;
            let bytes = codec::encode_tabular(&records)?;
            codec::write_bytes(&target, &bytes, format.compressed)?;
            report.detail(format!("exported {} conversations", records.len()));
        }
        Encoding::Native => {
            if format.compressed {
                let staged = tempfile::NamedTempFile::new_in(&parent)?;
                store.snapshot_raw_to(staged.path())?;
                let raw = fs::read(staged.path())?;
                codec::write_bytes(&target, &raw, true)?;
            } else {
                store.snapshot_raw_to(&target)?;
            }
            report.detail("exported raw store snapshot".to_string());
        }
    }

    if safe_name != raw_name {
        report.detail(format!("filename sanitized to {safe_name}"));
    }
    report.detail(format!("wrote {}", target.display()));
    Ok(report)
}

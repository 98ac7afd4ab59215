use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Which on-disk shape a full backup takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    Native,
    Portable,
    Both,
}

impl BackupFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Portable => "portable",
            Self::Both => "both",
        }
    }

    pub fn wants_native(self) -> bool {
        matches!(self, Self::Native | Self::Both)
    }

    pub fn wants_portable(self) -> bool {
        matches!(self, Self::Portable | Self::Both)
    }
}

impl FromStr for BackupFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "portable" => Ok(Self::Portable),
            "both" => Ok(Self::Both),
            other => Err(anyhow!(
                "invalid backup format `{other}`: use `native`, `portable`, or `both`"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub dir: PathBuf,
    pub enable_compression: bool,
    pub retention_days: u32,
    pub max_backups: usize,
    pub format: BackupFormat,
    pub include_metadata: bool,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub store: StoreConfig,
    pub backup: BackupSettings,
}

#[derive(Debug, Default, Deserialize)]
struct PartialVaultConfig {
    store: Option<PartialStoreConfig>,
    backup: Option<PartialBackupSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialStoreConfig {
    db_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialBackupSettings {
    dir: Option<String>,
    enable_compression: Option<bool>,
    retention_days: Option<u32>,
    max_backups: Option<usize>,
    format: Option<String>,
    include_metadata: Option<bool>,
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn required_home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| anyhow!("HOME directory could not be resolved"))
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("CONVAULT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    let home = dirs::home_dir()?;
    Some(home.join(".convault").join("config.toml"))
}

fn defaults() -> Result<VaultConfig> {
    let home = required_home_dir()?;
    Ok(VaultConfig {
        store: StoreConfig {
            db_path: home.join(".local/state/warp-terminal/warp.sqlite"),
        },
        backup: BackupSettings {
            dir: home.join("convault-backups"),
            enable_compression: true,
            retention_days: 30,
            max_backups: 10,
            format: BackupFormat::Native,
            include_metadata: true,
        },
    })
}

fn merge_file_config(base: &mut VaultConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialVaultConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;

    if let Some(store) = parsed.store
        && let Some(db_path) = store.db_path
    {
        base.store.db_path = PathBuf::from(db_path);
    }
    if let Some(backup) = parsed.backup {
        if let Some(dir) = backup.dir {
            base.backup.dir = PathBuf::from(dir);
        }
        if let Some(v) = backup.enable_compression {
            base.backup.enable_compression = v;
        }
        if let Some(v) = backup.retention_days {
            base.backup.retention_days = v;
        }
        if let Some(v) = backup.max_backups {
            base.backup.max_backups = v;
        }
        if let Some(v) = backup.format {
            base.backup.format = v.parse()?;
        }
        if let Some(v) = backup.include_metadata {
            base.backup.include_metadata = v;
        }
    }
    Ok(())
}

/// Resolve the effective configuration: built-in defaults, overlaid by the
/// optional TOML file, overlaid by `CONVAULT_*` environment variables.
pub fn load_config() -> Result<VaultConfig> {
    let mut cfg = defaults()?;
    merge_file_config(&mut cfg)?;

    cfg.store.db_path = env_or_path("CONVAULT_DB_PATH", cfg.store.db_path);
    cfg.backup.dir = env_or_path("CONVAULT_BACKUP_DIR", cfg.backup.dir);
    cfg.backup.enable_compression =
        env_or_bool("CONVAULT_COMPRESSION", cfg.backup.enable_compression);
    cfg.backup.retention_days = env_or_u32("CONVAULT_RETENTION_DAYS", cfg.backup.retention_days);
    cfg.backup.max_backups = env_or_usize("CONVAULT_MAX_BACKUPS", cfg.backup.max_backups);
    if let Ok(v) = env::var("CONVAULT_BACKUP_FORMAT")
        && !v.trim().is_empty()
    {
        cfg.backup.format = v.parse()?;
    }
    cfg.backup.include_metadata =
        env_or_bool("CONVAULT_INCLUDE_METADATA", cfg.backup.include_metadata);

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_format_tokens_parse() {
        assert_eq!("native".parse::<BackupFormat>().unwrap(), BackupFormat::Native);
        assert_eq!(" Both ".parse::<BackupFormat>().unwrap(), BackupFormat::Both);
        assert!("tarball".parse::<BackupFormat>().is_err());
    }

    #[test]
    fn partial_file_sections_merge_over_defaults() {
        let parsed: PartialVaultConfig =
            toml::from_str("[backup]\nretention_days = 7\n").expect("parse");
        let backup = parsed.backup.expect("backup section");
        assert_eq!(backup.retention_days, Some(7));
        assert!(backup.dir.is_none());
    }
}

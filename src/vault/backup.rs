use crate::vault::audit;
use crate::vault::codec::{self, Encoding};
use crate::vault::config::BackupSettings;
use crate::vault::store::ConversationStore;
use crate::vault::warn;
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const HISTORY_FILE: &str = ".backup_history.json";
pub const HISTORY_CAP: usize = 100;

const FULL_PREFIX: &str = "convault_backup_";
const INCREMENTAL_PREFIX: &str = "convault_incremental_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupType {
    FullNative,
    FullPortable,
    Incremental,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullNative => "full-native",
            Self::FullPortable => "full-portable",
            Self::Incremental => "incremental",
        }
    }
}

/// Metadata for one finished backup file. Immutable once recorded;
/// destroyed only when retention cleanup deletes the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArchive {
    pub filename: String,
    pub filepath: String,
    pub timestamp: String,
    pub size: u64,
    pub compressed: bool,
    pub backup_type: BackupType,
    pub conversation_count: u64,
    #[serde(default)]
    pub content_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    last_updated: String,
    backups: Vec<BackupArchive>,
}

#[derive(Debug, Default)]
pub struct FullBackupOutcome {
    pub archives: Vec<BackupArchive>,
    pub issues: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IncrementalOutcome {
    pub archive: Option<BackupArchive>,
    pub issues: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub removed: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BackupStats {
    pub backup_directory: String,
    pub total_backups: usize,
    pub total_size: u64,
    pub oldest_backup: Option<String>,
    pub newest_backup: Option<String>,
    pub by_type: BTreeMap<String, usize>,
}

pub struct BackupEngine {
    settings: BackupSettings,
}

fn now_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Retention and statistics recognize exactly the engine's own filename
/// shapes: full backups in either encoding, incrementals in portable only.
fn is_backup_filename(name: &str) -> bool {
    let Some(format) = codec::detect_format(name) else {
        return false;
    };
    match format.encoding {
        Encoding::Native => name.starts_with(FULL_PREFIX),
        Encoding::Portable => {
            name.starts_with(FULL_PREFIX) || name.starts_with(INCREMENTAL_PREFIX)
        }
        Encoding::Tabular => false,
    }
}

impl BackupEngine {
    pub fn new(settings: BackupSettings) -> Self {
        Self { settings }
    }

    fn history_path(&self) -> PathBuf {
        self.settings.dir.join(HISTORY_FILE)
    }

    /// Create a full backup in the configured format(s). Failures are
    /// reported through the outcome, never raised: partial artifacts are
    /// removed and the corresponding archive is simply absent.
    pub fn create_full_backup(&self, store: &ConversationStore) -> FullBackupOutcome {
        let mut out = FullBackupOutcome::default();
        let stamp = now_stamp();

        if let Err(err) = fs::create_dir_all(&self.settings.dir) {
            out.issues
                .push(format!("failed to create {}: {err}", self.settings.dir.display()));
            return out;
        }
        if !self.has_disk_space_for(store) {
            out.issues.push(format!(
                "insufficient disk space in {}",
                self.settings.dir.display()
            ));
            return out;
        }

        if self.settings.format.wants_native() {
            match self.create_native_backup(store, &stamp) {
                Ok(archive) => {
                    self.record_archive(&archive);
                    out.archives.push(archive);
                }
                Err(err) => out.issues.push(format!("native backup failed: {err:#}")),
            }
        }

        if self.settings.format.wants_portable() {
            match self.create_portable_backup(store, &stamp) {
                Ok(archive) => {
                    self.record_archive(&archive);
                    out.archives.push(archive);
                }
                Err(err) => out.issues.push(format!("portable backup failed: {err:#}")),
            }
        }

        out
    }

    /// Back up only records modified strictly after `since`. An empty
    /// selection is a valid no-op: no archive, no history entry.
    pub fn create_incremental_backup(
        &self,
        store: &ConversationStore,
        since: &str,
    ) -> IncrementalOutcome {
        let mut out = IncrementalOutcome::default();

        if let Err(err) = fs::create_dir_all(&self.settings.dir) {
            out.issues
                .push(format!("failed to create {}: {err}", self.settings.dir.display()));
            return out;
        }

        let records = match store.list_all() {
            Ok(records) => records,
            Err(err) => {
                out.issues.push(format!("failed to read store: {err:#}"));
                return out;
            }
        };
        let selected: Vec<_> = records
            .into_iter()
            .filter(|record| record.last_modified_at.as_str() > since)
            .collect();
        if selected.is_empty() {
            let _ = audit::append_event(
                &self.settings.dir,
                "incremental",
                "noop",
                &format!("no records newer than {since}"),
            );
            return out;
        }

        let stamp = now_stamp();
        let filename = self.portable_filename(INCREMENTAL_PREFIX, &stamp);
        let filepath = self.settings.dir.join(&filename);

        let result = codec::encode_portable(&selected, &now_iso(), Some(since), None)
            .and_then(|bytes| {
                codec::write_bytes(&filepath, &bytes, self.settings.enable_compression)
            });
        if let Err(err) = result {
            remove_partial(&filepath);
            out.issues
                .push(format!("incremental backup failed: {err:#}"));
            return out;
        }

        match self.finish_archive(
            filename,
            &filepath,
            stamp,
            BackupType::Incremental,
            selected.len() as u64,
        ) {
            Ok(archive) => {
                self.record_archive(&archive);
                out.archive = Some(archive);
            }
            Err(err) => {
                remove_partial(&filepath);
                out.issues
                    .push(format!("incremental backup failed: {err:#}"));
            }
        }
        out
    }

    fn portable_filename(&self, prefix: &str, stamp: &str) -> String {
        let mut name = format!("{prefix}{stamp}.json");
        if self.settings.enable_compression {
            name.push_str(".gz");
        }
        name
    }

    fn create_native_backup(
        &self,
        store: &ConversationStore,
        stamp: &str,
    ) -> Result<BackupArchive> {
        let mut filename = format!("{FULL_PREFIX}{stamp}.sqlite");
        if self.settings.enable_compression {
            filename.push_str(".gz");
        }
        let filepath = self.settings.dir.join(&filename);
        let temp_path = self.settings.dir.join(format!("temp_{stamp}.sqlite"));

        let result = self.write_native(store, &temp_path, &filepath);
        remove_partial(&temp_path);
        if let Err(err) = result {
            remove_partial(&filepath);
            return Err(err);
        }

        // The snapshot is a verbatim copy, so the count comes from store
        // statistics rather than re-reading the archive.
        let count = store.stats().map(|s| s.total_count).unwrap_or(0);
        self.finish_archive(filename, &filepath, stamp.to_string(), BackupType::FullNative, count)
    }

    fn write_native(
        &self,
        store: &ConversationStore,
        temp_path: &Path,
        filepath: &Path,
    ) -> Result<()> {
        store.snapshot_raw_to(temp_path)?;
        if self.settings.enable_compression {
            let raw = fs::read(temp_path)
                .with_context(|| format!("failed to read {}", temp_path.display()))?;
            codec::write_bytes(filepath, &raw, true)?;
        } else {
            fs::rename(temp_path, filepath).with_context(|| {
                format!("failed to move snapshot into {}", filepath.display())
            })?;
        }
        Ok(())
    }

    fn create_portable_backup(
        &self,
        store: &ConversationStore,
        stamp: &str,
    ) -> Result<BackupArchive> {
        let filename = self.portable_filename(FULL_PREFIX, stamp);
        let filepath = self.settings.dir.join(&filename);

        let records = store.list_all()?;
        let store_stats = if self.settings.include_metadata {
            Some(store.stats()?)
        } else {
            None
        };

        let result = codec::encode_portable(&records, &now_iso(), None, store_stats)
            .and_then(|bytes| {
                codec::write_bytes(&filepath, &bytes, self.settings.enable_compression)
            });
        if let Err(err) = result {
            remove_partial(&filepath);
            return Err(err);
        }

        self.finish_archive(
            filename,
            &filepath,
            stamp.to_string(),
            BackupType::FullPortable,
            records.len() as u64,
        )
    }

    fn finish_archive(
        &self,
        filename: String,
        filepath: &Path,
        timestamp: String,
        backup_type: BackupType,
        conversation_count: u64,
    ) -> Result<BackupArchive> {
        let size = fs::metadata(filepath)
            .with_context(|| format!("failed to stat {}", filepath.display()))?
            .len();
        let content_hash = file_hash(filepath)?;
        Ok(BackupArchive {
            filename,
            filepath: filepath.display().to_string(),
            timestamp,
            size,
            compressed: self.settings.enable_compression,
            backup_type,
            conversation_count,
            content_hash,
        })
    }

    fn has_disk_space_for(&self, store: &ConversationStore) -> bool {
        let needed = fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
        match fs2::available_space(&self.settings.dir) {
            Ok(available) => available >= needed,
            Err(err) => {
                // Unknown capacity is not a reason to refuse the backup.
                warn::emit(
                    "DISK_SPACE_UNKNOWN",
                    "backup",
                    &self.settings.dir.display().to_string(),
                    "available-space-query-failed",
                    &err.to_string(),
                );
                true
            }
        }
    }

    /// Delete backup files that fall outside the retention policy:
    /// walking newest to oldest, a file survives only while it is both
    /// within the count cap and younger than the retention window.
    pub fn cleanup_old_backups(&self) -> CleanupOutcome {
        let mut out = CleanupOutcome::default();

        let entries = match fs::read_dir(&self.settings.dir) {
            Ok(entries) => entries,
            Err(err) => {
                out.issues
                    .push(format!("failed to read {}: {err}", self.settings.dir.display()));
                return out;
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !is_backup_filename(name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(self.settings.retention_days) * 86_400));

        for (index, (modified, path)) in files.iter().enumerate() {
            let within_cap = index < self.settings.max_backups;
            let young_enough = cutoff.is_none_or(|cut| *modified >= cut);
            if within_cap && young_enough {
                continue;
            }

            match fs::remove_file(path) {
                Ok(()) => out.removed += 1,
                Err(err) => {
                    warn::emit(
                        "CLEANUP_SKIP",
                        "cleanup",
                        &path.display().to_string(),
                        "remove-failed",
                        &err.to_string(),
                    );
                    out.issues
                        .push(format!("failed to remove {}: {err}", path.display()));
                }
            }
        }

        if out.removed > 0 {
            let _ = audit::append_event(
                &self.settings.dir,
                "cleanup",
                "done",
                &format!("removed {} backup file(s)", out.removed),
            );
        }
        out
    }

    /// Check a backup file's integrity. Invalid or truncated content is
    /// `Ok(false)`; only I/O-level failures (missing file, permissions)
    /// surface as errors.
    pub fn verify_backup(&self, path: &Path) -> Result<bool> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(false);
        };
        let Some(format) = codec::detect_format(name) else {
            return Ok(false);
        };

        match format.encoding {
            Encoding::Native => {
                let file = fs::File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let mut reader: Box<dyn Read> = if format.compressed {
                    Box::new(flate2::read::GzDecoder::new(file))
                } else {
                    Box::new(file)
                };
                let mut header = [0u8; 16];
                match reader.read_exact(&mut header) {
                    Ok(()) => Ok(codec::has_native_magic(&header)),
                    Err(_) => Ok(false),
                }
            }
            Encoding::Portable => {
                let raw = fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let bytes = if format.compressed {
                    let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
                    let mut inflated = Vec::new();
                    if decoder.read_to_end(&mut inflated).is_err() {
                        return Ok(false);
                    }
                    inflated
                } else {
                    raw
                };
                let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
                    return Ok(false);
                };
                Ok(value.get("generated_at").is_some() && value.get("records").is_some())
            }
            Encoding::Tabular => Ok(false),
        }
    }

    /// The recorded history, oldest first. A missing or corrupt sidecar
    /// reads as empty; corruption is reported but never fatal.
    pub fn backup_history(&self) -> Vec<BackupArchive> {
        let path = self.history_path();
        if !path.exists() {
            return Vec::new();
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn::emit(
                    "HISTORY_UNREADABLE",
                    "history",
                    &path.display().to_string(),
                    "read-failed",
                    &err.to_string(),
                );
                return Vec::new();
            }
        };
        match serde_json::from_str::<HistoryFile>(&raw) {
            Ok(history) => history.backups,
            Err(err) => {
                warn::emit(
                    "HISTORY_CORRUPT",
                    "history",
                    &path.display().to_string(),
                    "parse-failed",
                    &err.to_string(),
                );
                Vec::new()
            }
        }
    }

    /// Append to the sidecar, dropping the oldest entries past the cap.
    /// History writes are bookkeeping: a failure is reported and the
    /// backup itself stands.
    fn record_archive(&self, archive: &BackupArchive) {
        let mut backups = self.backup_history();
        backups.push(archive.clone());
        if backups.len() > HISTORY_CAP {
            let excess = backups.len() - HISTORY_CAP;
            backups.drain(..excess);
        }

        let history = HistoryFile {
            last_updated: now_iso(),
            backups,
        };
        let written = serde_json::to_string_pretty(&history)
            .map_err(anyhow::Error::from)
            .and_then(|data| {
                fs::write(self.history_path(), format!("{data}\n")).map_err(anyhow::Error::from)
            });
        if let Err(err) = written {
            warn::emit(
                "HISTORY_WRITE_FAILED",
                "history",
                &self.history_path().display().to_string(),
                "write-failed",
                &format!("{err:#}"),
            );
        }

        let _ = audit::append_event(
            &self.settings.dir,
            "backup",
            "created",
            &format!("{} ({} bytes)", archive.filename, archive.size),
        );
    }

    /// Roll-up over the backup files currently on disk.
    pub fn backup_stats(&self) -> Result<BackupStats> {
        let mut stats = BackupStats {
            backup_directory: self.settings.dir.display().to_string(),
            ..BackupStats::default()
        };
        if !self.settings.dir.exists() {
            return Ok(stats);
        }

        let mut files: Vec<(SystemTime, String, u64)> = Vec::new();
        for entry in fs::read_dir(&self.settings.dir)?.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !is_backup_filename(name) {
                continue;
            }
            let meta = entry.metadata()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, name.to_string(), meta.len()));
        }
        if files.is_empty() {
            return Ok(stats);
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        stats.total_backups = files.len();
        stats.oldest_backup = files.first().map(|f| f.1.clone());
        stats.newest_backup = files.last().map(|f| f.1.clone());
        for (_, name, size) in &files {
            stats.total_size += size;
            let kind = if name.starts_with(INCREMENTAL_PREFIX) {
                "incremental"
            } else if codec::detect_format(name)
                .is_some_and(|f| f.encoding == Encoding::Native)
            {
                "native"
            } else {
                "portable"
            };
            *stats.by_type.entry(kind.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

fn remove_partial(path: &Path) {
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        warn::emit(
            "PARTIAL_CLEANUP_FAILED",
            "backup",
            &path.display().to_string(),
            "remove-failed",
            &err.to_string(),
        );
    }
}

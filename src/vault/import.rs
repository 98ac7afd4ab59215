use crate::error::SecurityError;
use crate::vault::codec::{self, Encoding, IncomingRecord};
use crate::vault::guard;
use crate::vault::store::ConversationStore;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// What to do when an incoming record's key already exists in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Skip,
    Update,
    Overwrite,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Update => "update",
            Self::Overwrite => "overwrite",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "update" => Ok(Self::Update),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(anyhow::anyhow!(
                "invalid conflict policy `{other}`: use `skip`, `update`, or `overwrite`"
            )),
        }
    }
}

/// Outcome of one import batch. `success == false` means the file-level
/// read or parse failed before any record was reached; per-record errors
/// accumulate in `errors` without aborting the batch.
#[derive(Debug, Default)]
pub struct ImportResult {
    pub success: bool,
    pub imported_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
}

impl ImportResult {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.error_count += 1;
    }

    fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::default();
        result.add_error(message);
        result
    }
}

/// Read-only structural check result for a candidate import file.
#[derive(Debug)]
pub struct ValidationReport {
    pub ok: bool,
    pub message: String,
    pub declared_count: usize,
}

impl ValidationReport {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            declared_count: 0,
        }
    }
}

fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub struct ImportEngine<'a> {
    store: &'a ConversationStore,
}

impl<'a> ImportEngine<'a> {
    pub fn new(store: &'a ConversationStore) -> Self {
        Self { store }
    }

    /// Validate a candidate file without touching the store. Security
    /// failures are raised; structural problems come back in the report.
    /// Safe to call repeatedly.
    pub fn validate(&self, input: &str) -> Result<ValidationReport, SecurityError> {
        let path = guard::validate_import_path(input)?;
        let Some(format) = format_of(&path) else {
            return Ok(ValidationReport::rejected(format!(
                "unsupported file format: {}",
                path.display()
            )));
        };

        let report = match format.encoding {
            Encoding::Portable => validate_portable(&path, format.compressed),
            Encoding::Tabular => validate_tabular(&path, format.compressed),
            Encoding::Native => validate_native(&path, format.compressed),
        };
        Ok(report)
    }

    /// Import every record in the file under `policy`. Records already
    /// merged stay merged if a later record fails; there is no rollback.
    pub fn import_file(
        &self,
        input: &str,
        policy: ConflictPolicy,
    ) -> Result<ImportResult, SecurityError> {
        let path = guard::validate_import_path(input)?;
        let Some(format) = format_of(&path) else {
            return Ok(ImportResult::failed(format!(
                "unsupported file format: {}",
                path.display()
            )));
        };

        let result = match format.encoding {
            Encoding::Portable => self.import_portable(&path, format.compressed, policy),
            Encoding::Tabular => self.import_tabular(&path, format.compressed, policy),
            Encoding::Native => self.import_native(&path, format.compressed, policy),
        };
        Ok(result)
    }

    /// Stream every record of a second store through the same merge
    /// logic. The other store is opened read-only and never mutated.
    pub fn merge_from_store(
        &self,
        input: &str,
        policy: ConflictPolicy,
    ) -> Result<ImportResult, SecurityError> {
        let path = guard::validate_path(input, &guard::PathRules::existing_anywhere())?;

        let other = match ConversationStore::open_read_only(&path) {
            Ok(other) => other,
            Err(err) => return Ok(ImportResult::failed(format!("failed to open source store: {err:#}"))),
        };
        let records = match other.list_all() {
            Ok(records) => records,
            Err(err) => return Ok(ImportResult::failed(format!("failed to read source store: {err:#}"))),
        };

        let mut result = ImportResult::default();
        for record in records {
            self.merge_incoming(
                &mut result,
                IncomingRecord {
                    conversation_id: Some(record.conversation_id),
                    active_task_id: record.active_task_id,
                    last_modified_at: Some(record.last_modified_at),
                    payload_raw: record.payload_raw,
                },
                policy,
            );
        }
        result.success = true;
        Ok(result)
    }

    fn import_portable(&self, path: &Path, compressed: bool, policy: ConflictPolicy) -> ImportResult {
        let bytes = match codec::read_bytes(path, compressed) {
            Ok(bytes) => bytes,
            Err(err) => return ImportResult::failed(format!("failed to read file: {err:#}")),
        };
        let document = match codec::decode_portable(&bytes) {
            Ok(document) => document,
            Err(err) => return ImportResult::failed(format!("failed to parse document: {err:#}")),
        };

        let mut result = ImportResult::default();
        for value in &document.records {
            self.merge_incoming(&mut result, IncomingRecord::from_portable_value(value), policy);
        }
        result.success = true;
        result
    }

    fn import_tabular(&self, path: &Path, compressed: bool, policy: ConflictPolicy) -> ImportResult {
        let bytes = match codec::read_bytes(path, compressed) {
            Ok(bytes) => bytes,
            Err(err) => return ImportResult::failed(format!("failed to read file: {err:#}")),
        };
        let rows = match codec::decode_tabular(&bytes) {
            Ok(rows) => rows,
            Err(err) => return ImportResult::failed(format!("failed to parse document: {err:#}")),
        };

        let mut result = ImportResult::default();
        for row in rows {
            self.merge_incoming(&mut result, row, policy);
        }
        result.success = true;
        result
    }

    fn import_native(&self, path: &Path, compressed: bool, policy: ConflictPolicy) -> ImportResult {
        // A compressed snapshot is inflated into a scoped temp file that
        // disappears with the handle on every exit path.
        let mut staged: Option<tempfile::NamedTempFile> = None;
        let snapshot_path = if compressed {
            match inflate_to_temp(path) {
                Ok(file) => {
                    let staged_path = file.path().to_path_buf();
                    staged = Some(file);
                    staged_path
                }
                Err(err) => {
                    return ImportResult::failed(format!("failed to decompress snapshot: {err:#}"));
                }
            }
        } else {
            path.to_path_buf()
        };

        let source = match ConversationStore::open_read_only(&snapshot_path) {
            Ok(source) => source,
            Err(err) => return ImportResult::failed(format!("failed to open snapshot: {err:#}")),
        };
        let records = match source.list_all() {
            Ok(records) => records,
            Err(err) => return ImportResult::failed(format!("failed to read snapshot: {err:#}")),
        };

        let mut result = ImportResult::default();
        for record in records {
            self.merge_incoming(
                &mut result,
                IncomingRecord {
                    conversation_id: Some(record.conversation_id),
                    active_task_id: record.active_task_id,
                    last_modified_at: Some(record.last_modified_at),
                    payload_raw: record.payload_raw,
                },
                policy,
            );
        }
        result.success = true;
        drop(staged);
        result
    }

    /// The single merge routine every format funnels through. Record
    /// failures land in the result and the batch keeps going.
    fn merge_incoming(
        &self,
        result: &mut ImportResult,
        incoming: IncomingRecord,
        policy: ConflictPolicy,
    ) {
        let Some(conversation_id) = incoming.conversation_id else {
            result.add_error("record missing conversation_id");
            return;
        };

        let existing = match self.store.get_by_id(&conversation_id) {
            Ok(existing) => existing,
            Err(err) => {
                result.add_error(format!(
                    "failed to look up conversation {conversation_id}: {err:#}"
                ));
                return;
            }
        };

        if existing.is_some() && policy == ConflictPolicy::Skip {
            result.skipped_count += 1;
            return;
        }

        let last_modified_at = incoming.last_modified_at.unwrap_or_else(now_iso);
        match self.store.upsert(
            &conversation_id,
            incoming.active_task_id.as_deref(),
            &incoming.payload_raw,
            &last_modified_at,
        ) {
            Ok(()) => result.imported_count += 1,
            Err(err) => result.add_error(format!(
                "failed to import conversation {conversation_id}: {err:#}"
            )),
        }
    }
}

fn format_of(path: &Path) -> Option<codec::FileFormat> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(codec::detect_format)
}

fn inflate_to_temp(path: &Path) -> Result<tempfile::NamedTempFile> {
    let bytes = codec::read_bytes(path, true)?;
    let mut file = tempfile::NamedTempFile::new().context("failed to create temp file")?;
    use std::io::Write;
    file.write_all(&bytes)
        .context("failed to stage decompressed snapshot")?;
    file.flush()?;
    Ok(file)
}

fn validate_portable(path: &Path, compressed: bool) -> ValidationReport {
    let bytes = match codec::read_bytes(path, compressed) {
        Ok(bytes) => bytes,
        Err(err) => return ValidationReport::rejected(format!("failed to read file: {err:#}")),
    };
    let document = match codec::decode_portable(&bytes) {
        Ok(document) => document,
        Err(err) => return ValidationReport::rejected(format!("{err:#}")),
    };

    // Spot-check the head of the record list; a full scan happens at
    // import time anyway.
    for (index, value) in document.records.iter().take(5).enumerate() {
        if !value.is_object() {
            return ValidationReport::rejected(format!("invalid record {index}: must be an object"));
        }
        if IncomingRecord::from_portable_value(value).conversation_id.is_none() {
            return ValidationReport::rejected(format!(
                "invalid record {index}: missing conversation_id"
            ));
        }
    }

    let count = document.records.len();
    ValidationReport {
        ok: true,
        message: format!("valid portable export with {count} conversations"),
        declared_count: count,
    }
}

fn validate_tabular(path: &Path, compressed: bool) -> ValidationReport {
    let bytes = match codec::read_bytes(path, compressed) {
        Ok(bytes) => bytes,
        Err(err) => return ValidationReport::rejected(format!("failed to read file: {err:#}")),
    };
    match codec::decode_tabular(&bytes) {
        Ok(rows) => ValidationReport {
            ok: true,
            message: format!("valid tabular export with {} conversations", rows.len()),
            declared_count: rows.len(),
        },
        Err(err) => ValidationReport::rejected(format!("{err:#}")),
    }
}

fn validate_native(path: &Path, compressed: bool) -> ValidationReport {
    let staged;
    let snapshot_path = if compressed {
        match inflate_to_temp(path) {
            Ok(file) => {
                staged = file;
                staged.path().to_path_buf()
            }
            Err(err) => {
                return ValidationReport::rejected(format!("failed to decompress snapshot: {err:#}"));
            }
        }
    } else {
        path.to_path_buf()
    };

    let header = fs::read(&snapshot_path)
        .map(|bytes| bytes.into_iter().take(16).collect::<Vec<u8>>())
        .unwrap_or_default();
    if !codec::has_native_magic(&header) {
        return ValidationReport::rejected("not a native snapshot");
    }

    match ConversationStore::open_read_only(&snapshot_path).and_then(|store| store.stats()) {
        Ok(stats) => ValidationReport {
            ok: true,
            message: format!(
                "valid native snapshot with {} conversations",
                stats.total_count
            ),
            declared_count: stats.total_count as usize,
        },
        Err(err) => ValidationReport::rejected(format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::record::ConversationRecord;

    fn target_store(dir: &Path) -> ConversationStore {
        ConversationStore::create(dir.join("target.sqlite")).expect("create store")
    }

    fn sample_records() -> Vec<ConversationRecord> {
        (1..=3)
            .map(|i| {
                ConversationRecord::new(
                    i,
                    format!("conv-{i}"),
                    None,
                    "{}".to_string(),
                    format!("2026-01-0{i}T00:00:00"),
                )
            })
            .collect()
    }

    fn write_portable(dir: &Path, name: &str, records: &[ConversationRecord]) -> String {
        let bytes = codec::encode_portable(records, "2026-03-01T00:00:00", None, None).unwrap();
        let path = dir.join(name);
        codec::write_bytes(&path, &bytes, name.ends_with(".gz")).unwrap();
        path.display().to_string()
    }

    #[test]
    fn import_inserts_new_records() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);
        let file = write_portable(tmp.path(), "export.json", &sample_records());

        let result = engine.import_file(&file, ConflictPolicy::Skip).unwrap();
        assert!(result.success);
        assert_eq!(result.imported_count, 3);
        assert_eq!(result.skipped_count, 0);
        assert_eq!(result.error_count, 0);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn second_import_under_skip_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);
        let file = write_portable(tmp.path(), "export.json.gz", &sample_records());

        let declared = engine.validate(&file).unwrap().declared_count;
        engine.import_file(&file, ConflictPolicy::Skip).unwrap();
        let second = engine.import_file(&file, ConflictPolicy::Skip).unwrap();

        assert!(second.success);
        assert_eq!(second.imported_count, 0);
        assert_eq!(second.skipped_count, declared);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn overwrite_replaces_existing_payload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        store
            .upsert("conv-1", None, r#"{"old":true}"#, "2025-01-01T00:00:00")
            .unwrap();
        let engine = ImportEngine::new(&store);
        let file = write_portable(tmp.path(), "export.json", &sample_records());

        let result = engine.import_file(&file, ConflictPolicy::Overwrite).unwrap();
        assert_eq!(result.imported_count, 3);
        assert_eq!(result.skipped_count, 0);

        let merged = store.get_by_id("conv-1").unwrap().expect("record");
        assert_eq!(merged.payload_raw, "{}");
        assert_eq!(merged.last_modified_at, "2026-01-01T00:00:00");
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn record_without_key_is_reported_not_fatal() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let document = serde_json::json!({
            "generated_at": "2026-03-01T00:00:00",
            "total_count": 5,
            "records": [
                {"conversation_id": "a", "payload": {}},
                {"conversation_id": "b", "payload": {}},
                {"payload": {"orphan": true}},
                {"conversation_id": "c", "payload": {}},
                {"conversation_id": "d", "payload": {}},
            ],
        });
        let path = tmp.path().join("export.json");
        fs::write(&path, document.to_string()).unwrap();

        let result = engine
            .import_file(path.to_str().unwrap(), ConflictPolicy::Skip)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.imported_count, 4);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors.len(), result.error_count);
    }

    #[test]
    fn malformed_file_fails_at_file_level() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let path = tmp.path().join("broken.json");
        fs::write(&path, "{ nope").unwrap();
        let result = engine
            .import_file(path.to_str().unwrap(), ConflictPolicy::Skip)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.imported_count, 0);
        assert_eq!(result.error_count, 1);
    }

    #[test]
    fn unsupported_format_is_an_explicit_failure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let path = tmp.path().join("export.txt");
        fs::write(&path, "hello").unwrap();

        let validation = engine.validate(path.to_str().unwrap()).unwrap();
        assert!(!validation.ok);
        assert!(validation.message.contains("unsupported file format"));

        let result = engine
            .import_file(path.to_str().unwrap(), ConflictPolicy::Skip)
            .unwrap();
        assert!(!result.success);
    }

    #[test]
    fn traversal_input_raises_security_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let err = engine.validate("../../etc/passwd").unwrap_err();
        assert!(matches!(err, SecurityError::Traversal(_)));
        let err = engine
            .import_file("../../etc/passwd", ConflictPolicy::Skip)
            .unwrap_err();
        assert!(matches!(err, SecurityError::Traversal(_)));
    }

    #[test]
    fn tabular_import_parses_rows() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let records = sample_records();
        let bytes = codec::encode_tabular(&records).unwrap();
        let path = tmp.path().join("export.csv");
        fs::write(&path, bytes).unwrap();

        let validation = engine.validate(path.to_str().unwrap()).unwrap();
        assert!(validation.ok, "{}", validation.message);
        assert_eq!(validation.declared_count, 3);

        let result = engine
            .import_file(path.to_str().unwrap(), ConflictPolicy::Update)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.imported_count, 3);
    }

    #[test]
    fn merge_from_store_respects_skip_policy() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = target_store(tmp.path());
        store
            .upsert("conv-1", None, "{}", "2025-06-01T00:00:00")
            .unwrap();

        let other = ConversationStore::create(tmp.path().join("other.sqlite")).unwrap();
        other
            .upsert("conv-1", None, r#"{"theirs":1}"#, "2026-06-01T00:00:00")
            .unwrap();
        other
            .upsert("conv-9", None, "{}", "2026-06-02T00:00:00")
            .unwrap();
        drop(other);

        let engine = ImportEngine::new(&store);
        let result = engine
            .merge_from_store(
                tmp.path().join("other.sqlite").to_str().unwrap(),
                ConflictPolicy::Skip,
            )
            .unwrap();

        assert!(result.success);
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.skipped_count, 1);
        let kept = store.get_by_id("conv-1").unwrap().expect("record");
        assert_eq!(kept.payload_raw, "{}");
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn native_snapshot_import_round_trips() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = ConversationStore::create(tmp.path().join("source.sqlite")).unwrap();
        source
            .upsert("conv-a", Some("task"), r#"{"n":1}"#, "2026-01-01T00:00:00")
            .unwrap();
        let snapshot = tmp.path().join("convault_backup_20260101_000000.sqlite");
        source.snapshot_raw_to(&snapshot).unwrap();

        let store = target_store(tmp.path());
        let engine = ImportEngine::new(&store);

        let validation = engine.validate(snapshot.to_str().unwrap()).unwrap();
        assert!(validation.ok, "{}", validation.message);
        assert_eq!(validation.declared_count, 1);

        let result = engine
            .import_file(snapshot.to_str().unwrap(), ConflictPolicy::Update)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.imported_count, 1);
        assert_eq!(
            store.get_by_id("conv-a").unwrap().expect("record").active_task_id.as_deref(),
            Some("task")
        );
    }
}

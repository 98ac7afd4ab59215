use crate::vault::record::ConversationRecord;
use crate::vault::store::StoreStats;
use anyhow::{Context, Result, anyhow};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// First bytes of a raw store snapshot. The on-disk header is 16 bytes;
/// everything after the format name is version-dependent.
pub const NATIVE_MAGIC: &[u8] = b"SQLite format 3";

pub const COMPRESSED_SUFFIX: &str = "gz";

pub const TABULAR_HEADER: [&str; 8] = [
    "ID",
    "Conversation ID",
    "Active Task ID",
    "Last Modified",
    "Message Count",
    "Summary",
    "Data Size",
    "Raw Data",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Verbatim copy of the store's database file.
    Native,
    /// Structured-record JSON document.
    Portable,
    /// One CSV row per record.
    Tabular,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Portable => "portable",
            Self::Tabular => "tabular",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFormat {
    pub encoding: Encoding,
    pub compressed: bool,
}

fn encoding_for_extension(ext: &str) -> Option<Encoding> {
    match ext.to_ascii_lowercase().as_str() {
        "sqlite" => Some(Encoding::Native),
        "json" => Some(Encoding::Portable),
        "csv" => Some(Encoding::Tabular),
        _ => None,
    }
}

/// Decide a file's exchange format from its name alone.
///
/// A trailing `.gz` marks compression and detection re-applies to the
/// stem, so `backup.json.gz` is compressed-portable. Unrecognized names
/// yield `None`; callers must refuse them rather than guess.
pub fn detect_format(name: &str) -> Option<FileFormat> {
    let path = Path::new(name);
    let ext = path.extension()?.to_str()?;

    if ext.eq_ignore_ascii_case(COMPRESSED_SUFFIX) {
        let stem = path.file_stem()?.to_str()?;
        let inner = Path::new(stem).extension()?.to_str()?;
        return encoding_for_extension(inner).map(|encoding| FileFormat {
            encoding,
            compressed: true,
        });
    }

    encoding_for_extension(ext).map(|encoding| FileFormat {
        encoding,
        compressed: false,
    })
}

/// Read a file, transparently inflating it when `compressed` is set.
pub fn read_bytes(path: &Path, compressed: bool) -> Result<Vec<u8>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if !compressed {
        return Ok(raw);
    }
    let mut decoder = GzDecoder::new(&raw[..]);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .with_context(|| format!("failed to decompress {}", path.display()))?;
    Ok(inflated)
}

/// Write a file, gzip-compressing the bytes when `compressed` is set.
pub fn write_bytes(path: &Path, data: &[u8], compressed: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if !compressed {
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        return Ok(());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let deflated = encoder.finish()?;
    fs::write(path, deflated).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn has_native_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 16 && bytes.starts_with(NATIVE_MAGIC)
}

/// Top-level shape of the portable exchange document.
#[derive(Debug, Serialize, Deserialize)]
pub struct PortableDocument {
    pub generated_at: String,
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_stats: Option<StoreStats>,
    pub records: Vec<Value>,
}

/// A record pulled out of an exchange document, before it is merged.
/// `conversation_id` stays optional here so the merge loop can report the
/// missing-key case per record instead of dropping it silently.
#[derive(Debug, Clone)]
pub struct IncomingRecord {
    pub conversation_id: Option<String>,
    pub active_task_id: Option<String>,
    pub last_modified_at: Option<String>,
    pub payload_raw: String,
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

impl IncomingRecord {
    /// Extract the merge-relevant fields from one portable record object.
    pub fn from_portable_value(value: &Value) -> Self {
        let payload_raw = match value.get("payload") {
            Some(Value::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        Self {
            conversation_id: non_empty(value.get("conversation_id")),
            active_task_id: non_empty(value.get("active_task_id")),
            last_modified_at: non_empty(value.get("last_modified_at")),
            payload_raw,
        }
    }
}

fn portable_record_value(record: &ConversationRecord) -> Value {
    let payload = record
        .payload
        .clone()
        .unwrap_or_else(|| Value::String(record.payload_raw.clone()));
    json!({
        "id": record.id,
        "conversation_id": record.conversation_id,
        "active_task_id": record.active_task_id,
        "last_modified_at": record.last_modified_at,
        "message_count": record.message_count,
        "summary": record.summary(),
        "payload": payload,
    })
}

pub fn encode_portable(
    records: &[ConversationRecord],
    generated_at: &str,
    since_timestamp: Option<&str>,
    store_stats: Option<StoreStats>,
) -> Result<Vec<u8>> {
    let document = PortableDocument {
        generated_at: generated_at.to_string(),
        total_count: records.len(),
        since_timestamp: since_timestamp.map(ToOwned::to_owned),
        store_stats,
        records: records.iter().map(portable_record_value).collect(),
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

/// Parse a portable document. The document must be a JSON object carrying
/// a `records` array; anything else is a structural failure. Individual
/// record objects are *not* validated here — per-record problems belong to
/// the merge loop's error accumulation.
pub fn decode_portable(bytes: &[u8]) -> Result<PortableDocument> {
    let value: Value = serde_json::from_slice(bytes).context("invalid JSON document")?;
    let Value::Object(mut map) = value else {
        return Err(anyhow!("invalid document: root must be an object"));
    };
    let Some(records_value) = map.remove("records") else {
        return Err(anyhow!("invalid document: missing 'records' key"));
    };
    let Value::Array(records) = records_value else {
        return Err(anyhow!("invalid document: 'records' must be an array"));
    };

    Ok(PortableDocument {
        generated_at: map
            .get("generated_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        total_count: map
            .get("total_count")
            .and_then(Value::as_u64)
            .unwrap_or(records.len() as u64) as usize,
        since_timestamp: map
            .get("since_timestamp")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        store_stats: None,
        records,
    })
}

pub fn encode_tabular(records: &[ConversationRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TABULAR_HEADER)?;
    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.conversation_id.clone(),
            record.active_task_id.clone().unwrap_or_default(),
            record.last_modified_at.clone(),
            record.message_count.to_string(),
            record.summary(),
            record.payload_raw.len().to_string(),
            record.payload_raw.clone(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush tabular writer: {err}"))
}

/// Parse a tabular document into incoming records.
///
/// The three columns `Conversation ID`, `Last Modified`, and `Raw Data`
/// must be present by name; a row's `Raw Data` is kept verbatim when it is
/// not valid JSON, re-serialized when it is.
pub fn decode_tabular(bytes: &[u8]) -> Result<Vec<IncomingRecord>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers().context("invalid CSV: unreadable header")?.clone();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let required = ["Conversation ID", "Last Modified", "Raw Data"];
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| column(name).is_none())
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!("missing required columns: {}", missing.join(", ")));
    }

    let id_col = column("Conversation ID").unwrap();
    let modified_col = column("Last Modified").unwrap();
    let data_col = column("Raw Data").unwrap();
    let task_col = column("Active Task ID");

    let cell = |row: &csv::StringRecord, idx: usize| -> Option<String> {
        row.get(idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
    };

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.context("invalid CSV row")?;
        let raw = cell(&row, data_col).unwrap_or_else(|| "{}".to_string());
        let payload_raw = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value.to_string(),
            Err(_) => raw,
        };
        out.push(IncomingRecord {
            conversation_id: cell(&row, id_col),
            active_task_id: task_col.and_then(|idx| cell(&row, idx)),
            last_modified_at: cell(&row, modified_col),
            payload_raw,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: i64, conversation_id: &str, payload: &str) -> ConversationRecord {
        ConversationRecord::new(
            id,
            conversation_id.to_string(),
            Some("task-1".to_string()),
            payload.to_string(),
            "2026-03-01T10:00:00".to_string(),
        )
    }

    #[test]
    fn format_detection_handles_double_suffixes() {
        let json_gz = detect_format("convault_backup_x.json.gz").unwrap();
        assert_eq!(json_gz.encoding, Encoding::Portable);
        assert!(json_gz.compressed);

        let sqlite = detect_format("convault_backup_x.sqlite").unwrap();
        assert_eq!(sqlite.encoding, Encoding::Native);
        assert!(!sqlite.compressed);

        let csv = detect_format("export.CSV").unwrap();
        assert_eq!(csv.encoding, Encoding::Tabular);

        assert!(detect_format("notes.txt").is_none());
        assert!(detect_format("archive.tar.gz").is_none());
        assert!(detect_format("plain.gz").is_none());
    }

    #[test]
    fn portable_round_trip_preserves_ids_and_payloads() {
        let records = vec![
            sample_record(1, "conv-a", r#"{"todo_lists":[]}"#),
            sample_record(2, "conv-b", r#"{"k":"v"}"#),
        ];
        let bytes = encode_portable(&records, "2026-03-01T10:00:00", None, None).unwrap();
        let decoded = decode_portable(&bytes).unwrap();

        assert_eq!(decoded.total_count, 2);
        let incoming: Vec<IncomingRecord> = decoded
            .records
            .iter()
            .map(IncomingRecord::from_portable_value)
            .collect();
        assert_eq!(incoming[0].conversation_id.as_deref(), Some("conv-a"));
        assert_eq!(incoming[1].conversation_id.as_deref(), Some("conv-b"));
        assert_eq!(
            serde_json::from_str::<Value>(&incoming[1].payload_raw).unwrap(),
            serde_json::json!({"k": "v"})
        );
    }

    #[test]
    fn decode_rejects_documents_without_records() {
        assert!(decode_portable(b"[1,2,3]").is_err());
        assert!(decode_portable(br#"{"generated_at":"x"}"#).is_err());
        assert!(decode_portable(b"not json").is_err());
    }

    #[test]
    fn tabular_round_trip_and_required_columns() {
        let records = vec![sample_record(7, "conv-c", r#"{"n":1}"#)];
        let bytes = encode_tabular(&records).unwrap();
        let rows = decode_tabular(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("conv-c"));
        assert_eq!(rows[0].active_task_id.as_deref(), Some("task-1"));

        let err = decode_tabular(b"A,B\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("missing required columns"));
    }

    #[test]
    fn tabular_payload_falls_back_to_raw_text() {
        let bytes =
            b"Conversation ID,Last Modified,Raw Data\nconv-x,2026-01-01,not json\n".to_vec();
        let rows = decode_tabular(&bytes).unwrap();
        assert_eq!(rows[0].payload_raw, "not json");
    }

    #[test]
    fn gzip_layer_round_trips() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("data.json.gz");
        write_bytes(&path, b"{\"records\":[]}", true).unwrap();
        let back = read_bytes(&path, true).unwrap();
        assert_eq!(back, b"{\"records\":[]}");
    }
}

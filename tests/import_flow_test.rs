use assert_cmd::prelude::*;
use predicates::prelude::*;
use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use std::process::Command;

fn seed_store(path: &Path, rows: &[(&str, &str, &str)]) {
    let conn = Connection::open(path).expect("open store");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL UNIQUE,
            active_task_id TEXT,
            conversation_data TEXT NOT NULL,
            last_modified_at TEXT NOT NULL
        );",
    )
    .expect("create schema");
    for (conversation_id, data, modified) in rows {
        conn.execute(
            "INSERT INTO agent_conversations (conversation_id, conversation_data, last_modified_at)
             VALUES (?1, ?2, ?3)",
            params![conversation_id, data, modified],
        )
        .expect("insert row");
    }
}

fn row_count(path: &Path) -> i64 {
    let conn = Connection::open(path).expect("open store");
    conn.query_row("SELECT COUNT(*) FROM agent_conversations", [], |row| {
        row.get(0)
    })
    .expect("count")
}

fn convault(tmp: &Path, store: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_convault"));
    cmd.env("CONVAULT_DB_PATH", store)
        .env("CONVAULT_BACKUP_DIR", tmp.join("backups"))
        .env("CONVAULT_CONFIG_PATH", tmp.join("no-config.toml"));
    cmd
}

fn write_export(tmp: &Path) -> std::path::PathBuf {
    let document = serde_json::json!({
        "generated_at": "2026-03-01T00:00:00",
        "total_count": 2,
        "records": [
            {"conversation_id": "conv-a", "last_modified_at": "2026-01-01T00:00:00", "payload": {}},
            {"conversation_id": "conv-b", "last_modified_at": "2026-01-02T00:00:00", "payload": {"todo_lists": []}},
        ],
    });
    let path = tmp.join("export.json");
    fs::write(&path, document.to_string()).expect("write export");
    path
}

#[test]
fn import_inserts_records_from_portable_export() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[]);
    let export = write_export(tmp.path());

    convault(tmp.path(), &store)
        .arg("import")
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported=2 skipped=0 errors=0"));

    assert_eq!(row_count(&store), 2);
}

#[test]
fn reimport_under_skip_policy_is_idempotent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[]);
    let export = write_export(tmp.path());

    convault(tmp.path(), &store)
        .arg("import")
        .arg(&export)
        .assert()
        .success();

    convault(tmp.path(), &store)
        .arg("import")
        .arg(&export)
        .args(["--policy", "skip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("imported=0 skipped=2 errors=0"));

    assert_eq!(row_count(&store), 2);
}

#[test]
fn traversal_path_is_refused_with_security_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[]);

    convault(tmp.path(), &store)
        .arg("import")
        .arg("../../etc/passwd")
        .assert()
        .failure()
        .stderr(predicate::str::contains("directory traversal"));

    assert_eq!(row_count(&store), 0);
}

#[test]
fn validate_reports_declared_count_without_mutating() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[]);
    let export = write_export(tmp.path());

    convault(tmp.path(), &store)
        .arg("validate")
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("declared_count=2"));

    assert_eq!(row_count(&store), 0);
}

#[test]
fn unsupported_format_fails_validation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[]);
    let stray = tmp.path().join("notes.txt");
    fs::write(&stray, "hello").expect("write");

    convault(tmp.path(), &store)
        .arg("validate")
        .arg(&stray)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file format"));
}

#[test]
fn export_then_import_round_trips_via_csv() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(
        &store,
        &[
            ("conv-a", r#"{"todo_lists":[]}"#, "2026-01-01T00:00:00"),
            ("conv-b", "{}", "2026-01-02T00:00:00"),
        ],
    );

    let out = tmp.path().join("conversations.csv");
    convault(tmp.path(), &store)
        .arg("export")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported 2 conversations"));

    let fresh = tmp.path().join("fresh.sqlite");
    seed_store(&fresh, &[]);
    convault(tmp.path(), &fresh)
        .arg("import")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported=2 skipped=0 errors=0"));
    assert_eq!(row_count(&fresh), 2);
}

#[test]
fn merge_streams_records_from_second_store() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = tmp.path().join("store.sqlite");
    seed_store(&store, &[("conv-1", "{}", "2026-01-01T00:00:00")]);

    let other = tmp.path().join("other.sqlite");
    seed_store(
        &other,
        &[
            ("conv-1", r#"{"theirs":true}"#, "2026-02-01T00:00:00"),
            ("conv-2", "{}", "2026-02-02T00:00:00"),
        ],
    );

    convault(tmp.path(), &store)
        .arg("merge")
        .arg(&other)
        .args(["--policy", "skip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("imported=1 skipped=1 errors=0"));

    assert_eq!(row_count(&store), 2);
}

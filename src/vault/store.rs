use crate::vault::record::ConversationRecord;
use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent_conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL UNIQUE,
    active_task_id TEXT,
    conversation_data TEXT NOT NULL,
    last_modified_at TEXT NOT NULL
);
";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_count: u64,
    pub total_payload_bytes: u64,
    pub oldest_timestamp: Option<String>,
    pub newest_timestamp: Option<String>,
}

/// Narrow handle over the conversation store.
///
/// The engine only reads records, upserts records, and takes raw
/// snapshots; everything else the underlying database can do is out of
/// scope here.
pub struct ConversationStore {
    conn: Connection,
    path: PathBuf,
}

impl ConversationStore {
    /// Open an existing store for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow!("conversation store not found at {}", path.display()));
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a store read-only, e.g. a second store being merged in. Fails
    /// when the file is missing or carries no conversation table.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open store {}", path.display()))?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        if !store.has_conversation_table()? {
            return Err(anyhow!(
                "{} has no agent_conversations table",
                path.display()
            ));
        }
        Ok(store)
    }

    /// Create a store (schema included) at `path`, or open it if present.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create store {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_conversation_table(&self) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'agent_conversations'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, active_task_id, conversation_data, last_modified_at
             FROM agent_conversations
             ORDER BY last_modified_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_by_id(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, active_task_id, conversation_data, last_modified_at
             FROM agent_conversations
             WHERE conversation_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![conversation_id], row_to_record)
            .optional()?)
    }

    /// Insert the record or overwrite the existing row with the same
    /// `conversation_id`. The unique key makes this the only write path.
    pub fn upsert(
        &self,
        conversation_id: &str,
        active_task_id: Option<&str>,
        payload_raw: &str,
        last_modified_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO agent_conversations
                 (conversation_id, active_task_id, conversation_data, last_modified_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 active_task_id = excluded.active_task_id,
                 conversation_data = excluded.conversation_data,
                 last_modified_at = excluded.last_modified_at",
            params![conversation_id, active_task_id, payload_raw, last_modified_at],
        )?;
        Ok(())
    }

    /// Byte-for-byte snapshot of the store into a fresh database file,
    /// via the engine's online backup primitive.
    pub fn snapshot_raw_to(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut target = Connection::open(destination)
            .with_context(|| format!("failed to open snapshot target {}", destination.display()))?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut target)?;
        backup
            .run_to_completion(64, Duration::from_millis(50), None)
            .with_context(|| format!("snapshot to {} failed", destination.display()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let total_count: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM agent_conversations", [], |row| {
                    row.get(0)
                })?;

        let (oldest, newest, bytes): (Option<String>, Option<String>, Option<u64>) =
            self.conn.query_row(
                "SELECT MIN(last_modified_at), MAX(last_modified_at),
                        SUM(LENGTH(conversation_data))
                 FROM agent_conversations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        Ok(StoreStats {
            total_count,
            total_payload_bytes: bytes.unwrap_or(0),
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord::new(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

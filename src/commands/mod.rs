pub mod backup;
pub mod cleanup;
pub mod export;
pub mod history;
pub mod import;
pub mod incremental;
pub mod merge;
pub mod status;
pub mod validate;
pub mod verify;

use crate::vault::config::VaultConfig;
use crate::vault::store::ConversationStore;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn open_store(config: &VaultConfig) -> Result<ConversationStore> {
    ConversationStore::open(&config.store.db_path).with_context(|| {
        format!(
            "conversation store unavailable at {} (set CONVAULT_DB_PATH or [store].db_path)",
            config.store.db_path.display()
        )
    })
}

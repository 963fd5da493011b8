//! Read-only access to persisted conversations.
//!
//! Expected schema (owned by whatever writes the database):
//!
//! ```sql
//! CREATE TABLE messages (
//!   id TEXT PRIMARY KEY,
//!   conversation_id TEXT NOT NULL,
//!   content TEXT NOT NULL,
//!   role TEXT NOT NULL,        -- 'user' | 'assistant'
//!   created_at INTEGER NOT NULL -- epoch milliseconds
//! );
//! ```

use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use parley_core::{HistoryRecord, HistorySource, Role, SyncError};
use rusqlite::{params, Connection, OpenFlags};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SqliteHistory {
    db_path: PathBuf,
    conversation_id: String,
}

impl SqliteHistory {
    pub fn new(db_path: PathBuf, conversation_id: impl Into<String>) -> Self {
        Self {
            db_path,
            conversation_id: conversation_id.into(),
        }
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| format!("{}: {e}", self.db_path.display()))
    }

    pub fn load_records(&self) -> Result<Vec<HistoryRecord>, String> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, content, role, created_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(params![self.conversation_id])
            .map_err(|e| e.to_string())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let id: String = row.get(0).map_err(|e| e.to_string())?;
            let raw_role: String = row.get(2).map_err(|e| e.to_string())?;
            let Some(role) = parse_role(&raw_role) else {
                warn!(%id, role = %raw_role, "skipping history row with unknown role");
                continue;
            };
            let created_ms: i64 = row.get(3).map_err(|e| e.to_string())?;
            let created_at = match Utc.timestamp_millis_opt(created_ms).single() {
                Some(at) => at,
                None => {
                    warn!(
                        %id,
                        created_at = created_ms,
                        "history row has out-of-range timestamp, using now"
                    );
                    Utc::now()
                }
            };
            records.push(HistoryRecord {
                id,
                content: row.get(1).map_err(|e| e.to_string())?,
                role,
                created_at,
            });
        }
        Ok(records)
    }
}

impl HistorySource for SqliteHistory {
    fn load(&self) -> parley_core::Result<Vec<HistoryRecord>> {
        self.load_records().map_err(SyncError::History)
    }
}

fn parse_role(raw: &str) -> Option<Role> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

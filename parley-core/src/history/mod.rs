//! Persistence seam, read-only.
//!
//! History is used for exactly one thing: seeding a frozen preview
//! transcript. This core never writes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Message, MessageId, Role};

/// One persisted message, in conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<HistoryRecord> for Message {
    fn from(record: HistoryRecord) -> Self {
        Message::history(
            MessageId::new(record.id),
            record.content,
            record.role,
            record.created_at,
        )
    }
}

/// Contract for persisted conversation backends.
pub trait HistorySource: Send + Sync {
    /// Load the conversation, oldest first.
    ///
    /// # Errors
    /// Backend-specific failures, mapped to `SyncError::History`.
    fn load(&self) -> Result<Vec<HistoryRecord>>;
}

/// A fixed, in-memory history.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory(pub Vec<HistoryRecord>);

impl HistorySource for StaticHistory {
    fn load(&self) -> Result<Vec<HistoryRecord>> {
        Ok(self.0.clone())
    }
}

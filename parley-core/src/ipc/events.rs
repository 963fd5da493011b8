//! Events emitted to the rendering layer.
//!
//! ## Channels
//!
//! | Event | Receiver |
//! |-------|----------|
//! | `TranscriptEvent` | `SyncEngine::subscribe_transcript` |
//! | `SessionStatusEvent` | `SyncEngine::subscribe_status` |

use serde::{Deserialize, Serialize};

use crate::store::{Message, MessageId};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// One mutation of the transcript, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TranscriptChange {
    Appended { message: Message },
    /// Streaming content changed; carries the full content so far.
    Updated { id: MessageId, content: String },
    Finalized { message: Message },
    /// A pending optimistic message was confirmed delivered.
    Confirmed { id: MessageId },
    Cleared,
    /// The transcript was replaced by persisted history (preview).
    Seeded { messages: Vec<Message> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub change: TranscriptChange,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session; nothing is subscribed.
    #[default]
    Idle,
    /// Connected session, frames are being dispatched.
    Live,
    /// Frozen transcript seeded from history.
    Preview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail.
    pub detail: Option<String>,
}

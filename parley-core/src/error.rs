use thiserror::Error;

use crate::store::MessageId;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no message with id {id}")]
    UnknownMessage { id: MessageId },

    #[error("message {id} is not streaming")]
    NotStreaming { id: MessageId },

    #[error("message {active} is already streaming")]
    StreamAlreadyActive { active: MessageId },

    #[error("transcript is read-only (preview session)")]
    ReadOnly,

    #[error("no session is active")]
    NotActive,

    #[error("transport send failed: {0}")]
    Send(String),

    #[error("history load failed: {0}")]
    History(String),

    #[error("dispatch loop has shut down")]
    DispatchClosed,
}

pub type Result<T> = std::result::Result<T, SyncError>;

//! The ordered message log shared by every producer.
//!
//! The log is append-only. The only in-place edits are:
//! - content of the single `streaming=true` message (aggregator only),
//! - the pending → finalized flip of an optimistic local message (`confirm`).
//!
//! Truncation happens only through `clear()`, which the lifecycle manager
//! owns. Every mutation is recorded as a [`TranscriptChange`] so the dispatch
//! loop can forward it to renderers.

pub mod message;

use std::collections::HashMap;

pub use message::{Message, MessageId, Origin, Role};

use crate::error::{Result, SyncError};
use crate::ipc::events::TranscriptChange;

/// Content write applied to the in-flight streaming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// Append a token to the current content.
    Delta(String),
    /// Replace the current content.
    Full(String),
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    /// Position of the message with `streaming=true`, if any.
    streaming: Option<usize>,
    frozen: bool,
    changes: Vec<TranscriptChange>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end of the log.
    ///
    /// Returns `Ok(false)` without touching the log when the id is already
    /// present.
    ///
    /// # Errors
    /// - `SyncError::ReadOnly` if the store is frozen.
    /// - `SyncError::StreamAlreadyActive` when appending a streaming message
    ///   while another one is in flight.
    pub fn append(&mut self, msg: Message) -> Result<bool> {
        self.ensure_writable()?;
        if self.index.contains_key(&msg.id) {
            return Ok(false);
        }
        if msg.streaming {
            if let Some(active) = self.streaming {
                return Err(SyncError::StreamAlreadyActive {
                    active: self.messages[active].id.clone(),
                });
            }
            self.streaming = Some(self.messages.len());
        }

        self.index.insert(msg.id.clone(), self.messages.len());
        self.changes.push(TranscriptChange::Appended {
            message: msg.clone(),
        });
        self.messages.push(msg);
        Ok(true)
    }

    /// Write content into the in-flight streaming message.
    ///
    /// # Errors
    /// - `SyncError::UnknownMessage` if `id` is not in the log.
    /// - `SyncError::NotStreaming` if the target is not `streaming=true`.
    pub fn append_or_update_streaming(&mut self, id: &MessageId, update: StreamUpdate) -> Result<()> {
        self.ensure_writable()?;
        let pos = self.streaming_position(id)?;
        let msg = &mut self.messages[pos];
        match update {
            StreamUpdate::Delta(delta) => msg.content.push_str(&delta),
            StreamUpdate::Full(full) => msg.content = full,
        }
        self.changes.push(TranscriptChange::Updated {
            id: msg.id.clone(),
            content: msg.content.clone(),
        });
        Ok(())
    }

    /// Close the streaming message with its final content.
    ///
    /// # Errors
    /// Same as [`append_or_update_streaming`](Self::append_or_update_streaming).
    pub fn finalize(&mut self, id: &MessageId, final_content: String) -> Result<&Message> {
        self.ensure_writable()?;
        let pos = self.streaming_position(id)?;
        self.streaming = None;

        let msg = &mut self.messages[pos];
        msg.content = final_content;
        msg.streaming = false;
        msg.finalized = true;
        self.changes.push(TranscriptChange::Finalized {
            message: msg.clone(),
        });
        Ok(&self.messages[pos])
    }

    /// Mark a pending optimistic message as delivered.
    ///
    /// Returns `Ok(false)` if the message was already finalized.
    pub fn confirm(&mut self, id: &MessageId) -> Result<bool> {
        self.ensure_writable()?;
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| SyncError::UnknownMessage { id: id.clone() })?;
        let msg = &mut self.messages[pos];
        if !msg.is_pending() {
            return Ok(false);
        }
        msg.finalized = true;
        self.changes
            .push(TranscriptChange::Confirmed { id: msg.id.clone() });
        Ok(true)
    }

    /// Empty the log and lift any preview freeze.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
        self.streaming = None;
        self.frozen = false;
        self.changes.push(TranscriptChange::Cleared);
    }

    /// Replace the log with persisted history and freeze it.
    ///
    /// Duplicate ids in `history` keep their first occurrence.
    pub fn seed_frozen(&mut self, history: impl IntoIterator<Item = Message>) {
        self.messages.clear();
        self.index.clear();
        self.streaming = None;
        for mut msg in history {
            if self.index.contains_key(&msg.id) {
                continue;
            }
            msg.streaming = false;
            msg.finalized = true;
            self.index.insert(msg.id.clone(), self.messages.len());
            self.messages.push(msg);
        }
        self.frozen = true;
        self.changes.push(TranscriptChange::Seeded {
            messages: self.messages.clone(),
        });
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming.map(|pos| &self.messages[pos])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take the mutations recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<TranscriptChange> {
        std::mem::take(&mut self.changes)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.frozen {
            Err(SyncError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn streaming_position(&self, id: &MessageId) -> Result<usize> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| SyncError::UnknownMessage { id: id.clone() })?;
        if self.streaming != Some(pos) {
            return Err(SyncError::NotStreaming { id: id.clone() });
        }
        Ok(pos)
    }
}

//! Streaming assistant aggregator.
//!
//! ## State machine
//!
//! ```text
//!            START                    content
//!   Idle ───────────► Streaming ◄──────────────┐
//!    ▲                 │  │  └─────────────────┘
//!    │   DONE /        │  │ START (forced finalize of the
//!    └─ INTERRUPTED ───┘  │  prior turn, then a fresh one)
//!                         └──────────► Streaming
//! ```
//!
//! Content while `Idle` is dropped. There is no terminal state; the machine
//! cycles for the lifetime of the session. At most one message is ever
//! `streaming=true`.

use serde::Serialize;
use tracing::debug;

use super::WriteCtx;
use crate::error::Result;
use crate::ipc::frames::StreamToken;
use crate::store::{Message, MessageId, Role, StreamUpdate};
use crate::sync::echo::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Idle,
    Streaming,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Streaming { id: MessageId, buffer: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A new turn began. `forced` is the prior turn closed by this START.
    Started {
        id: MessageId,
        forced: Option<MessageId>,
    },
    Appended { id: MessageId },
    Finalized { id: MessageId, interrupted: bool },
    /// Token arrived with no active stream to attach to.
    Dropped,
}

#[derive(Debug, Default)]
pub struct StreamAggregator {
    state: State,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StreamPhase {
        match self.state {
            State::Idle => StreamPhase::Idle,
            State::Streaming { .. } => StreamPhase::Streaming,
        }
    }

    pub fn active_message_id(&self) -> Option<&MessageId> {
        match &self.state {
            State::Idle => None,
            State::Streaming { id, .. } => Some(id),
        }
    }

    pub fn buffer(&self) -> &str {
        match &self.state {
            State::Idle => "",
            State::Streaming { buffer, .. } => buffer,
        }
    }

    pub(crate) fn handle(
        &mut self,
        token: StreamToken,
        ctx: &mut WriteCtx<'_>,
    ) -> Result<StreamOutcome> {
        match token {
            StreamToken::Start => {
                let forced = match std::mem::take(&mut self.state) {
                    State::Idle => None,
                    State::Streaming { id, buffer } => {
                        debug!(%id, "START mid-stream, force-finalizing prior turn");
                        finish(&id, buffer, ctx)?;
                        Some(id)
                    }
                };

                let id = ctx.ids.next_id();
                ctx.store
                    .append(Message::streaming(id.clone(), ctx.clock.wall()))?;
                self.state = State::Streaming {
                    id: id.clone(),
                    buffer: String::new(),
                };
                Ok(StreamOutcome::Started { id, forced })
            }
            StreamToken::Content(text) => {
                let State::Streaming { id, buffer } = &mut self.state else {
                    debug!(len = text.len(), "dropping content token with no active stream");
                    return Ok(StreamOutcome::Dropped);
                };
                buffer.push_str(&text);
                ctx.store
                    .append_or_update_streaming(id, StreamUpdate::Delta(text))?;
                Ok(StreamOutcome::Appended { id: id.clone() })
            }
            StreamToken::Done => self.end(false, ctx),
            StreamToken::Interrupted => self.end(true, ctx),
        }
    }

    fn end(&mut self, interrupted: bool, ctx: &mut WriteCtx<'_>) -> Result<StreamOutcome> {
        match std::mem::take(&mut self.state) {
            State::Idle => {
                debug!(interrupted, "dropping end token with no active stream");
                Ok(StreamOutcome::Dropped)
            }
            State::Streaming { id, buffer } => {
                finish(&id, buffer, ctx)?;
                Ok(StreamOutcome::Finalized { id, interrupted })
            }
        }
    }

    /// Return to `Idle`, discarding the partial buffer.
    ///
    /// Yields the id of the abandoned in-flight message, if there was one.
    pub fn reset(&mut self) -> Option<MessageId> {
        match std::mem::take(&mut self.state) {
            State::Idle => None,
            State::Streaming { id, .. } => Some(id),
        }
    }
}

fn finish(id: &MessageId, buffer: String, ctx: &mut WriteCtx<'_>) -> Result<()> {
    let message = ctx.store.finalize(id, buffer)?;
    if !message.content.is_empty() {
        let fingerprint = Fingerprint::new(Role::Assistant, &message.content);
        ctx.window.register(fingerprint, ctx.clock.now());
    }
    Ok(())
}

//! `Synchronizer`: one session's transcript state and the producers writing to it.
//!
//! ## Routing
//!
//! ```text
//! RawFrame ──decode──► Frame::Voice  ──► VoiceDeduplicator ─┐
//!                      Frame::Stream ──► StreamAggregator  ─┼──► TranscriptStore
//! FallbackEntry ─────────────────────► EchoSuppressor     ─┤        │
//! host: submit(text) ────────────────► submit::stage      ─┘   drain_changes()
//! ```
//!
//! Every producer writes through the same `TranscriptStore` and registers
//! what it wrote in the shared `EchoWindow`. The struct is plain mutable
//! state with no interior locking: the engine owns exactly one per session
//! and feeds it from a single queue, so frames are handled run-to-completion.

pub mod echo;
pub mod stream;
pub mod submit;
pub mod voice;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::{
    clock::Clock,
    error::Result,
    history::HistoryRecord,
    id::{IdGenerator, UuidIdGen},
    ipc::events::TranscriptChange,
    ipc::frames::{FallbackEntry, Frame, RawFrame},
    store::{Message, MessageId, TranscriptStore},
};

pub use echo::{EchoOutcome, EchoSuppressor, EchoWindow, Fingerprint};
pub use stream::{StreamAggregator, StreamOutcome, StreamPhase};
pub use voice::{VoiceDeduplicator, VoiceOutcome, NO_INDEX};

/// Configuration for a `Synchronizer` / `SyncEngine`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long an inserted message suppresses identical fallback entries.
    /// Default: 5000 ms.
    pub echo_ttl: Duration,
    /// Maximum fingerprints held in the echo window. Default: 64.
    pub echo_capacity: usize,
    /// Transport identity of the local participant; fallback entries from
    /// it are user turns. Default: `"user"`.
    pub local_identity: String,
    /// Topic carrying assistant stream tokens. Default: `"llm_data"`.
    pub stream_topic: String,
    /// Buffered renderer events for slow subscribers. Default: 256.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_ttl: Duration::from_millis(5_000),
            echo_capacity: 64,
            local_identity: "user".into(),
            stream_topic: "llm_data".into(),
            event_capacity: 256,
        }
    }
}

/// Result of routing one transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Voice(VoiceOutcome),
    Stream(StreamOutcome),
    Ignored { kind: String },
}

/// Point-in-time view of the session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_processed_index: i64,
    pub phase: StreamPhase,
    pub active_message_id: Option<MessageId>,
    pub buffer: String,
    pub echo_entries: usize,
    pub messages: usize,
    pub frozen: bool,
}

/// Mutable borrows every producer writes through.
pub(crate) struct WriteCtx<'a> {
    pub store: &'a mut TranscriptStore,
    pub window: &'a mut EchoWindow,
    pub ids: &'a mut dyn IdGenerator,
    pub clock: &'a dyn Clock,
}

/// Split-borrow the writable parts of a `Synchronizer`, leaving the
/// producers free to be borrowed alongside.
macro_rules! ctx {
    ($sync:ident) => {
        WriteCtx {
            store: &mut $sync.store,
            window: &mut $sync.window,
            ids: $sync.ids.as_mut(),
            clock: $sync.clock.as_ref(),
        }
    };
}

pub struct Synchronizer {
    config: SyncConfig,
    store: TranscriptStore,
    window: EchoWindow,
    voice: VoiceDeduplicator,
    stream: StreamAggregator,
    echo: EchoSuppressor,
    ids: Box<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_id_generator(config, clock, Box::new(UuidIdGen))
    }

    pub fn with_id_generator(
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        Self {
            store: TranscriptStore::new(),
            window: EchoWindow::new(config.echo_ttl, config.echo_capacity),
            voice: VoiceDeduplicator::new(),
            stream: StreamAggregator::new(),
            echo: EchoSuppressor::new(config.local_identity.clone()),
            ids,
            clock,
            config,
        }
    }

    /// Decode and route one raw transport frame.
    ///
    /// # Errors
    /// `MalformedFrame` on decode failure; store rejections otherwise. The
    /// store is untouched on error.
    pub fn handle_raw(&mut self, raw: &RawFrame) -> Result<Dispatched> {
        let frame = Frame::decode(raw, &self.config.stream_topic)?;
        self.handle_frame(frame)
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Result<Dispatched> {
        match frame {
            Frame::Voice(voice) => {
                let mut ctx = ctx!(self);
                self.voice.handle(voice, &mut ctx).map(Dispatched::Voice)
            }
            Frame::Stream(token) => {
                let mut ctx = ctx!(self);
                self.stream.handle(token, &mut ctx).map(Dispatched::Stream)
            }
            Frame::Ignored { kind } => {
                debug!(%kind, "ignoring frame of unhandled type");
                Ok(Dispatched::Ignored { kind })
            }
        }
    }

    pub fn handle_fallback(&mut self, entry: FallbackEntry) -> Result<EchoOutcome> {
        let mut ctx = ctx!(self);
        self.echo.handle(entry, &mut ctx)
    }

    /// Optimistically append a user-typed message.
    ///
    /// The caller owns delivering `text` to the transport and calling
    /// [`confirm`](Self::confirm) once it resolves.
    pub fn submit_local(&mut self, text: impl Into<String>) -> Result<Message> {
        let mut ctx = ctx!(self);
        submit::stage(text.into(), &mut ctx)
    }

    /// Mark a pending local message as delivered.
    pub fn confirm(&mut self, id: &MessageId) -> Result<bool> {
        self.store.confirm(id)
    }

    /// Tear the session down: voice cursor back to [`NO_INDEX`], stream
    /// aggregator to `Idle` with its buffer discarded, echo window emptied
    /// and the log cleared.
    pub fn reset(&mut self) {
        self.voice.reset();
        self.stream.reset();
        self.window.clear();
        self.store.clear();
    }

    /// Partial reconnection: the transport may replay frames, so the voice
    /// cursor and the echo window are kept. Only the in-flight assistant
    /// turn is abandoned, closed with the content it already shows.
    pub fn reconnect(&mut self) {
        let Some(id) = self.stream.reset() else {
            return;
        };
        let shown = self
            .store
            .get(&id)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Err(e) = self.store.finalize(&id, shown) {
            debug!(%id, "abandoned stream was not open in the store: {e}");
        }
    }

    /// Replace the transcript with persisted history and freeze it.
    pub fn seed_preview(&mut self, history: Vec<HistoryRecord>) {
        self.reset();
        self.store
            .seed_frozen(history.into_iter().map(Message::from));
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn last_processed_index(&self) -> i64 {
        self.voice.last_processed_index()
    }

    pub fn stream_phase(&self) -> StreamPhase {
        self.stream.phase()
    }

    pub fn stream_buffer(&self) -> &str {
        self.stream.buffer()
    }

    pub fn echo_window_len(&self) -> usize {
        self.window.len()
    }

    pub fn inspect(&self) -> SyncState {
        SyncState {
            last_processed_index: self.voice.last_processed_index(),
            phase: self.stream.phase(),
            active_message_id: self.stream.active_message_id().cloned(),
            buffer: self.stream.buffer().to_string(),
            echo_entries: self.window.len(),
            messages: self.store.len(),
            frozen: self.store.is_frozen(),
        }
    }

    pub fn drain_changes(&mut self) -> Vec<TranscriptChange> {
        self.store.drain_changes()
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.inspect())
            .finish_non_exhaustive()
    }
}

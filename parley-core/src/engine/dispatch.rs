//! Single-queue dispatch loop.
//!
//! ## Per command
//!
//! ```text
//! 1. Pop the next Command (frame, fallback entry, submission, ...)
//! 2. Route it into the session's Synchronizer, run to completion
//! 3. Count the outcome in DispatchDiagnostics
//! 4. Drain the store's change log → snapshot + broadcast TranscriptEvent
//! ```
//!
//! Transport callbacks and host calls only enqueue; nothing else touches the
//! `Synchronizer`, so a frame's effects are fully applied before the next
//! frame is looked at. The only awaited I/O (voice forwarding) is spawned off
//! the loop.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn, Instrument};

use crate::{
    error::{Result, SyncError},
    ipc::events::TranscriptEvent,
    ipc::frames::{FallbackEntry, RawFrame},
    store::{Message, MessageId},
    sync::{Dispatched, EchoOutcome, StreamOutcome, SyncState, Synchronizer, VoiceOutcome},
    transport::Transport,
};

pub struct DispatchDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_malformed: AtomicUsize,
    pub frames_ignored: AtomicUsize,
    pub voice_accepted: AtomicUsize,
    pub voice_replayed: AtomicUsize,
    pub stream_tokens: AtomicUsize,
    pub stream_tokens_dropped: AtomicUsize,
    pub streams_started: AtomicUsize,
    pub streams_forced: AtomicUsize,
    pub streams_finalized: AtomicUsize,
    pub streams_interrupted: AtomicUsize,
    pub fallback_in: AtomicUsize,
    pub fallback_suppressed: AtomicUsize,
    pub fallback_inserted: AtomicUsize,
    pub submissions: AtomicUsize,
    pub send_failures: AtomicUsize,
}

impl Default for DispatchDiagnostics {
    fn default() -> Self {
        Self {
            frames_in: AtomicUsize::new(0),
            frames_malformed: AtomicUsize::new(0),
            frames_ignored: AtomicUsize::new(0),
            voice_accepted: AtomicUsize::new(0),
            voice_replayed: AtomicUsize::new(0),
            stream_tokens: AtomicUsize::new(0),
            stream_tokens_dropped: AtomicUsize::new(0),
            streams_started: AtomicUsize::new(0),
            streams_forced: AtomicUsize::new(0),
            streams_finalized: AtomicUsize::new(0),
            streams_interrupted: AtomicUsize::new(0),
            fallback_in: AtomicUsize::new(0),
            fallback_suppressed: AtomicUsize::new(0),
            fallback_inserted: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            send_failures: AtomicUsize::new(0),
        }
    }
}

impl DispatchDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_malformed.store(0, Ordering::Relaxed);
        self.frames_ignored.store(0, Ordering::Relaxed);
        self.voice_accepted.store(0, Ordering::Relaxed);
        self.voice_replayed.store(0, Ordering::Relaxed);
        self.stream_tokens.store(0, Ordering::Relaxed);
        self.stream_tokens_dropped.store(0, Ordering::Relaxed);
        self.streams_started.store(0, Ordering::Relaxed);
        self.streams_forced.store(0, Ordering::Relaxed);
        self.streams_finalized.store(0, Ordering::Relaxed);
        self.streams_interrupted.store(0, Ordering::Relaxed);
        self.fallback_in.store(0, Ordering::Relaxed);
        self.fallback_suppressed.store(0, Ordering::Relaxed);
        self.fallback_inserted.store(0, Ordering::Relaxed);
        self.submissions.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            voice_accepted: self.voice_accepted.load(Ordering::Relaxed),
            voice_replayed: self.voice_replayed.load(Ordering::Relaxed),
            stream_tokens: self.stream_tokens.load(Ordering::Relaxed),
            stream_tokens_dropped: self.stream_tokens_dropped.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_forced: self.streams_forced.load(Ordering::Relaxed),
            streams_finalized: self.streams_finalized.load(Ordering::Relaxed),
            streams_interrupted: self.streams_interrupted.load(Ordering::Relaxed),
            fallback_in: self.fallback_in.load(Ordering::Relaxed),
            fallback_suppressed: self.fallback_suppressed.load(Ordering::Relaxed),
            fallback_inserted: self.fallback_inserted.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_malformed: usize,
    pub frames_ignored: usize,
    pub voice_accepted: usize,
    pub voice_replayed: usize,
    pub stream_tokens: usize,
    pub stream_tokens_dropped: usize,
    pub streams_started: usize,
    pub streams_forced: usize,
    /// Every closed turn, interrupted ones included.
    pub streams_finalized: usize,
    pub streams_interrupted: usize,
    pub fallback_in: usize,
    pub fallback_suppressed: usize,
    pub fallback_inserted: usize,
    pub submissions: usize,
    pub send_failures: usize,
}

/// Work items for the dispatch loop.
pub(crate) enum Command {
    Frame(RawFrame),
    Fallback(FallbackEntry),
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    Confirm(MessageId),
    Reconnect,
    Inspect(oneshot::Sender<SyncState>),
    /// Reset and clear, publish, acknowledge, then exit.
    Shutdown(oneshot::Sender<()>),
}

/// Turns a session's store change log into renderer events.
#[derive(Clone)]
pub(crate) struct Publisher {
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub snapshot: Arc<RwLock<Vec<Message>>>,
    pub seq: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (transcript_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            transcript_tx,
            snapshot: Arc::new(RwLock::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The snapshot is replaced before any event goes out, so a renderer
    /// reacting to an event always reads at least that state.
    pub fn publish(&self, sync: &mut Synchronizer) {
        let changes = sync.drain_changes();
        if changes.is_empty() {
            return;
        }
        *self.snapshot.write() = sync.store().snapshot();
        for change in changes {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            // No receivers is fine: the snapshot still holds the state.
            let _ = self.transcript_tx.send(TranscriptEvent { seq, change });
        }
    }
}

/// All context the dispatch loop needs, passed as one struct.
pub(crate) struct DispatchContext {
    pub sync: Synchronizer,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub transport: Arc<dyn Transport>,
    pub publisher: Publisher,
    pub diagnostics: Arc<DispatchDiagnostics>,
}

/// Run until `Shutdown` arrives or every sender is gone.
pub(crate) async fn run(mut ctx: DispatchContext) {
    info!("dispatch loop started");

    while let Some(command) = ctx.commands.recv().await {
        match command {
            Command::Frame(raw) => on_frame(&mut ctx, &raw),
            Command::Fallback(entry) => on_fallback(&mut ctx, entry),
            Command::Submit { text, reply } => {
                ctx.diagnostics.submissions.fetch_add(1, Ordering::Relaxed);
                let result = ctx.sync.submit_local(text);
                if let Err(e) = &result {
                    warn!("local submission rejected: {e}");
                }
                // Publish before replying so the optimistic append is visible
                // by the time `submit` starts sending.
                ctx.publisher.publish(&mut ctx.sync);
                let _ = reply.send(result);
            }
            Command::Confirm(id) => {
                if let Err(e) = ctx.sync.confirm(&id) {
                    debug!(%id, "confirmation skipped: {e}");
                }
            }
            Command::Reconnect => {
                info!(
                    last_index = ctx.sync.last_processed_index(),
                    "partial reconnection, abandoning in-flight stream"
                );
                ctx.sync.reconnect();
            }
            Command::Inspect(reply) => {
                let _ = reply.send(ctx.sync.inspect());
            }
            Command::Shutdown(done) => {
                ctx.sync.reset();
                ctx.publisher.publish(&mut ctx.sync);
                let _ = done.send(());
                break;
            }
        }
        ctx.publisher.publish(&mut ctx.sync);
    }

    info!("dispatch loop stopped");
}

fn on_frame(ctx: &mut DispatchContext, raw: &RawFrame) {
    let d = Arc::clone(&ctx.diagnostics);
    d.frames_in.fetch_add(1, Ordering::Relaxed);

    match ctx.sync.handle_raw(raw) {
        Ok(Dispatched::Voice(VoiceOutcome::Accepted { message })) => {
            d.voice_accepted.fetch_add(1, Ordering::Relaxed);
            forward(&ctx.transport, &d, message.content);
        }
        Ok(Dispatched::Voice(VoiceOutcome::Replayed { .. })) => {
            d.voice_replayed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Dispatched::Stream(outcome)) => {
            d.stream_tokens.fetch_add(1, Ordering::Relaxed);
            match outcome {
                StreamOutcome::Started { forced, .. } => {
                    d.streams_started.fetch_add(1, Ordering::Relaxed);
                    if forced.is_some() {
                        d.streams_forced.fetch_add(1, Ordering::Relaxed);
                    }
                }
                StreamOutcome::Appended { .. } => {}
                StreamOutcome::Finalized { interrupted, .. } => {
                    d.streams_finalized.fetch_add(1, Ordering::Relaxed);
                    if interrupted {
                        d.streams_interrupted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                StreamOutcome::Dropped => {
                    d.stream_tokens_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(Dispatched::Ignored { .. }) => {
            d.frames_ignored.fetch_add(1, Ordering::Relaxed);
        }
        Err(SyncError::MalformedFrame(reason)) => {
            d.frames_malformed.fetch_add(1, Ordering::Relaxed);
            warn!("dropping malformed frame: {reason}");
        }
        Err(e) => warn!("frame rejected: {e}"),
    }
}

fn on_fallback(ctx: &mut DispatchContext, entry: FallbackEntry) {
    let d = &ctx.diagnostics;
    d.fallback_in.fetch_add(1, Ordering::Relaxed);

    match ctx.sync.handle_fallback(entry) {
        Ok(EchoOutcome::Suppressed { confirmed }) => {
            d.fallback_suppressed.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = confirmed {
                debug!(%id, "fallback echo confirmed pending message");
            }
        }
        Ok(EchoOutcome::Inserted { .. }) => {
            d.fallback_inserted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(EchoOutcome::AlreadyPresent { .. } | EchoOutcome::Blank) => {}
        Err(e) => warn!("fallback entry rejected: {e}"),
    }
}

/// Hand an accepted voice turn to the assistant without blocking the loop.
fn forward(transport: &Arc<dyn Transport>, diagnostics: &Arc<DispatchDiagnostics>, text: String) {
    let transport = Arc::clone(transport);
    let diagnostics = Arc::clone(diagnostics);
    tokio::spawn(
        async move {
            if let Err(e) = transport.send(text).await {
                diagnostics.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("forwarding voice turn failed: {e}");
            }
        }
        .in_current_span(),
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::clock::ManualClock;
    use crate::id::SequentialIdGen;
    use crate::ipc::events::TranscriptChange;
    use crate::sync::SyncConfig;
    use crate::transport::LoopbackTransport;

    struct Running {
        commands: mpsc::UnboundedSender<Command>,
        publisher: Publisher,
        diagnostics: Arc<DispatchDiagnostics>,
        transport: LoopbackTransport,
        task: tokio::task::JoinHandle<()>,
    }

    async fn spawn_loop() -> Running {
        let transport = LoopbackTransport::new();
        transport.connect().await.unwrap();
        let (commands, rx) = mpsc::unbounded_channel();
        let publisher = Publisher::new(64);
        let diagnostics = Arc::new(DispatchDiagnostics::default());
        let sync = Synchronizer::with_id_generator(
            SyncConfig::default(),
            Arc::new(ManualClock::new()),
            Box::new(SequentialIdGen::new()),
        );
        let task = tokio::spawn(run(DispatchContext {
            sync,
            commands: rx,
            transport: Arc::new(transport.clone()),
            publisher: publisher.clone(),
            diagnostics: Arc::clone(&diagnostics),
        }));
        Running {
            commands,
            publisher,
            diagnostics,
            transport,
            task,
        }
    }

    async fn inspect(commands: &mpsc::UnboundedSender<Command>) -> SyncState {
        let (tx, rx) = oneshot::channel();
        commands.send(Command::Inspect(tx)).unwrap();
        rx.await.unwrap()
    }

    fn voice(index: i64, text: &str) -> Command {
        Command::Frame(RawFrame::json(&json!({
            "type": "voice_transcription",
            "resp": { "index": index, "text": text }
        })))
    }

    #[tokio::test]
    async fn outcomes_are_counted() {
        let r = spawn_loop().await;

        r.commands.send(voice(0, "hello")).unwrap();
        r.commands.send(voice(0, "hello")).unwrap();
        r.commands
            .send(Command::Frame(RawFrame::json(&json!({ "type": "agent_state" }))))
            .unwrap();
        r.commands
            .send(Command::Frame(RawFrame {
                topic: None,
                payload: b"{not json".to_vec(),
            }))
            .unwrap();
        r.commands
            .send(Command::Frame(RawFrame::text("llm_data", "orphan")))
            .unwrap();
        let state = inspect(&r.commands).await;

        let d = r.diagnostics.snapshot();
        assert_eq!(d.frames_in, 5);
        assert_eq!(d.voice_accepted, 1);
        assert_eq!(d.voice_replayed, 1);
        assert_eq!(d.frames_ignored, 1);
        assert_eq!(d.frames_malformed, 1);
        assert_eq!(d.stream_tokens_dropped, 1);
        assert_eq!(state.last_processed_index, 0);
        assert_eq!(state.messages, 1);
    }

    #[tokio::test]
    async fn accepted_voice_turn_is_forwarded() {
        let r = spawn_loop().await;

        r.commands.send(voice(0, "what time is it")).unwrap();
        inspect(&r.commands).await;
        // Let the spawned send run.
        for _ in 0..10 {
            if !r.transport.sent().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(r.transport.sent(), vec!["what time is it".to_string()]);
    }

    #[tokio::test]
    async fn changes_are_published_in_order_with_snapshot() {
        let r = spawn_loop().await;
        let mut events = r.publisher.transcript_tx.subscribe();

        for t in ["[START]", "Hi", "[DONE]"] {
            r.commands
                .send(Command::Frame(RawFrame::text("llm_data", t)))
                .unwrap();
        }
        inspect(&r.commands).await;

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| match e.change {
                TranscriptChange::Appended { .. } => "appended",
                TranscriptChange::Updated { .. } => "updated",
                TranscriptChange::Finalized { .. } => "finalized",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["appended", "updated", "finalized"]);
        assert_eq!(r.publisher.snapshot.read()[0].content, "Hi");
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn shutdown_clears_and_stops() {
        let r = spawn_loop().await;
        r.commands.send(voice(0, "hello")).unwrap();

        let (done_tx, done_rx) = oneshot::channel();
        r.commands.send(Command::Shutdown(done_tx)).unwrap();
        done_rx.await.unwrap();
        r.task.await.unwrap();

        assert!(r.publisher.snapshot.read().is_empty());
        assert!(r.commands.send(Command::Reconnect).is_err());
    }
}

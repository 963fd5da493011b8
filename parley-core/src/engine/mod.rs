//! `SyncEngine` — session lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SyncEngine::new()
//!     ├─► start_live()      → fresh Synchronizer, dispatch task spawned,
//!     │                       frames + fallback subscribed, status = Live
//!     │       ├─► reconnect()   → in-flight stream closed; cursor, echo
//!     │       │                   window and transcript kept
//!     │       └─► leave()       → unsubscribed, state reset, transcript
//!     │                           cleared, task stopped, status = Idle
//!     └─► start_preview()   → history seeded and frozen, status = Preview
//! ```
//!
//! Entering any session tears the current one down first, so at most one
//! session exists at a time. Transitions are serialized: a second
//! `start_live`/`start_preview`/`leave` waits for the first to finish.
//!
//! ## Threading
//!
//! Transport callbacks and the public methods never touch a live session's
//! `Synchronizer` directly. They enqueue a `dispatch::Command`; the dispatch
//! task is the only owner. A preview session has no task: its frozen
//! synchronizer sits in the session slot and is only read.

pub mod dispatch;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    clock::Clock,
    error::{Result, SyncError},
    history::HistorySource,
    id::{IdGenerator, UuidIdGen},
    ipc::events::{SessionStatus, SessionStatusEvent, TranscriptEvent},
    store::Message,
    sync::{SyncConfig, SyncState, Synchronizer},
    transport::{Subscription, Transport},
};

use dispatch::{Command, DispatchContext, DispatchDiagnostics, DiagnosticsSnapshot, Publisher};

struct LiveSession {
    commands: mpsc::UnboundedSender<Command>,
    subscriptions: Vec<Subscription>,
    task: JoinHandle<()>,
}

enum Session {
    Idle,
    Live(LiveSession),
    Preview(Synchronizer),
}

/// The top-level engine handle.
///
/// `SyncEngine` is `Send + Sync`; wrap it in an `Arc` to share it between a
/// host's UI handlers and event-forwarding tasks.
pub struct SyncEngine {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    ids: fn() -> Box<dyn IdGenerator>,
    session: Mutex<Session>,
    /// Held across teardown and install of a session.
    transitions: tokio::sync::Mutex<()>,
    /// Canonical status (written via Mutex, read from host calls).
    status: Mutex<SessionStatus>,
    publisher: Publisher,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<DispatchDiagnostics>,
    sessions_started: AtomicU64,
}

fn uuid_ids() -> Box<dyn IdGenerator> {
    Box::new(UuidIdGen)
}

impl SyncEngine {
    /// Create an idle engine. Nothing is subscribed until a session starts.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let (status_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            publisher: Publisher::new(config.event_capacity),
            config,
            transport,
            clock,
            ids: uuid_ids,
            session: Mutex::new(Session::Idle),
            transitions: tokio::sync::Mutex::new(()),
            status: Mutex::new(SessionStatus::Idle),
            status_tx,
            diagnostics: Arc::new(DispatchDiagnostics::default()),
            sessions_started: AtomicU64::new(0),
        }
    }

    /// Replace the message id source used by every later session.
    pub fn with_id_source(mut self, ids: fn() -> Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Enter a live session.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start_live(&self) {
        let _transition = self.transitions.lock().await;
        self.teardown().await;
        self.diagnostics.reset();

        let n = self.sessions_started.fetch_add(1, Ordering::Relaxed) + 1;
        let (commands, rx) = mpsc::unbounded_channel();
        let sync = self.new_synchronizer();

        let task = tokio::spawn(
            dispatch::run(DispatchContext {
                sync,
                commands: rx,
                transport: Arc::clone(&self.transport),
                publisher: self.publisher.clone(),
                diagnostics: Arc::clone(&self.diagnostics),
            })
            .instrument(info_span!("session", n)),
        );

        let frames_tx = commands.clone();
        let frames = self.transport.subscribe_frames(Box::new(move |raw| {
            // Closed only while the session is being torn down.
            let _ = frames_tx.send(Command::Frame(raw));
        }));
        let fallback_tx = commands.clone();
        let fallback = self.transport.subscribe_fallback(Box::new(move |entry| {
            let _ = fallback_tx.send(Command::Fallback(entry));
        }));

        *self.session.lock() = Session::Live(LiveSession {
            commands,
            subscriptions: vec![frames, fallback],
            task,
        });
        self.set_status(SessionStatus::Live, None);
        info!(session = n, "live session started");
    }

    /// Enter a read-only preview of a persisted conversation.
    ///
    /// # Errors
    /// Whatever `history.load()` fails with; the engine is left idle.
    pub async fn start_preview(&self, history: &dyn HistorySource) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.teardown().await;

        let records = match history.load() {
            Ok(records) => records,
            Err(e) => {
                self.set_status(SessionStatus::Idle, Some(e.to_string()));
                return Err(e);
            }
        };

        let mut sync = self.new_synchronizer();
        sync.seed_preview(records);
        self.publisher.publish(&mut sync);
        let count = sync.store().len();

        *self.session.lock() = Session::Preview(sync);
        self.set_status(SessionStatus::Preview, None);
        info!(messages = count, "preview session seeded");
        Ok(())
    }

    /// Submit a user-typed message.
    ///
    /// The message is appended as pending before the transport is involved;
    /// it is confirmed once the send resolves.
    ///
    /// # Errors
    /// - `SyncError::ReadOnly` in a preview session.
    /// - `SyncError::NotActive` with no session.
    /// - `SyncError::Send` if the transport rejects the text. The message
    ///   stays in the transcript, pending.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Message> {
        let text = text.into();
        let commands = self.live_commands()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(Command::Submit {
                text: text.clone(),
                reply: reply_tx,
            })
            .map_err(|_| SyncError::DispatchClosed)?;
        let message = reply_rx.await.map_err(|_| SyncError::DispatchClosed)??;

        match self.transport.send(text).await {
            Ok(()) => {
                // The session may have ended while the send was in flight.
                let _ = commands.send(Command::Confirm(message.id.clone()));
                Ok(message)
            }
            Err(e) => {
                self.diagnostics
                    .send_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(id = %message.id, "send failed, message stays pending: {e}");
                Err(match e {
                    SyncError::Send(_) => e,
                    other => SyncError::Send(other.to_string()),
                })
            }
        }
    }

    /// Partial reconnection: close any half-streamed assistant turn. The
    /// voice cursor, the echo window and the transcript are kept, so frames
    /// the transport replays afterwards are still deduplicated.
    ///
    /// # Errors
    /// `ReadOnly` in preview, `NotActive` with no session.
    pub fn reconnect(&self) -> Result<()> {
        self.live_commands()?
            .send(Command::Reconnect)
            .map_err(|_| SyncError::DispatchClosed)
    }

    /// Tear the current session down. Always succeeds.
    pub async fn leave(&self) {
        let _transition = self.transitions.lock().await;
        self.teardown().await;
        self.set_status(SessionStatus::Idle, None);
        info!("session left");
    }

    /// Wait until everything enqueued so far has been applied.
    pub async fn flush(&self) -> Result<()> {
        self.inspect().await.map(|_| ())
    }

    /// Session bookkeeping as of every command enqueued so far.
    ///
    /// # Errors
    /// `NotActive` with no session.
    pub async fn inspect(&self) -> Result<SyncState> {
        let commands = {
            let session = self.session.lock();
            match &*session {
                Session::Live(live) => live.commands.clone(),
                Session::Preview(sync) => return Ok(sync.inspect()),
                Session::Idle => return Err(SyncError::NotActive),
            }
        };
        let (tx, rx) = oneshot::channel();
        commands
            .send(Command::Inspect(tx))
            .map_err(|_| SyncError::DispatchClosed)?;
        rx.await.map_err(|_| SyncError::DispatchClosed)
    }

    /// Current transcript (snapshot).
    pub fn transcript(&self) -> Vec<Message> {
        self.publisher.snapshot.read().clone()
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to transcript change events.
    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.publisher.transcript_tx.subscribe()
    }

    /// Subscribe to session status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of dispatch counters for the current (or last) live session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn new_synchronizer(&self) -> Synchronizer {
        Synchronizer::with_id_generator(self.config.clone(), Arc::clone(&self.clock), (self.ids)())
    }

    fn live_commands(&self) -> Result<mpsc::UnboundedSender<Command>> {
        match &*self.session.lock() {
            Session::Live(live) => Ok(live.commands.clone()),
            Session::Preview(_) => Err(SyncError::ReadOnly),
            Session::Idle => Err(SyncError::NotActive),
        }
    }

    /// Unsubscribe, reset and clear, then stop the dispatch task.
    async fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.session.lock(), Session::Idle);

        match previous {
            Session::Idle => {}
            Session::Preview(mut sync) => {
                sync.reset();
                self.publisher.publish(&mut sync);
            }
            Session::Live(LiveSession {
                commands,
                subscriptions,
                task,
            }) => {
                // Unsubscribe first so nothing new lands behind the shutdown.
                drop(subscriptions);
                let (done_tx, done_rx) = oneshot::channel();
                if commands.send(Command::Shutdown(done_tx)).is_ok() {
                    let _ = done_rx.await;
                }
                drop(commands);
                if let Err(e) = task.await {
                    warn!("dispatch task ended abnormally: {e}");
                }
            }
        }

        // Covers a dispatch task that died before it could publish the clear.
        self.publisher.snapshot.write().clear();
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .field("messages", &self.publisher.snapshot.read().len())
            .finish_non_exhaustive()
    }
}

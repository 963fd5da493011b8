//! # parley-core
//!
//! Transcript synchronizer for real-time avatar chat sessions.
//!
//! ## Architecture
//!
//! ```text
//! Transport ──frames / fallback──► mpsc Command queue ◄── SyncEngine::submit
//!                                          │
//!                                 dispatch task (one per live session)
//!                                          │
//!                     Synchronizer: voice dedup · stream aggregator ·
//!                               echo suppressor · local submit
//!                                          │
//!                                   TranscriptStore
//!                                          │
//!                         broadcast::Sender<TranscriptEvent>
//! ```
//!
//! Everything that mutates the transcript goes through the queue, so frames
//! are applied strictly one at a time, in arrival order.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod clock;
pub mod engine;
pub mod error;
pub mod history;
pub mod id;
pub mod ipc;
pub mod store;
pub mod sync;
pub mod transport;

// Convenience re-exports for downstream crates
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::dispatch::DiagnosticsSnapshot;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use history::{HistoryRecord, HistorySource, StaticHistory};
pub use id::{IdGenerator, SequentialIdGen, UuidIdGen};
pub use ipc::events::{SessionStatus, SessionStatusEvent, TranscriptChange, TranscriptEvent};
pub use ipc::frames::{FallbackEntry, Participant, RawFrame};
pub use store::{Message, MessageId, Origin, Role, TranscriptStore};
pub use sync::{SyncConfig, SyncState, Synchronizer};
pub use transport::{LoopbackTransport, Subscription, Transport, TransportState};

//! Real-time transport abstraction.
//!
//! The `Transport` trait decouples the synchronizer from any specific
//! room/video SDK. Connection establishment, retry and codec negotiation all
//! belong to the implementor; this core only subscribes to inbound traffic and
//! hands outbound text over.

pub mod loopback;

pub use loopback::LoopbackTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ipc::frames::{FallbackEntry, RawFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

pub type FrameHandler = Box<dyn Fn(RawFrame) + Send + Sync>;
pub type FallbackHandler = Box<dyn Fn(FallbackEntry) + Send + Sync>;

/// Contract for transport backends.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn state(&self) -> TransportState;

    /// Hand `text` to the transport.
    ///
    /// Resolves once the text is queued locally, not on remote delivery.
    ///
    /// # Errors
    /// `SyncError::Send` when the transport refuses the text.
    async fn send(&self, text: String) -> Result<()>;

    /// Register a handler for inbound frames. The handler stays registered
    /// until the returned `Subscription` is dropped.
    fn subscribe_frames(&self, handler: FrameHandler) -> Subscription;

    /// Register a handler for fallback message entries.
    fn subscribe_fallback(&self, handler: FallbackHandler) -> Subscription;
}

/// Scoped registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

//! `LoopbackTransport` — in-memory transport with no network behind it.
//!
//! Used by tests and by the replay host. Inbound traffic is injected with
//! `push_frame` / `push_fallback`; outbound text is recorded and can be read
//! back with `sent()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{FallbackHandler, FrameHandler, Subscription, Transport, TransportState};
use crate::error::{Result, SyncError};
use crate::ipc::frames::{FallbackEntry, RawFrame};

type Shared<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Inner {
    state: Mutex<TransportState>,
    sent: Mutex<Vec<String>>,
    reject_sends: AtomicBool,
    next_handler_id: AtomicU64,
    frame_handlers: Mutex<Vec<(u64, Shared<RawFrame>)>>,
    fallback_handlers: Mutex<Vec<(u64, Shared<FallbackEntry>)>>,
}

#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TransportState::Disconnected),
                sent: Mutex::new(Vec::new()),
                reject_sends: AtomicBool::new(false),
                next_handler_id: AtomicU64::new(0),
                frame_handlers: Mutex::new(Vec::new()),
                fallback_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Deliver a frame to every current frame subscriber. Returns how many
    /// received it.
    pub fn push_frame(&self, frame: RawFrame) -> usize {
        let handlers: Vec<_> = self
            .inner
            .frame_handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler(frame.clone());
        }
        handlers.len()
    }

    pub fn push_fallback(&self, entry: FallbackEntry) -> usize {
        let handlers: Vec<_> = self
            .inner
            .fallback_handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler(entry.clone());
        }
        handlers.len()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_reject_sends(&self, reject: bool) {
        self.inner.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Every text accepted by `send`, in order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.frame_handlers.lock().len() + self.inner.fallback_handlers.lock().len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("state", &*self.inner.state.lock())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        *self.inner.state.lock() = TransportState::Connected;
        debug!("loopback transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.inner.state.lock() = TransportState::Disconnected;
        debug!("loopback transport disconnected");
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    async fn send(&self, text: String) -> Result<()> {
        if self.inner.reject_sends.load(Ordering::SeqCst) {
            return Err(SyncError::Send("loopback configured to reject sends".into()));
        }
        if self.state() != TransportState::Connected {
            return Err(SyncError::Send("transport is not connected".into()));
        }
        self.inner.sent.lock().push(text);
        Ok(())
    }

    fn subscribe_frames(&self, handler: FrameHandler) -> Subscription {
        let id = self.next_id();
        self.inner
            .frame_handlers
            .lock()
            .push((id, Arc::from(handler)));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.frame_handlers.lock().retain(|(h, _)| *h != id);
            }
        })
    }

    fn subscribe_fallback(&self, handler: FallbackHandler) -> Subscription {
        let id = self.next_id();
        self.inner
            .fallback_handlers
            .lock()
            .push((id, Arc::from(handler)));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.fallback_handlers.lock().retain(|(h, _)| *h != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn send_requires_connection_and_honours_reject_flag() {
        let transport = LoopbackTransport::new();
        assert!(transport.send("early".into()).await.is_err());

        transport.connect().await.unwrap();
        assert_eq!(transport.state(), TransportState::Connected);
        transport.send("hi".into()).await.unwrap();

        transport.set_reject_sends(true);
        assert!(matches!(
            transport.send("lost".into()).await,
            Err(SyncError::Send(_))
        ));
        assert_eq!(transport.sent(), vec!["hi".to_string()]);
    }

    #[test]
    fn frames_reach_subscribers_until_unsubscribed() {
        let transport = LoopbackTransport::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let sub = transport.subscribe_frames(Box::new(move |_frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(transport.push_frame(RawFrame::text("llm_data", "x")), 1);

        drop(sub);
        assert_eq!(transport.push_frame(RawFrame::text("llm_data", "y")), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscriber_count(), 0);
    }
}

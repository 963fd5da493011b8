//! Echo suppression for the fallback delivery path.
//!
//! The transport re-delivers already-exchanged messages through a best-effort
//! fallback list. There is no message identity shared between that list and
//! the primary paths, so duplicates are detected heuristically: same role,
//! exactly equal content, registered within the TTL. This can show a
//! duplicate that differs by one character, and can hide a legitimate repeat
//! inside the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::DateTime;
use tracing::debug;

use super::WriteCtx;
use crate::error::Result;
use crate::ipc::frames::FallbackEntry;
use crate::store::{Message, MessageId, Role};

/// Identity of a message for echo comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    role: Role,
    content: String,
}

impl Fingerprint {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Debug)]
struct EchoEntry {
    fingerprint: Fingerprint,
    inserted_at: Instant,
}

/// Short-lived record of recently inserted messages. Never persisted.
#[derive(Debug)]
pub struct EchoWindow {
    /// Oldest first; `inserted_at` is non-decreasing.
    entries: VecDeque<EchoEntry>,
    ttl: Duration,
    capacity: usize,
}

impl EchoWindow {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn register(&mut self, fingerprint: Fingerprint, now: Instant) {
        self.prune(now);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EchoEntry {
            fingerprint,
            inserted_at: now,
        });
    }

    /// Whether `fingerprint` was registered less than one TTL ago.
    pub fn contains(&mut self, fingerprint: &Fingerprint, now: Instant) -> bool {
        self.prune(now);
        self.entries.iter().any(|e| &e.fingerprint == fingerprint)
    }

    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.inserted_at) < self.ttl {
                break;
            }
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EchoOutcome {
    /// Matched a recent insert. `confirmed` names a pending local message the
    /// echo proved delivered.
    Suppressed { confirmed: Option<MessageId> },
    /// Recovered as an authoritative message.
    Inserted { message: Message },
    /// This exact entry was already recovered earlier.
    AlreadyPresent { id: MessageId },
    /// Entry carried no text.
    Blank,
}

#[derive(Debug)]
pub struct EchoSuppressor {
    local_identity: String,
}

impl EchoSuppressor {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
        }
    }

    /// Entries sent by the local participant are user turns; everything else
    /// came from the assistant.
    pub fn attribute(&self, entry: &FallbackEntry) -> Role {
        if entry.from.identity == self.local_identity {
            Role::User
        } else {
            Role::Assistant
        }
    }

    pub(crate) fn handle(
        &self,
        entry: FallbackEntry,
        ctx: &mut WriteCtx<'_>,
    ) -> Result<EchoOutcome> {
        if entry.message.trim().is_empty() {
            return Ok(EchoOutcome::Blank);
        }

        let id = MessageId::new(format!("fallback-{}", entry.id));
        if ctx.store.contains(&id) {
            return Ok(EchoOutcome::AlreadyPresent { id });
        }

        let role = self.attribute(&entry);
        let fingerprint = Fingerprint::new(role, &entry.message);
        let now = ctx.clock.now();
        if ctx.window.contains(&fingerprint, now) {
            let confirmed = confirm_pending_echo(role, &entry.message, ctx)?;
            debug!(entry = %entry.id, ?role, "fallback echo suppressed");
            return Ok(EchoOutcome::Suppressed { confirmed });
        }

        let created_at =
            DateTime::from_timestamp_millis(entry.timestamp).unwrap_or_else(|| ctx.clock.wall());
        let message = Message::fallback(id, entry.message, role, created_at);
        ctx.store.append(message.clone())?;
        ctx.window.register(fingerprint, now);
        debug!(id = %message.id, ?role, "fallback entry recovered");
        Ok(EchoOutcome::Inserted { message })
    }
}

/// The newest pending local message with this content, confirmed by its echo.
fn confirm_pending_echo(
    role: Role,
    content: &str,
    ctx: &mut WriteCtx<'_>,
) -> Result<Option<MessageId>> {
    let pending = ctx
        .store
        .messages()
        .iter()
        .rev()
        .find(|m| m.is_pending() && m.role == role && m.content == content)
        .map(|m| m.id.clone());
    match pending {
        Some(id) => {
            ctx.store.confirm(&id)?;
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::ipc::frames::Participant;
    use crate::store::Origin;
    use crate::sync::test_support::Harness;

    const TTL: Duration = Duration::from_millis(5000);

    fn entry(id: &str, identity: &str, message: &str) -> FallbackEntry {
        FallbackEntry {
            id: id.into(),
            message: message.into(),
            from: Participant {
                identity: identity.into(),
            },
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn window_expires_entries_after_ttl() {
        let start = Instant::now();
        let mut window = EchoWindow::new(TTL, 8);
        let fp = Fingerprint::new(Role::Assistant, "Hello!");
        window.register(fp.clone(), start);

        assert!(window.contains(&fp, start + Duration::from_millis(4999)));
        assert!(!window.contains(&fp, start + TTL));
        assert!(window.is_empty());
    }

    #[test]
    fn window_distinguishes_role_and_exact_content() {
        let now = Instant::now();
        let mut window = EchoWindow::new(TTL, 8);
        window.register(Fingerprint::new(Role::Assistant, "Hello!"), now);

        assert!(!window.contains(&Fingerprint::new(Role::User, "Hello!"), now));
        assert!(!window.contains(&Fingerprint::new(Role::Assistant, "Hello"), now));
    }

    #[test]
    fn window_evicts_oldest_at_capacity() {
        let now = Instant::now();
        let mut window = EchoWindow::new(TTL, 2);
        for text in ["a", "b", "c"] {
            window.register(Fingerprint::new(Role::User, text), now);
        }
        assert_eq!(window.len(), 2);
        assert!(!window.contains(&Fingerprint::new(Role::User, "a"), now));
        assert!(window.contains(&Fingerprint::new(Role::User, "c"), now));
    }

    #[test]
    fn attribution_follows_local_identity() {
        let echo = EchoSuppressor::new("user-42");
        assert_eq!(echo.attribute(&entry("1", "user-42", "x")), Role::User);
        assert_eq!(echo.attribute(&entry("2", "agent-1", "x")), Role::Assistant);
    }

    #[test]
    fn recent_echo_is_suppressed_and_late_echo_inserted() {
        let mut h = Harness::new();
        let echo = EchoSuppressor::new("user");
        let now = h.clock.now();
        h.window
            .register(Fingerprint::new(Role::Assistant, "Hello!"), now);

        let out = echo.handle(entry("1", "agent", "Hello!"), &mut h.ctx()).unwrap();
        assert_eq!(out, EchoOutcome::Suppressed { confirmed: None });
        assert!(h.store.is_empty());

        h.clock.advance(TTL);
        let out = echo.handle(entry("1", "agent", "Hello!"), &mut h.ctx()).unwrap();
        let EchoOutcome::Inserted { message } = out.clone() else {
            panic!("expected insert after the TTL, got {out:?}");
        };
        assert_eq!(message.origin, Origin::Fallback);
        assert_eq!(message.id.as_str(), "fallback-1");
    }

    #[test]
    fn redelivered_entry_is_absorbed_by_id() {
        let mut h = Harness::new();
        let echo = EchoSuppressor::new("user");

        echo.handle(entry("9", "agent", "Recovered"), &mut h.ctx()).unwrap();
        h.clock.advance(TTL * 2);
        let out = echo.handle(entry("9", "agent", "Recovered"), &mut h.ctx()).unwrap();

        assert_eq!(
            out,
            EchoOutcome::AlreadyPresent {
                id: MessageId::new("fallback-9")
            }
        );
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn echo_of_pending_local_message_confirms_it() {
        let mut h = Harness::new();
        let echo = EchoSuppressor::new("user");
        let local = Message::local(MessageId::new("l1"), "hi", h.clock.wall());
        h.store.append(local).unwrap();
        let now = h.clock.now();
        h.window.register(Fingerprint::new(Role::User, "hi"), now);

        let out = echo.handle(entry("5", "user", "hi"), &mut h.ctx()).unwrap();

        assert_eq!(
            out,
            EchoOutcome::Suppressed {
                confirmed: Some(MessageId::new("l1"))
            }
        );
        assert!(h.store.get(&MessageId::new("l1")).unwrap().finalized);
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn blank_entries_are_dropped() {
        let mut h = Harness::new();
        let echo = EchoSuppressor::new("user");
        let out = echo.handle(entry("3", "agent", "  "), &mut h.ctx()).unwrap();
        assert_eq!(out, EchoOutcome::Blank);
        assert!(h.store.is_empty());
    }
}

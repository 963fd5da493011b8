//! Submission handler, local half.
//!
//! A typed message is written in two phases:
//! 1. `stage` appends it immediately as a pending `local` message and
//!    registers its fingerprint (this module);
//! 2. the engine hands the raw text to the transport without holding up the
//!    dispatch loop, and confirms the message once the send resolves.
//!
//! A rejected send leaves the message visible and pending. Retry is the
//! transport's job.

use tracing::debug;

use super::WriteCtx;
use crate::error::Result;
use crate::store::{Message, Role};
use crate::sync::echo::Fingerprint;

pub(crate) fn stage(text: String, ctx: &mut WriteCtx<'_>) -> Result<Message> {
    let message = Message::local(ctx.ids.next_id(), text, ctx.clock.wall());
    ctx.store.append(message.clone())?;
    ctx.window.register(
        Fingerprint::new(Role::User, &message.content),
        ctx.clock.now(),
    );
    debug!(id = %message.id, "staged local message");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::store::Origin;
    use crate::sync::test_support::Harness;

    #[test]
    fn staged_message_is_pending_local_user_turn() {
        let mut h = Harness::new();

        let msg = stage("hi".into(), &mut h.ctx()).unwrap();

        assert_eq!(msg.origin, Origin::Local);
        assert_eq!(msg.role, Role::User);
        assert!(msg.is_pending());
        assert_eq!(h.store.messages(), &[msg]);
        assert_eq!(h.window.len(), 1);
    }

    #[test]
    fn staging_into_a_frozen_store_fails() {
        let mut h = Harness::new();
        h.store.freeze();

        let err = stage("hi".into(), &mut h.ctx()).unwrap_err();
        assert!(matches!(err, SyncError::ReadOnly));
        assert!(h.window.is_empty());
    }
}

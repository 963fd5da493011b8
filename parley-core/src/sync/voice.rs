//! Voice transcription deduplicator.
//!
//! The transport may redeliver voice frames on retry or reconnect, and arrival
//! order across its multiplexed channels is not reliable. The producer-supplied
//! `index` is the only ordering anchor: a frame is admitted iff its index is
//! strictly greater than the last admitted one.

use tracing::debug;

use super::WriteCtx;
use crate::error::Result;
use crate::ipc::frames::VoiceTranscription;
use crate::store::{Message, Role};
use crate::sync::echo::Fingerprint;

/// Cursor value before any frame has been admitted.
pub const NO_INDEX: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceOutcome {
    /// New user turn appended; `message.content` must be forwarded to the
    /// assistant.
    Accepted { message: Message },
    /// Index at or below the cursor. Expected under redelivery.
    Replayed { index: i64, last_processed_index: i64 },
}

#[derive(Debug)]
pub struct VoiceDeduplicator {
    last_processed_index: i64,
}

impl Default for VoiceDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceDeduplicator {
    pub fn new() -> Self {
        Self {
            last_processed_index: NO_INDEX,
        }
    }

    pub fn last_processed_index(&self) -> i64 {
        self.last_processed_index
    }

    pub(crate) fn handle(
        &mut self,
        frame: VoiceTranscription,
        ctx: &mut WriteCtx<'_>,
    ) -> Result<VoiceOutcome> {
        if frame.index <= self.last_processed_index {
            debug!(
                index = frame.index,
                last = self.last_processed_index,
                "dropping replayed voice frame"
            );
            return Ok(VoiceOutcome::Replayed {
                index: frame.index,
                last_processed_index: self.last_processed_index,
            });
        }
        let message = Message::voice(ctx.ids.next_id(), frame.text, ctx.clock.wall());
        ctx.store.append(message.clone())?;
        self.last_processed_index = frame.index;
        ctx.window.register(
            Fingerprint::new(Role::User, &message.content),
            ctx.clock.now(),
        );
        debug!(index = frame.index, id = %message.id, "voice turn admitted");
        Ok(VoiceOutcome::Accepted { message })
    }

    pub fn reset(&mut self) {
        self.last_processed_index = NO_INDEX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::events::TranscriptChange;
    use crate::sync::test_support::Harness;

    fn appended_count(changes: &[TranscriptChange]) -> usize {
        changes
            .iter()
            .filter(|c| matches!(c, TranscriptChange::Appended { .. }))
            .count()
    }

    fn frame(index: i64, text: &str) -> VoiceTranscription {
        VoiceTranscription {
            index,
            text: text.into(),
        }
    }

    #[test]
    fn replaying_the_same_frame_appends_once() {
        let mut h = Harness::new();
        let mut voice = VoiceDeduplicator::new();

        let first = voice.handle(frame(0, "hi there"), &mut h.ctx()).unwrap();
        let second = voice.handle(frame(0, "hi there"), &mut h.ctx()).unwrap();

        assert!(matches!(first, VoiceOutcome::Accepted { .. }));
        assert_eq!(
            second,
            VoiceOutcome::Replayed {
                index: 0,
                last_processed_index: 0
            }
        );
        assert_eq!(appended_count(&h.store.drain_changes()), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn indices_at_or_below_the_cursor_never_land() {
        let mut h = Harness::new();
        let mut voice = VoiceDeduplicator::new();

        for (index, text) in [(2, "two"), (0, "zero"), (1, "one"), (2, "two again"), (5, "five"), (3, "three")] {
            voice.handle(frame(index, text), &mut h.ctx()).unwrap();
        }

        let contents: Vec<_> = h.store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["two", "five"]);
        assert_eq!(voice.last_processed_index(), 5);
    }

    #[test]
    fn accepted_turn_is_a_finalized_voice_user_message() {
        let mut h = Harness::new();
        let mut voice = VoiceDeduplicator::new();

        let VoiceOutcome::Accepted { message } =
            voice.handle(frame(0, "hola"), &mut h.ctx()).unwrap()
        else {
            panic!("expected the first frame to be accepted");
        };
        assert_eq!(message.role, Role::User);
        assert_eq!(message.origin, crate::store::Origin::Voice);
        assert!(message.finalized);
        assert_eq!(h.window.len(), 1);
    }

    #[test]
    fn negative_indices_are_dropped_and_reset_rewinds() {
        let mut h = Harness::new();
        let mut voice = VoiceDeduplicator::new();

        let out = voice.handle(frame(-1, "ghost"), &mut h.ctx()).unwrap();
        assert!(matches!(out, VoiceOutcome::Replayed { .. }));

        voice.handle(frame(3, "x"), &mut h.ctx()).unwrap();
        voice.reset();
        assert_eq!(voice.last_processed_index(), NO_INDEX);
        let out = voice.handle(frame(0, "fresh"), &mut h.ctx()).unwrap();
        assert!(matches!(out, VoiceOutcome::Accepted { .. }));
    }
}

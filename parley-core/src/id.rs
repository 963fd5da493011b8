//! Message id generation.

use crate::store::MessageId;

/// Source of fresh message ids for locally created messages.
pub trait IdGenerator: Send + 'static {
    fn next_id(&mut self) -> MessageId;
}

/// Random v4 UUIDs. Used for live sessions.
#[derive(Debug, Default)]
pub struct UuidIdGen;

impl IdGenerator for UuidIdGen {
    fn next_id(&mut self) -> MessageId {
        MessageId::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Deterministic `msg-0`, `msg-1`, … ids for tests and replays that need
/// reproducible output.
#[derive(Debug, Default)]
pub struct SequentialIdGen(u64);

impl SequentialIdGen {
    pub fn new() -> Self {
        Self(0)
    }
}

impl IdGenerator for SequentialIdGen {
    fn next_id(&mut self) -> MessageId {
        let id = self.0;
        self.0 += 1;
        MessageId::new(format!("msg-{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_are_stable() {
        let mut ids = SequentialIdGen::new();
        assert_eq!(ids.next_id().as_str(), "msg-0");
        assert_eq!(ids.next_id().as_str(), "msg-1");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let mut ids = UuidIdGen;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}

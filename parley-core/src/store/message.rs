//! The unit of the transcript.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key of a message within one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Which producer created a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Typed by the user in this client (optimistic insert).
    Local,
    /// A user turn recovered from the voice transcription channel.
    Voice,
    /// An assistant turn aggregated from streamed tokens.
    Stream,
    /// Recovered from the transport's fallback message list.
    Fallback,
    /// Seeded from persisted history for a preview session.
    History,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
    /// `true` only for the single in-flight assistant turn.
    pub streaming: bool,
    /// `false` for a streaming turn, or for a local message whose send has
    /// not been confirmed yet.
    pub finalized: bool,
}

impl Message {
    /// Optimistic user message. Starts pending until the send is confirmed.
    pub fn local(id: MessageId, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content: content.into(),
            role: Role::User,
            created_at,
            origin: Origin::Local,
            streaming: false,
            finalized: false,
        }
    }

    pub fn voice(id: MessageId, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content: content.into(),
            role: Role::User,
            created_at,
            origin: Origin::Voice,
            streaming: false,
            finalized: true,
        }
    }

    /// Empty assistant turn that will receive streamed content.
    pub fn streaming(id: MessageId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content: String::new(),
            role: Role::Assistant,
            created_at,
            origin: Origin::Stream,
            streaming: true,
            finalized: false,
        }
    }

    pub fn fallback(
        id: MessageId,
        content: impl Into<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            role,
            created_at,
            origin: Origin::Fallback,
            streaming: false,
            finalized: true,
        }
    }

    pub fn history(
        id: MessageId,
        content: impl Into<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            role,
            created_at,
            origin: Origin::History,
            streaming: false,
            finalized: true,
        }
    }

    /// An optimistic message still waiting for its send to resolve.
    pub fn is_pending(&self) -> bool {
        !self.streaming && !self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_camel_case_and_lowercase_enums() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).expect("valid timestamp");
        let msg = Message::voice("msg-3".into(), "hi there", at);

        let json = serde_json::to_value(&msg).expect("serialize message");
        assert_eq!(json["id"], "msg-3");
        assert_eq!(json["role"], "user");
        assert_eq!(json["origin"], "voice");
        assert_eq!(json["streaming"], false);
        assert_eq!(json["finalized"], true);
        assert!(json["createdAt"].as_str().is_some());
    }

    #[test]
    fn only_unconfirmed_local_messages_are_pending() {
        let at = Utc::now();
        assert!(Message::local("a".into(), "x", at).is_pending());
        assert!(!Message::streaming("b".into(), at).is_pending());
        assert!(!Message::voice("c".into(), "x", at).is_pending());
    }
}

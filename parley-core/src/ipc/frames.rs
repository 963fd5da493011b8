//! Inbound transport frames.
//!
//! ## Shapes
//!
//! | Source | Shape |
//! |--------|-------|
//! | voice transcription | JSON `{"type":"voice_transcription","resp":{"index":0,"text":".."}}` |
//! | assistant stream | text payload on topic `"llm_data"`: `[START]`, `[DONE]`, `[INTERRUPTED]` or a content delta |
//! | fallback list | `{"id":"..","message":"..","from":{"identity":".."},"timestamp":1700000000000}` |

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const START_TOKEN: &str = "[START]";
pub const DONE_TOKEN: &str = "[DONE]";
pub const INTERRUPTED_TOKEN: &str = "[INTERRUPTED]";

pub const VOICE_TRANSCRIPTION_TYPE: &str = "voice_transcription";

/// One undecoded payload as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub topic: Option<String>,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn text(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            payload: text.into().into_bytes(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            topic: None,
            payload: value.to_string().into_bytes(),
        }
    }
}

/// Producer-indexed voice transcription of one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTranscription {
    pub index: i64,
    pub text: String,
}

/// One token of an assistant stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamToken {
    Start,
    Done,
    Interrupted,
    Content(String),
}

impl StreamToken {
    /// Control tokens match exactly; anything else is content.
    pub fn parse(text: &str) -> Self {
        match text {
            START_TOKEN => Self::Start,
            DONE_TOKEN => Self::Done,
            INTERRUPTED_TOKEN => Self::Interrupted,
            other => Self::Content(other.to_string()),
        }
    }
}

/// A decoded frame, ready for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Voice(VoiceTranscription),
    Stream(StreamToken),
    /// Well-formed JSON of a `type` this core does not consume.
    Ignored { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    resp: Option<serde_json::Value>,
}

impl Frame {
    /// Decode a raw frame.
    ///
    /// # Errors
    /// `SyncError::MalformedFrame` for non-UTF-8 stream text, unparseable
    /// JSON, or a voice frame without a valid `resp`.
    pub fn decode(raw: &RawFrame, stream_topic: &str) -> Result<Self> {
        if raw.topic.as_deref() == Some(stream_topic) {
            let text = std::str::from_utf8(&raw.payload)
                .map_err(|e| SyncError::MalformedFrame(format!("stream token is not UTF-8: {e}")))?;
            return Ok(Self::Stream(StreamToken::parse(text)));
        }

        let envelope: Envelope = serde_json::from_slice(&raw.payload)
            .map_err(|e| SyncError::MalformedFrame(format!("invalid frame JSON: {e}")))?;
        if envelope.kind != VOICE_TRANSCRIPTION_TYPE {
            return Ok(Self::Ignored {
                kind: envelope.kind,
            });
        }

        let resp = envelope.resp.ok_or_else(|| {
            SyncError::MalformedFrame("voice transcription frame without `resp`".into())
        })?;
        let voice: VoiceTranscription = serde_json::from_value(resp)
            .map_err(|e| SyncError::MalformedFrame(format!("invalid voice transcription: {e}")))?;
        Ok(Self::Voice(voice))
    }
}

/// Participant attribution of a fallback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
}

/// One item of the transport's fallback message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub id: String,
    pub message: String,
    pub from: Participant,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

//! Replay scripts: recorded transport traffic fed through a live session.
//!
//! A script is a JSON array of steps:
//!
//! ```json
//! [
//!   { "submit": "hi" },
//!   { "frame": { "json": { "type": "voice_transcription", "resp": { "index": 0, "text": "hi there" } } } },
//!   { "frame": { "topic": "llm_data", "text": "[START]" } },
//!   { "sleepMs": 250 },
//!   { "fallback": { "id": "f1", "message": "Hola!", "from": { "identity": "avatar" }, "timestamp": 0 } },
//!   { "reconnect": true }
//! ]
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use parley_core::{FallbackEntry, LoopbackTransport, RawFrame, SyncEngine};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Frame(FrameStep),
    Fallback(FallbackEntry),
    Submit(String),
    SleepMs(u64),
    Reconnect(bool),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameStep {
    Text {
        topic: String,
        text: String,
    },
    Json {
        json: serde_json::Value,
        #[serde(default)]
        topic: Option<String>,
    },
}

impl FrameStep {
    pub fn into_raw(self) -> RawFrame {
        match self {
            Self::Text { topic, text } => RawFrame::text(topic, text),
            Self::Json { json, topic } => RawFrame {
                topic,
                payload: json.to_string().into_bytes(),
            },
        }
    }
}

pub fn parse_script(raw: &str) -> anyhow::Result<Vec<Step>> {
    serde_json::from_str(raw).context("invalid replay script")
}

pub fn load_script(path: &Path) -> anyhow::Result<Vec<Step>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading replay script {}", path.display()))?;
    parse_script(&raw)
}

/// Feed every step into a live session, in order.
///
/// Submission failures don't stop the replay; their messages are returned.
pub async fn replay(
    engine: &SyncEngine,
    transport: &LoopbackTransport,
    steps: Vec<Step>,
) -> anyhow::Result<Vec<String>> {
    let mut errors = Vec::new();

    for (n, step) in steps.into_iter().enumerate() {
        debug!(step = n, ?step, "replaying");
        match step {
            Step::Frame(frame) => {
                transport.push_frame(frame.into_raw());
            }
            Step::Fallback(entry) => {
                transport.push_fallback(entry);
            }
            Step::Submit(text) => {
                if let Err(e) = engine.submit(text).await {
                    warn!(step = n, "submission failed: {e}");
                    errors.push(format!("step {n}: {e}"));
                }
            }
            Step::SleepMs(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Reconnect(true) => engine.reconnect()?,
            Step::Reconnect(false) => {}
        }
        engine.flush().await?;
        // Give spawned voice forwarding a chance to run.
        tokio::task::yield_now().await;
    }

    Ok(errors)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{ManualClock, Origin, SyncConfig, Transport};
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_every_step_kind() {
        let steps = parse_script(
            r#"[
              { "frame": { "topic": "llm_data", "text": "[START]" } },
              { "frame": { "json": { "type": "voice_transcription", "resp": { "index": 0, "text": "yo" } } } },
              { "fallback": { "id": "f1", "message": "hey", "from": { "identity": "avatar" }, "timestamp": 12 } },
              { "submit": "hi" },
              { "sleepMs": 40 },
              { "reconnect": true }
            ]"#,
        )
        .unwrap();

        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[0],
            Step::Frame(FrameStep::Text {
                topic: "llm_data".into(),
                text: "[START]".into()
            })
        );
        assert!(matches!(&steps[1], Step::Frame(FrameStep::Json { topic: None, .. })));
        assert!(matches!(&steps[2], Step::Fallback(entry) if entry.from.identity == "avatar"));
        assert_eq!(steps[3], Step::Submit("hi".into()));
        assert_eq!(steps[4], Step::SleepMs(40));
        assert_eq!(steps[5], Step::Reconnect(true));
    }

    #[test]
    fn unknown_step_is_rejected() {
        assert!(parse_script(r#"[{ "teleport": 1 }]"#).is_err());
    }

    #[test]
    fn json_frame_step_keeps_payload() {
        let raw = FrameStep::Json {
            json: json!({ "type": "agent_state" }),
            topic: Some("lk.agent".into()),
        }
        .into_raw();

        assert_eq!(raw.topic.as_deref(), Some("lk.agent"));
        let value: serde_json::Value = serde_json::from_slice(&raw.payload).unwrap();
        assert_eq!(value["type"], "agent_state");
    }

    #[tokio::test]
    async fn replay_drives_a_live_session() {
        let transport = LoopbackTransport::new();
        transport.connect().await.unwrap();
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(transport.clone()),
            Arc::new(ManualClock::new()),
        );
        engine.start_live().await;

        let steps = parse_script(
            r#"[
              { "submit": "hi" },
              { "frame": { "json": { "type": "voice_transcription", "resp": { "index": 0, "text": "hi there" } } } },
              { "frame": { "topic": "llm_data", "text": "[START]" } },
              { "frame": { "topic": "llm_data", "text": "Hola!" } },
              { "frame": { "topic": "llm_data", "text": "[DONE]" } },
              { "fallback": { "id": "f1", "message": "Hola!", "from": { "identity": "avatar" }, "timestamp": 0 } }
            ]"#,
        )
        .unwrap();
        let errors = replay(&engine, &transport, steps).await.unwrap();

        assert!(errors.is_empty());
        let origins: Vec<_> = engine.transcript().iter().map(|m| m.origin).collect();
        assert_eq!(origins, vec![Origin::Local, Origin::Voice, Origin::Stream]);
        assert_eq!(transport.sent(), vec!["hi".to_string(), "hi there".to_string()]);
    }

    #[tokio::test]
    async fn failed_submission_is_reported_not_fatal() {
        let transport = LoopbackTransport::new();
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(transport.clone()),
            Arc::new(ManualClock::new()),
        );
        engine.start_live().await;

        // Never connected, so every send is refused.
        let steps = parse_script(r#"[{ "submit": "anyone?" }, { "submit": "hello?" }]"#).unwrap();
        let errors = replay(&engine, &transport, steps).await.unwrap();

        assert_eq!(errors.len(), 2);
        assert_eq!(engine.transcript().len(), 2);
        assert!(engine.transcript().iter().all(|m| m.is_pending()));
    }
}

//! JSON summary printed once a run finishes.

use parley_core::{DiagnosticsSnapshot, LoopbackTransport, Message, SessionStatus, SyncEngine};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub status: SessionStatus,
    pub transcript: Vec<Message>,
    /// Texts handed to the transport, in order.
    pub sent: Vec<String>,
    pub diagnostics: DiagnosticsSnapshot,
    pub errors: Vec<String>,
}

impl Report {
    pub fn collect(engine: &SyncEngine, transport: &LoopbackTransport, errors: Vec<String>) -> Self {
        Self {
            status: engine.status(),
            transcript: engine.transcript(),
            sent: transport.sent(),
            diagnostics: engine.diagnostics_snapshot(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{HistoryRecord, ManualClock, Role, StaticHistory, SyncConfig};

    use super::*;

    #[tokio::test]
    async fn preview_report_serializes_camel_case() {
        let transport = LoopbackTransport::new();
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(transport.clone()),
            Arc::new(ManualClock::new()),
        );
        let history = StaticHistory(vec![HistoryRecord {
            id: "m1".into(),
            content: "saved".into(),
            role: Role::Assistant,
            created_at: chrono::Utc::now(),
        }]);
        engine.start_preview(&history).await.unwrap();

        let value = serde_json::to_value(Report::collect(&engine, &transport, Vec::new())).unwrap();

        assert_eq!(value["status"], "preview");
        assert_eq!(value["transcript"][0]["origin"], "history");
        assert!(value["transcript"][0]["createdAt"].is_string());
        assert_eq!(value["diagnostics"]["framesIn"], 0);
        assert!(value["sent"].as_array().unwrap().is_empty());
    }
}

//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::SyncConfig;
use serde::{Deserialize, Serialize};

const MIN_ECHO_TTL_MS: u64 = 100;
const MAX_ECHO_TTL_MS: u64 = 60_000;
const MAX_ECHO_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub echo_ttl_ms: u64,
    pub echo_capacity: usize,
    pub local_identity: String,
    pub stream_topic: String,
    pub history_db: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        let core = SyncConfig::default();
        Self {
            echo_ttl_ms: core.echo_ttl.as_millis() as u64,
            echo_capacity: core.echo_capacity,
            local_identity: core.local_identity,
            stream_topic: core.stream_topic,
            history_db: None,
            log_filter: "parley=info".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.echo_ttl_ms = self.echo_ttl_ms.clamp(MIN_ECHO_TTL_MS, MAX_ECHO_TTL_MS);
        self.echo_capacity = self.echo_capacity.clamp(1, MAX_ECHO_CAPACITY);
        self.local_identity = non_empty_trimmed(&self.local_identity, defaults.local_identity);
        self.stream_topic = non_empty_trimmed(&self.stream_topic, defaults.stream_topic);
        self.log_filter = non_empty_trimmed(&self.log_filter, defaults.log_filter);
        self.history_db = self
            .history_db
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            echo_ttl: Duration::from_millis(self.echo_ttl_ms),
            echo_capacity: self.echo_capacity,
            local_identity: self.local_identity.clone(),
            stream_topic: self.stream_topic.clone(),
            ..SyncConfig::default()
        }
    }

    /// Configured history database, or the platform default.
    pub fn history_db_path(&self) -> PathBuf {
        self.history_db.clone().unwrap_or_else(default_history_db_path)
    }
}

fn non_empty_trimmed(raw: &str, fallback: String) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.to_string()
    }
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Parley")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("parley")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn default_history_db_path() -> PathBuf {
    data_dir().join("parley.db")
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_and_trims() {
        let mut settings = AppSettings {
            echo_ttl_ms: 5,
            echo_capacity: 0,
            local_identity: "  guest-42 ".into(),
            stream_topic: "   ".into(),
            history_db: Some(PathBuf::new()),
            log_filter: String::new(),
        };
        settings.normalize();

        assert_eq!(settings.echo_ttl_ms, MIN_ECHO_TTL_MS);
        assert_eq!(settings.echo_capacity, 1);
        assert_eq!(settings.local_identity, "guest-42");
        assert_eq!(settings.stream_topic, "llm_data");
        assert_eq!(settings.history_db, None);
        assert_eq!(settings.log_filter, "parley=info");

        settings.echo_ttl_ms = 10 * 60 * 1000;
        settings.echo_capacity = 1_000_000;
        settings.normalize();
        assert_eq!(settings.echo_ttl_ms, MAX_ECHO_TTL_MS);
        assert_eq!(settings.echo_capacity, MAX_ECHO_CAPACITY);
    }

    #[test]
    fn missing_or_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(load_settings(&missing), AppSettings::default());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert_eq!(load_settings(&broken), AppSettings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "echoTtlMs": 2500, "localIdentity": "me" }"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.echo_ttl_ms, 2_500);
        assert_eq!(settings.local_identity, "me");
        assert_eq!(settings.echo_capacity, 64);

        let config = settings.sync_config();
        assert_eq!(config.echo_ttl, Duration::from_millis(2_500));
        assert_eq!(config.local_identity, "me");
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            echo_capacity: 128,
            ..AppSettings::default()
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }
}

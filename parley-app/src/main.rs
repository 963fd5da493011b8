//! Parley host entry point.
//!
//! Drives a `SyncEngine` over the in-memory loopback transport: either
//! replaying a recorded script through a live session, or seeding a frozen
//! preview from the SQLite history. The resulting transcript is printed as
//! JSON on stdout; logs go to stderr.

mod report;
mod script;
mod settings;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parley_core::{LoopbackTransport, SyncEngine, SystemClock, Transport};
use report::Report;
use script::{load_script, replay};
use settings::{default_settings_path, load_settings, save_settings};
use storage::SqliteHistory;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Parser)]
#[command(
    name = "parley",
    about = "Replay avatar chat traffic through the transcript synchronizer"
)]
struct Args {
    /// Replay script (JSON array of steps).
    #[arg(short, long, conflicts_with = "preview")]
    script: Option<PathBuf>,

    /// Settings file. Defaults to the platform data directory.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Show a read-only preview of a persisted conversation.
    #[arg(long, value_name = "CONVERSATION_ID")]
    preview: Option<String>,

    /// History database, overriding the settings file.
    #[arg(long)]
    history_db: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit.
    #[arg(long)]
    init_settings: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let args = Args::parse();

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if let Some(db) = args.history_db.clone() {
        settings.history_db = Some(db);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&settings.log_filter))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(settings = %settings_path.display(), "parley starting");

    if args.init_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings written");
        return Ok(());
    }

    let transport = LoopbackTransport::new();
    let engine = SyncEngine::new(
        settings.sync_config(),
        Arc::new(transport.clone()),
        Arc::new(SystemClock),
    );

    let report = if let Some(conversation) = args.preview {
        let history = SqliteHistory::new(settings.history_db_path(), conversation);
        engine
            .start_preview(&history)
            .await
            .context("loading preview history")?;
        Report::collect(&engine, &transport, Vec::new())
    } else {
        let Some(path) = args.script else {
            anyhow::bail!("nothing to do: pass --script <path> or --preview <conversation-id>");
        };
        let steps = load_script(&path)?;
        info!(steps = steps.len(), script = %path.display(), "replaying");

        transport.connect().await?;
        engine.start_live().await;
        let errors = replay(&engine, &transport, steps).await?;
        let report = Report::collect(&engine, &transport, errors);
        engine.leave().await;
        transport.disconnect().await?;
        report
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use launchguard::config::Config;
use launchguard::core::pipeline::run_pipeline;
use launchguard::db::SharedDatabase;
use launchguard::feed::{FeedSource, start_snapshot_feed};
use launchguard::response::ResponseEngine;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("launchguard=info".parse()?))
        .init();

    tracing::info!("launchguard starting...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path);
    tracing::info!("Config: {:?}", config);

    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = SharedDatabase::open(db_path)?;
    tracing::info!("Incident database opened at {}", config.database.path);

    // Owner capability stays here; the pipeline only needs the operator path.
    let (engine, _owner) = if config.database.restore {
        ResponseEngine::restore(&config.response, db)?
    } else {
        ResponseEngine::with_database(&config.response, db)?
    };
    let engine = Arc::new(engine);

    let (feed_tx, feed_rx) = mpsc::channel(config.feed.channel_capacity.max(1));
    let feed_handle = start_snapshot_feed(
        FeedSource {
            path: PathBuf::from(&config.feed.snapshots_path),
        },
        feed_tx,
    );
    tracing::info!("Snapshot feed started from {}", config.feed.snapshots_path);

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(run_pipeline(
        feed_rx,
        engine.clone(),
        config.detection.clone(),
        config.feed.window_size,
    ));

    if feed_handle.join().is_err() {
        tracing::warn!("Snapshot feed thread panicked");
    }

    tracing::info!(
        snapshots = summary.snapshots,
        violations = summary.violations,
        handled = summary.handled,
        cooldown = summary.cooldown_rejections,
        stale = summary.stale,
        malformed = summary.malformed,
        "Run complete"
    );
    tracing::info!(
        incidents = engine.incident_count(),
        blacklisted = engine.blacklist().len(),
        unresolved = engine.unresolved_threats().len(),
        paused = engine.is_paused(),
        "Ledger state"
    );
    Ok(())
}

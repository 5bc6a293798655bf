pub mod collaborators;
pub mod content;
pub mod db;
pub mod master;
pub mod movement;
pub mod settings;
pub mod tracking;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use collaborators::{
    ChannelLocationSource, ConfigStore, LoggingPlayback, MemoryStore, TemplateStoryGenerator,
};
use db::Database;
use master::{MasterDeps, MasterEvent, MasterService};
use movement::LocationReading;

const DATA_DIR_ENV: &str = "ECHOTRAIL_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "echotrail-data";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn open_store() -> Arc<dyn ConfigStore> {
    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    match Database::new(data_dir.join("echotrail.sqlite3")) {
        Ok(database) => Arc::new(database),
        Err(err) => {
            warn!("Falling back to in-memory config store: {err:?}");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Headless run: GPS fixes arrive as JSON lines on stdin, stories are
/// templated, and playback is logged. Stops at end of input or Ctrl-C.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("EchoTrail starting up...");

    let store = open_store();
    let (source, fixes) = ChannelLocationSource::new(64);
    let (playback, mut playback_events) = LoggingPlayback::new();

    let master = MasterService::new(MasterDeps::new(
        Arc::new(source),
        Arc::new(TemplateStoryGenerator),
        Arc::new(playback),
        store,
    ))
    .await;

    let pump = {
        let master = master.clone();
        tokio::spawn(async move {
            while let Some(event) = playback_events.recv().await {
                master.handle_playback_event(event).await;
            }
        })
    };

    let mut listener = master.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = listener.recv().await {
            match event {
                MasterEvent::ContentReady(content) => {
                    info!("Ready: \"{}\" ({}s)", content.title, content.estimated_duration_secs)
                }
                MasterEvent::Error(message) => warn!("{message}"),
                MasterEvent::Status(_) | MasterEvent::StatsUpdated(_) => {}
            }
        }
    });

    master.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<LocationReading>(&line) {
                        Ok(reading) => {
                            if fixes.send(reading).await.is_err() {
                                warn!("Location channel closed");
                                break;
                            }
                        }
                        Err(err) => warn!("Skipping malformed fix: {err}"),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        error!("Failed to read stdin: {err}");
                        break;
                    }
                }
            }
        }
    }
    drop(fixes);

    // Let an in-flight story land before shutting down.
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while master.pipeline().is_generating() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Generation still running at shutdown");
    }

    master.stop().await?;

    let stats = master.stats().await;
    info!(
        "Session done: {:.0} m travelled, {} generated, {} played",
        stats.total_distance_m, stats.content_generated, stats.content_consumed
    );

    pump.abort();
    reporter.abort();
    Ok(())
}

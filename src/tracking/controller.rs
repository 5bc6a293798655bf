use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::LocationSource;
use crate::movement::{ClassifierConfig, LocationReading, MovementAnalysis, MovementClassifier, MovementMode};

use super::loop_worker::tracking_loop;

/// Emitted by the tracking loop for every classified fix.
#[derive(Debug, Clone)]
pub enum TrackingEvent {
    Update {
        reading: LocationReading,
        analysis: MovementAnalysis,
    },
    ModeChanged {
        from: MovementMode,
        to: MovementMode,
        analysis: MovementAnalysis,
    },
    /// The location source will not deliver any more fixes.
    SourceEnded,
}

/// Owns the background loop that turns raw fixes into movement analyses.
/// Each tracking session starts with a fresh classifier.
pub struct TrackingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    source: Option<Arc<dyn LocationSource>>,
}

impl TrackingController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            source: None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.handle.is_some()
    }

    pub async fn start_tracking(
        &mut self,
        source: Arc<dyn LocationSource>,
        config: ClassifierConfig,
        events: mpsc::UnboundedSender<TrackingEvent>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("tracking already active");
        }

        source
            .start()
            .await
            .context("location source failed to start")?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tracking_loop(
            source.clone(),
            MovementClassifier::new(config),
            events,
            cancel_token.clone(),
        ));

        info!("Location tracking started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.source = Some(source);
        Ok(())
    }

    pub async fn stop_tracking(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(source) = self.source.take() {
            if let Err(err) = source.stop().await {
                warn!("Location source failed to stop cleanly: {err:?}");
            }
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("tracking loop task failed to join")?;
            info!("Location tracking stopped");
        }
        Ok(())
    }
}

impl Default for TrackingController {
    fn default() -> Self {
        Self::new()
    }
}

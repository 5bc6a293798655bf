use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collaborators::LocationSource;
use crate::movement::MovementClassifier;

use super::controller::TrackingEvent;

// Set to true to enable per-fix logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub async fn tracking_loop(
    source: Arc<dyn LocationSource>,
    mut classifier: MovementClassifier,
    events: mpsc::UnboundedSender<TrackingEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("tracking loop shutting down");
                break;
            }
            next = source.next_reading() => {
                let Some(reading) = next else {
                    log_warn!("location source ended; tracking loop exiting");
                    let _ = events.send(TrackingEvent::SourceEnded);
                    break;
                };

                let previous = classifier.committed_mode();
                let analysis = classifier.analyze(&reading);
                log_debug!(
                    "fix {:.5},{:.5}: {:.1} km/h avg {:.1}, {} ({:.2})",
                    reading.position.latitude,
                    reading.position.longitude,
                    analysis.current_speed_kmh,
                    analysis.average_speed_kmh,
                    analysis.movement_mode.as_str(),
                    analysis.confidence
                );

                let changed = analysis.movement_mode != previous;
                let update = TrackingEvent::Update {
                    reading,
                    analysis: analysis.clone(),
                };
                if events.send(update).is_err() {
                    log_warn!("tracking event receiver dropped; stopping loop");
                    break;
                }

                if changed {
                    log_info!(
                        "movement mode changed: {} -> {}",
                        previous.as_str(),
                        analysis.movement_mode.as_str()
                    );
                    let change = TrackingEvent::ModeChanged {
                        from: previous,
                        to: analysis.movement_mode,
                        analysis,
                    };
                    if events.send(change).is_err() {
                        log_error!("mode change undeliverable; stopping loop");
                        break;
                    }
                }
            }
        }
    }
}

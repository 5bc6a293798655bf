use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio::sync::{mpsc, Mutex};

use crate::movement::LocationReading;

/// Raw GPS provider.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Begin delivering fixes.
    async fn start(&self) -> Result<()>;

    /// Wait for the next fix. `None` means the source has ended for good.
    /// Must be cancel-safe: the tracking loop drops this future on shutdown.
    async fn next_reading(&self) -> Option<LocationReading>;

    async fn stop(&self) -> Result<()>;
}

/// Location source fed through a channel, e.g. from a platform callback or
/// a recorded trace.
pub struct ChannelLocationSource {
    rx: Mutex<mpsc::Receiver<LocationReading>>,
}

impl ChannelLocationSource {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<LocationReading>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { rx: Mutex::new(rx) }, tx)
    }
}

#[async_trait]
impl LocationSource for ChannelLocationSource {
    async fn start(&self) -> Result<()> {
        info!("Channel location source started");
        Ok(())
    }

    async fn next_reading(&self) -> Option<LocationReading> {
        self.rx.lock().await.recv().await
    }

    async fn stop(&self) -> Result<()> {
        info!("Channel location source stopped");
        Ok(())
    }
}

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::content::GeneratedContent;
use crate::settings::AudioQuality;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Reported back by the playback collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    Started { content_id: String },
    Completed { content_id: String },
}

/// Speech playback (TTS + audio output).
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Add content to the playback queue; with `autoplay` it starts as soon as
    /// the player is free.
    async fn enqueue(&self, content: &GeneratedContent, autoplay: bool) -> Result<()>;
    async fn dequeue(&self, content_id: &str) -> Result<()>;
    async fn skip(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    /// Stop the current item and drop everything queued.
    async fn stop(&self) -> Result<()>;
    async fn set_audio_quality(&self, quality: AudioQuality) -> Result<()>;
}

/// Headless player: logs what it would say and reports each autoplayed item
/// as started and finished right away.
pub struct LoggingPlayback {
    events: mpsc::UnboundedSender<PlaybackEvent>,
    pending: Mutex<VecDeque<String>>,
}

impl LoggingPlayback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: tx,
                pending: Mutex::new(VecDeque::new()),
            },
            rx,
        )
    }

    fn report(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }

    fn play_through(&self, content_id: String) {
        self.report(PlaybackEvent::StateChanged(PlaybackState::Playing));
        self.report(PlaybackEvent::Started {
            content_id: content_id.clone(),
        });
        self.report(PlaybackEvent::Completed { content_id });
        self.report(PlaybackEvent::StateChanged(PlaybackState::Idle));
    }
}

#[async_trait]
impl PlaybackSink for LoggingPlayback {
    async fn enqueue(&self, content: &GeneratedContent, autoplay: bool) -> Result<()> {
        info!(
            "[playback] {} \"{}\" ({}s, {})",
            if autoplay { "playing" } else { "queued" },
            content.title,
            content.estimated_duration_secs,
            content.movement_mode.as_str()
        );
        if autoplay {
            self.play_through(content.id.clone());
        } else {
            self.pending.lock().await.push_back(content.id.clone());
        }
        Ok(())
    }

    async fn dequeue(&self, content_id: &str) -> Result<()> {
        self.pending.lock().await.retain(|id| id != content_id);
        Ok(())
    }

    async fn skip(&self) -> Result<()> {
        let next = self.pending.lock().await.pop_front();
        if let Some(content_id) = next {
            info!("[playback] skipping to {content_id}");
            self.play_through(content_id);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.report(PlaybackEvent::StateChanged(PlaybackState::Paused));
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let next = self.pending.lock().await.pop_front();
        match next {
            Some(content_id) => self.play_through(content_id),
            None => self.report(PlaybackEvent::StateChanged(PlaybackState::Idle)),
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.pending.lock().await.clear();
        self.report(PlaybackEvent::StateChanged(PlaybackState::Idle));
        Ok(())
    }

    async fn set_audio_quality(&self, quality: AudioQuality) -> Result<()> {
        info!("[playback] audio quality -> {:?}", quality);
        Ok(())
    }
}

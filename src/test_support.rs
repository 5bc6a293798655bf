//! Scripted collaborators for unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::collaborators::{PlaybackSink, Story, StoryGenerator};
use crate::content::prompt::StoryPrompt;
use crate::content::GeneratedContent;
use crate::settings::AudioQuality;

fn story_of(words: usize) -> Story {
    Story {
        title: "The Old Bridge".into(),
        body: vec!["stone"; words.max(1)].join(" "),
    }
}

/// Returns a fixed story with the given word count.
pub struct StaticGenerator {
    words: usize,
    calls: AtomicUsize,
}

impl StaticGenerator {
    pub fn new(words: usize) -> Self {
        Self {
            words,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryGenerator for StaticGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> Result<Story> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(story_of(self.words))
    }
}

pub struct FailingGenerator;

#[async_trait]
impl StoryGenerator for FailingGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> Result<Story> {
        Err(anyhow!("model backend unavailable"))
    }
}

pub struct SlowGenerator(pub Duration);

#[async_trait]
impl StoryGenerator for SlowGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> Result<Story> {
        tokio::time::sleep(self.0).await;
        Ok(story_of(20))
    }
}

/// Answers immediately unless held, in which case each call blocks until
/// [`GatedGenerator::release`].
pub struct GatedGenerator {
    held: AtomicBool,
    entered: Notify,
    gate: Notify,
    calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }

    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryGenerator for GatedGenerator {
    async fn generate_story(&self, _prompt: &StoryPrompt) -> Result<Story> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        Ok(story_of(30))
    }
}

/// Records every call made by the master service.
#[derive(Default)]
pub struct RecordingPlayback {
    pub enqueued: Mutex<Vec<(GeneratedContent, bool)>>,
    pub stops: AtomicUsize,
    pub skips: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub quality: Mutex<Option<AudioQuality>>,
}

impl RecordingPlayback {
    pub fn enqueued_count(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }
}

#[async_trait]
impl PlaybackSink for RecordingPlayback {
    async fn enqueue(&self, content: &GeneratedContent, autoplay: bool) -> Result<()> {
        self.enqueued.lock().unwrap().push((content.clone(), autoplay));
        Ok(())
    }

    async fn dequeue(&self, content_id: &str) -> Result<()> {
        self.enqueued
            .lock()
            .unwrap()
            .retain(|(c, _)| c.id != content_id);
        Ok(())
    }

    async fn skip(&self) -> Result<()> {
        self.skips.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_audio_quality(&self, quality: AudioQuality) -> Result<()> {
        *self.quality.lock().unwrap() = Some(quality);
        Ok(())
    }
}

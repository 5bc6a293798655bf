use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::collaborators::{ConfigStore, LocationSource, PlaybackEvent, PlaybackSink, StoryGenerator};
use crate::content::{
    ContentPipeline, ContentRequest, GeneratedContent, GenerationOutcome, PipelineConfig,
    StrategyTable,
};
use crate::movement::{ClassifierConfig, LocationReading, MovementAnalysis, MovementMode};
use crate::settings::{
    AudioQuality, ProfileUpdate, Settings, SettingsStore, SettingsUpdate, UserProfile,
};
use crate::tracking::{TrackingController, TrackingEvent};
use crate::utils::geo::GeoPoint;

use super::events::{MasterEvent, StatusSnapshot};
use super::state::{MasterState, OperatingMode, UsageStats};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const DISCOVERY_INTERVAL_SECS: u64 = 45;
const PASSIVE_INTERVAL_SECS: u64 = 120;

/// Collaborators and tuning the master service is built from.
pub struct MasterDeps {
    pub location: Arc<dyn LocationSource>,
    pub generator: Arc<dyn StoryGenerator>,
    pub playback: Arc<dyn PlaybackSink>,
    pub store: Arc<dyn ConfigStore>,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub strategies: StrategyTable,
}

impl MasterDeps {
    pub fn new(
        location: Arc<dyn LocationSource>,
        generator: Arc<dyn StoryGenerator>,
        playback: Arc<dyn PlaybackSink>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            location,
            generator,
            playback,
            store,
            classifier: ClassifierConfig::default(),
            pipeline: PipelineConfig::default(),
            strategies: StrategyTable::default(),
        }
    }
}

/// Owns the operating mode, routes tracking output into the content
/// pipeline and hands finished content to playback.
#[derive(Clone)]
pub struct MasterService {
    state: Arc<Mutex<MasterState>>,
    pipeline: ContentPipeline,
    settings: Arc<SettingsStore>,
    tracking: Arc<Mutex<TrackingController>>,
    location: Arc<dyn LocationSource>,
    playback: Arc<dyn PlaybackSink>,
    classifier_config: ClassifierConfig,
    events: broadcast::Sender<MasterEvent>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MasterService {
    /// Build the service and restore persisted configuration and history.
    /// Starts in [`OperatingMode::Paused`].
    pub async fn new(deps: MasterDeps) -> Self {
        let settings = SettingsStore::load(deps.store.clone()).await;
        let max_queue_size = settings.settings().await.max_queue_size;

        let pipeline = ContentPipeline::new(
            PipelineConfig {
                max_queue_size,
                ..deps.pipeline
            },
            deps.strategies,
            deps.generator,
            deps.store,
        );
        pipeline.load_history().await;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(MasterState::new(OperatingMode::Paused))),
            pipeline,
            settings: Arc::new(settings),
            tracking: Arc::new(Mutex::new(TrackingController::new())),
            location: deps.location,
            playback: deps.playback,
            classifier_config: deps.classifier,
            events,
            ticker: Arc::new(Mutex::new(None)),
            dispatcher: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MasterEvent> {
        self.events.subscribe()
    }

    pub fn pipeline(&self) -> &ContentPipeline {
        &self.pipeline
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        let queue_size = self.pipeline.queue_len().await;
        let state = self.state.lock().await;
        StatusSnapshot::from_state(&state, queue_size)
    }

    pub async fn mode(&self) -> OperatingMode {
        self.state.lock().await.mode
    }

    pub async fn stats(&self) -> UsageStats {
        self.settings.stats().await
    }

    pub async fn profile(&self) -> UserProfile {
        self.settings.profile().await
    }

    pub async fn settings(&self) -> Settings {
        self.settings.settings().await
    }

    /// Begin tracking and content generation. Resumes the last persisted
    /// operating mode, or Discovery if the service was last paused.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.active {
                bail!("master service already active");
            }
            state.active = true;
            state.refresh_interaction();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let started = self
            .tracking
            .lock()
            .await
            .start_tracking(self.location.clone(), self.classifier_config.clone(), tx)
            .await;
        if let Err(err) = started {
            let mut state = self.state.lock().await;
            state.active = false;
            state.refresh_interaction();
            return Err(err);
        }

        self.spawn_dispatcher(rx).await;

        let stats = self
            .settings
            .update_stats(|stats| {
                stats.sessions_started += 1;
                stats.last_session_started_at = Some(Utc::now());
            })
            .await;
        self.persist_stats().await;
        self.emit(MasterEvent::StatsUpdated(stats));

        let resume = match self.settings.operating_mode().await {
            OperatingMode::Paused => OperatingMode::Discovery,
            mode => mode,
        };
        info!("Master service started; entering {resume:?}");
        self.set_mode(resume).await;

        self.spawn_ticker().await;
        self.emit_status().await;
        Ok(())
    }

    /// Stop tracking and background work. Safe to call when not started.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.active {
                return Ok(());
            }
            state.active = false;
            state.refresh_interaction();
        }

        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }

        if let Err(err) = self.tracking.lock().await.stop_tracking().await {
            error!("Failed to stop location tracking: {err:?}");
        }

        // The tracking loop owned the sender, so the dispatcher drains and exits.
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(err) = handle.await {
                error!("Tracking dispatcher failed to join: {err:?}");
            }
        }

        self.persist_stats().await;
        info!("Master service stopped");
        self.emit_status().await;
        Ok(())
    }

    /// Switch operating mode and apply its entry effects. No-op if `mode` is
    /// already current.
    pub async fn set_mode(&self, mode: OperatingMode) {
        let (previous, active) = {
            let mut state = self.state.lock().await;
            if state.mode == mode {
                return;
            }
            let previous = state.mode;
            state.mode = mode;
            (previous, state.active)
        };
        info!("Operating mode {previous:?} -> {mode:?}");

        self.apply_mode_entry(mode).await;

        if let Err(err) = self.settings.set_operating_mode(mode).await {
            error!("Failed to persist operating mode: {err:?}");
        }
        let stats = self
            .settings
            .update_stats(|stats| stats.mode_switches += 1)
            .await;
        self.persist_stats().await;
        self.emit(MasterEvent::StatsUpdated(stats));

        // Entry effects may have changed the generation interval.
        if active {
            self.spawn_ticker().await;
        }

        self.emit_status().await;
    }

    async fn apply_mode_entry(&self, mode: OperatingMode) {
        let update = match mode {
            OperatingMode::Discovery => SettingsUpdate {
                generation_interval_secs: Some(DISCOVERY_INTERVAL_SECS),
                autoplay: Some(true),
                ..SettingsUpdate::default()
            },
            OperatingMode::Passive => SettingsUpdate {
                generation_interval_secs: Some(PASSIVE_INTERVAL_SECS),
                autoplay: Some(false),
                ..SettingsUpdate::default()
            },
            OperatingMode::Focused => {
                if let Err(err) = self.playback.set_audio_quality(AudioQuality::High).await {
                    warn!("Playback rejected audio quality change: {err:?}");
                }
                SettingsUpdate {
                    audio_quality: Some(AudioQuality::High),
                    autoplay: Some(true),
                    ..SettingsUpdate::default()
                }
            }
            OperatingMode::Paused => {
                if let Err(err) = self.playback.stop().await {
                    warn!("Playback failed to stop: {err:?}");
                }
                self.pipeline.clear_queue().await;
                let mut state = self.state.lock().await;
                state.current_content = None;
                return;
            }
        };

        if let Err(err) = self.settings.update_settings(update).await {
            error!("Failed to persist settings for {mode:?}: {err:?}");
        }
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> UserProfile {
        match self.settings.update_profile(update).await {
            Ok(profile) => profile,
            Err(err) => {
                error!("Failed to persist profile: {err:?}");
                self.emit(MasterEvent::Error(format!("profile not saved: {err}")));
                self.settings.profile().await
            }
        }
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Settings {
        let before = self.settings.settings().await;
        let after = match self.settings.update_settings(update).await {
            Ok(settings) => settings,
            Err(err) => {
                error!("Failed to persist settings: {err:?}");
                self.emit(MasterEvent::Error(format!("settings not saved: {err}")));
                self.settings.settings().await
            }
        };

        if after.max_queue_size != before.max_queue_size {
            self.pipeline.set_max_queue_size(after.max_queue_size).await;
        }
        if after.generation_interval_secs != before.generation_interval_secs
            && self.state.lock().await.active
        {
            self.spawn_ticker().await;
        }
        if after.audio_quality != before.audio_quality {
            if let Err(err) = self.playback.set_audio_quality(after.audio_quality).await {
                warn!("Playback rejected audio quality change: {err:?}");
            }
        }

        self.emit_status().await;
        after
    }

    /// Generate right away, bypassing the gate. Falls back to the best queued
    /// item when generation fails or another attempt is in flight.
    pub async fn generate_now(&self) -> Option<GeneratedContent> {
        let Some(request) = self.current_request(true).await else {
            warn!("No location fix yet; nothing to generate for");
            return None;
        };
        if self.mode().await == OperatingMode::Paused {
            debug!("Ignoring generate request while paused");
            return None;
        }
        self.run_generation(request).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.playback.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.playback.resume().await
    }

    pub async fn skip(&self) -> Result<()> {
        let skipped = self.state.lock().await.current_content.take();
        if let Some(content) = skipped {
            self.pipeline.mark_played(&content.id).await;
        }
        self.playback.skip().await?;
        self.emit_status().await;
        Ok(())
    }

    /// Drop everything queued, here and in the player, and stop playback.
    pub async fn clear_content(&self) -> Result<()> {
        for content in self.pipeline.queued().await {
            if let Err(err) = self.playback.dequeue(&content.id).await {
                warn!("Playback failed to dequeue {}: {err:?}", content.id);
            }
        }
        self.pipeline.clear_queue().await;
        self.state.lock().await.current_content = None;
        let stopped = self.playback.stop().await;
        self.emit_status().await;
        stopped
    }

    /// Per-fix coordination: distance stats, then the generation gate.
    pub async fn handle_location_update(&self, reading: LocationReading, analysis: MovementAnalysis) {
        let (distance, active, mode) = {
            let mut state = self.state.lock().await;
            let distance = state
                .last_reading
                .as_ref()
                .filter(|prev| prev.position.is_valid() && reading.position.is_valid())
                .map(|prev| prev.position.distance_to(&reading.position))
                .filter(|d| d.is_finite())
                .unwrap_or(0.0);
            if reading.position.is_valid() {
                state.last_reading = Some(reading);
            }
            state.last_analysis = Some(analysis);
            (distance, state.active, state.mode)
        };

        if distance > 0.0 {
            self.settings
                .update_stats(|stats| stats.total_distance_m += distance)
                .await;
        }

        if active && mode != OperatingMode::Paused {
            if let Some(request) = self.current_request(false).await {
                if self.pipeline.should_generate(&request, Utc::now()).await {
                    self.spawn_generation(request);
                }
            }
        }

        self.emit_status().await;
    }

    /// Eager generation on calmer modes; busier modes wait for the interval.
    pub async fn handle_movement_change(
        &self,
        from: MovementMode,
        to: MovementMode,
        analysis: MovementAnalysis,
    ) {
        info!("Movement {} -> {}", from.as_str(), to.as_str());
        let (active, mode) = {
            let mut state = self.state.lock().await;
            state.last_analysis = Some(analysis.clone());
            (state.active, state.mode)
        };

        if active && mode != OperatingMode::Paused {
            let min_dwell = self.settings.settings().await.min_stationary_minutes;
            let eager = match to {
                MovementMode::Stationary => analysis.stationary_duration_minutes >= min_dwell,
                MovementMode::Walking => true,
                MovementMode::Cycling | MovementMode::Driving => false,
            };
            if eager {
                if let Some(request) = self.current_request(true).await {
                    self.spawn_generation(request);
                }
            } else {
                debug!("Deferring {} content to the interval gate", to.as_str());
            }
        }

        self.emit_status().await;
    }

    pub async fn handle_playback_event(&self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::StateChanged(playback) => {
                let mut state = self.state.lock().await;
                state.playback = Some(playback);
                state.refresh_interaction();
            }
            PlaybackEvent::Started { content_id } => {
                self.pipeline.mark_playing(&content_id).await;
                let current = self.pipeline.get(&content_id).await;
                if current.is_none() {
                    debug!("Playback started unknown content {content_id}");
                }
                self.state.lock().await.current_content = current;
            }
            PlaybackEvent::Completed { content_id } => {
                self.pipeline.mark_played(&content_id).await;
                let (active, mode, movement) = {
                    let mut state = self.state.lock().await;
                    if state
                        .current_content
                        .as_ref()
                        .is_some_and(|c| c.id == content_id)
                    {
                        state.current_content = None;
                    }
                    let movement = state
                        .last_analysis
                        .as_ref()
                        .map(|a| a.movement_mode)
                        .unwrap_or(MovementMode::Stationary);
                    (state.active, state.mode, movement)
                };

                let stats = self
                    .settings
                    .update_stats(|stats| stats.content_consumed += 1)
                    .await;
                self.persist_stats().await;
                self.emit(MasterEvent::StatsUpdated(stats));

                let min_queued = self.pipeline.config().min_queued_for_mode;
                if active
                    && mode != OperatingMode::Paused
                    && self.pipeline.count_for_mode(movement).await < min_queued
                {
                    // Interval-gated; some players report completion instantly.
                    if let Some(request) = self.current_request(false).await {
                        if self.pipeline.should_generate(&request, Utc::now()).await {
                            debug!("Queue low for {} mode; refilling", movement.as_str());
                            self.spawn_generation(request);
                        }
                    }
                }
            }
        }
        self.emit_status().await;
    }

    fn spawn_generation(&self, request: ContentRequest) {
        if self.pipeline.is_generating() {
            debug!("Generation already in flight; skipping trigger");
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            service.run_generation(request).await;
        });
    }

    /// One generation attempt plus its side effects. An attempt that finishes
    /// after a switch to Paused is discarded along with the queue.
    async fn run_generation(&self, request: ContentRequest) -> Option<GeneratedContent> {
        self.set_generating(true).await;
        let outcome = self.pipeline.generate(&request).await;
        let generating = self.pipeline.is_generating();
        self.set_generating(generating).await;

        if self.mode().await == OperatingMode::Paused {
            info!("Paused while generating; dropping queued content");
            self.pipeline.clear_queue().await;
            self.emit_status().await;
            return None;
        }

        let served = match outcome {
            GenerationOutcome::Generated(content) => {
                let stats = self
                    .settings
                    .update_stats(|stats| stats.content_generated += 1)
                    .await;
                self.persist_stats().await;
                self.emit(MasterEvent::StatsUpdated(stats));

                let autoplay = self.settings.settings().await.autoplay;
                if let Err(err) = self.playback.enqueue(&content, autoplay).await {
                    error!("Playback rejected \"{}\": {err:?}", content.title);
                    self.emit(MasterEvent::Error(format!("playback enqueue failed: {err}")));
                }
                self.emit(MasterEvent::ContentReady(content.clone()));
                Some(content)
            }
            GenerationOutcome::Queued(content) => content,
            GenerationOutcome::Failed => {
                self.emit(MasterEvent::Error("content generation failed".into()));
                self.pipeline.select_next(request.mode()).await
            }
        };

        self.emit_status().await;
        served
    }

    async fn set_generating(&self, generating: bool) {
        {
            let mut state = self.state.lock().await;
            state.generating = generating;
            state.refresh_interaction();
        }
        self.emit_status().await;
    }

    /// Request for the latest fix, or `None` before the first valid fix.
    async fn current_request(&self, force: bool) -> Option<ContentRequest> {
        let (position, analysis, current) = {
            let state = self.state.lock().await;
            let position: GeoPoint = state.last_reading.as_ref()?.position;
            (
                position,
                state.last_analysis.clone().unwrap_or_default(),
                state.current_content.clone(),
            )
        };
        let interests = self.settings.profile().await.interests;

        let request = ContentRequest::new(analysis, position)
            .with_interests(interests)
            .with_current_content(current);
        Some(if force { request.forced() } else { request })
    }

    async fn spawn_dispatcher(&self, mut rx: mpsc::UnboundedReceiver<TrackingEvent>) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TrackingEvent::Update { reading, analysis } => {
                        service.handle_location_update(reading, analysis).await;
                    }
                    TrackingEvent::ModeChanged { from, to, analysis } => {
                        service.handle_movement_change(from, to, analysis).await;
                    }
                    TrackingEvent::SourceEnded => {
                        warn!("Location source ended; no further fixes");
                    }
                }
            }
        });

        let mut guard = self.dispatcher.lock().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Periodic gate check at the configured generation interval.
    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let period = Duration::from_secs(self.settings.settings().await.generation_interval_secs);
        let service = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                let (active, mode) = {
                    let state = service.state.lock().await;
                    (state.active, state.mode)
                };
                if !active {
                    break;
                }
                if mode == OperatingMode::Paused {
                    continue;
                }

                let Some(request) = service.current_request(false).await else {
                    continue;
                };
                // Detached, so restarting the ticker never cancels a generation.
                if service.pipeline.should_generate(&request, Utc::now()).await {
                    service.spawn_generation(request);
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn persist_stats(&self) {
        if let Err(err) = self.settings.save_stats().await {
            error!("Failed to persist usage stats: {err:?}");
        }
    }

    fn emit(&self, event: MasterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn emit_status(&self) {
        let snapshot = self.get_status().await;
        self.emit(MasterEvent::Status(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChannelLocationSource, LoggingPlayback, MemoryStore};
    use crate::content::{ContentStrategy, WeightedInterest};
    use crate::master::InteractionState;
    use crate::test_support::{FailingGenerator, GatedGenerator, RecordingPlayback, StaticGenerator};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::Ordering;

    struct Harness {
        master: MasterService,
        playback: Arc<RecordingPlayback>,
        store: Arc<dyn ConfigStore>,
        fixes: mpsc::Sender<LocationReading>,
    }

    async fn harness_from(
        generator: Arc<dyn StoryGenerator>,
        store: Arc<dyn ConfigStore>,
        strategies: StrategyTable,
    ) -> Harness {
        let (source, fixes) = ChannelLocationSource::new(32);
        let playback = Arc::new(RecordingPlayback::default());
        let master = MasterService::new(MasterDeps {
            strategies,
            ..MasterDeps::new(Arc::new(source), generator, playback.clone(), store.clone())
        })
        .await;
        Harness {
            master,
            playback,
            store,
            fixes,
        }
    }

    async fn harness_with(generator: Arc<dyn StoryGenerator>, store: Arc<dyn ConfigStore>) -> Harness {
        harness_from(generator, store, StrategyTable::default()).await
    }

    async fn harness(generator: Arc<dyn StoryGenerator>) -> Harness {
        harness_with(generator, Arc::new(MemoryStore::new())).await
    }

    fn fix(seconds: i64, lat: f64) -> LocationReading {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + ChronoDuration::seconds(seconds);
        LocationReading::new(GeoPoint::new(lat, 2.35), t).with_accuracy(5.0)
    }

    fn walking() -> MovementAnalysis {
        MovementAnalysis {
            movement_mode: MovementMode::Walking,
            average_speed_kmh: 5.0,
            confidence: 0.8,
            ..MovementAnalysis::default()
        }
    }

    fn stationary_for(minutes: f64) -> MovementAnalysis {
        MovementAnalysis {
            movement_mode: MovementMode::Stationary,
            stationary_duration_minutes: minutes,
            confidence: 0.9,
            ..MovementAnalysis::default()
        }
    }

    /// Default strategies with no minimum spacing between generations.
    fn unthrottled_strategies() -> StrategyTable {
        let defaults = StrategyTable::default();
        StrategyTable::new(MovementMode::ALL.map(|mode| ContentStrategy {
            refresh_interval: Duration::ZERO,
            ..defaults.for_mode(mode).clone()
        }))
        .unwrap()
    }

    async fn next_content_ready(rx: &mut broadcast::Receiver<MasterEvent>) -> GeneratedContent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(MasterEvent::ContentReady(content)) => return content,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("no content produced in time")
    }

    #[tokio::test]
    async fn starts_paused_and_idle() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        let status = h.master.get_status().await;
        assert_eq!(status.mode, OperatingMode::Paused);
        assert_eq!(status.interaction_state, InteractionState::Idle);
        assert!(!status.active);
        assert_eq!(status.queue_size, 0);
    }

    #[tokio::test]
    async fn setting_current_mode_is_a_noop() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        let mut rx = h.master.subscribe();
        h.master.set_mode(OperatingMode::Paused).await;

        assert_eq!(h.master.stats().await.mode_switches, 0);
        assert_eq!(h.playback.stops.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mode_entry_effects_apply_and_persist() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;

        h.master.set_mode(OperatingMode::Discovery).await;
        let s = h.master.settings().await;
        assert_eq!(s.generation_interval_secs, 45);
        assert!(s.autoplay);

        h.master.set_mode(OperatingMode::Passive).await;
        let s = h.master.settings().await;
        assert_eq!(s.generation_interval_secs, 120);
        assert!(!s.autoplay);

        h.master.set_mode(OperatingMode::Focused).await;
        assert_eq!(h.master.settings().await.audio_quality, AudioQuality::High);
        assert_eq!(*h.playback.quality.lock().unwrap(), Some(AudioQuality::High));
        assert_eq!(h.master.stats().await.mode_switches, 3);

        let reloaded = SettingsStore::load(h.store.clone()).await;
        assert_eq!(reloaded.operating_mode().await, OperatingMode::Focused);
    }

    #[tokio::test]
    async fn pausing_stops_playback_and_clears_queue() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        assert!(h.master.generate_now().await.is_some());
        assert_eq!(h.master.pipeline().queue_len().await, 1);

        h.master.set_mode(OperatingMode::Paused).await;
        assert_eq!(h.master.pipeline().queue_len().await, 0);
        assert_eq!(h.playback.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pausing_mid_generation_discards_the_result() {
        let generator = Arc::new(GatedGenerator::new());
        let h = harness(generator.clone()).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;

        generator.hold();
        let pending = {
            let master = h.master.clone();
            tokio::spawn(async move { master.generate_now().await })
        };
        generator.wait_until_entered().await;
        assert_eq!(h.master.get_status().await.interaction_state, InteractionState::Generating);

        h.master.set_mode(OperatingMode::Paused).await;
        generator.release();

        let served = pending.await.unwrap();
        assert!(served.is_none());
        assert_eq!(h.master.pipeline().queue_len().await, 0);
        assert_eq!(h.playback.enqueued_count(), 0);
        assert_eq!(h.master.stats().await.content_generated, 0);
    }

    #[tokio::test]
    async fn generate_now_without_a_fix_is_none() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        assert!(h.master.generate_now().await.is_none());
    }

    #[tokio::test]
    async fn failed_generation_serves_the_queue() {
        let h = harness(Arc::new(FailingGenerator)).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;

        let mut rx = h.master.subscribe();
        assert!(h.master.generate_now().await.is_none());
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event, MasterEvent::Error(_));
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn tracked_fixes_produce_content_for_playback() {
        let h = harness(Arc::new(StaticGenerator::new(60))).await;
        h.master
            .update_profile(ProfileUpdate {
                interests: Some(vec![WeightedInterest::new("bridges", 0.9)]),
                ..ProfileUpdate::default()
            })
            .await;
        let mut rx = h.master.subscribe();
        h.master.start().await.unwrap();
        assert_eq!(h.master.mode().await, OperatingMode::Discovery);

        h.fixes.send(fix(0, 48.8500)).await.unwrap();
        h.fixes.send(fix(10, 48.8501)).await.unwrap();

        let content = next_content_ready(&mut rx).await;
        assert_eq!(content.interests, vec!["bridges".to_string()]);
        assert!(h.playback.enqueued_count() >= 1);
        assert!(h.playback.enqueued.lock().unwrap()[0].1, "discovery autoplays");

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.master.stats().await.total_distance_m <= 10.0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second fix never processed");

        h.master.stop().await.unwrap();
        let stats = h.master.stats().await;
        assert_eq!(stats.sessions_started, 1);
        assert!(stats.total_distance_m > 10.0);
        assert!(stats.content_generated >= 1);
        assert!(!h.master.get_status().await.active);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.start().await.unwrap();
        assert!(h.master.start().await.is_err());
        h.master.stop().await.unwrap();
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn completion_counts_and_refills() {
        let generator = Arc::new(StaticGenerator::new(20));
        let h = harness_from(
            generator.clone(),
            Arc::new(MemoryStore::new()),
            unthrottled_strategies(),
        )
        .await;
        let mut rx = h.master.subscribe();
        h.master.start().await.unwrap();
        // Empty queue opens the gate on the first fix.
        h.master.handle_location_update(fix(0, 48.85), walking()).await;

        let content = next_content_ready(&mut rx).await;
        let calls_before = generator.calls();

        h.master
            .handle_playback_event(PlaybackEvent::Started {
                content_id: content.id.clone(),
            })
            .await;
        assert_eq!(
            h.master.get_status().await.current_content.map(|c| c.id),
            Some(content.id.clone())
        );

        h.master
            .handle_playback_event(PlaybackEvent::Completed {
                content_id: content.id.clone(),
            })
            .await;
        assert_eq!(h.master.stats().await.content_consumed, 1);
        assert!(h.master.get_status().await.current_content.is_none());

        let refill = next_content_ready(&mut rx).await;
        assert_ne!(refill.id, content.id);
        assert!(generator.calls() > calls_before);
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn playback_state_drives_interaction() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master
            .handle_playback_event(PlaybackEvent::StateChanged(crate::collaborators::PlaybackState::Playing))
            .await;
        assert_eq!(h.master.get_status().await.interaction_state, InteractionState::Playing);
    }

    #[tokio::test]
    async fn corrupt_config_does_not_block_startup() {
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
        store.save("settings", "{{{{").await.unwrap();
        store.save("content_history", "nope").await.unwrap();
        let h = harness_with(Arc::new(StaticGenerator::new(20)), store).await;

        assert_eq!(h.master.settings().await, Settings::default());
        assert_eq!(h.master.pipeline().history_len().await, 0);
    }

    #[tokio::test]
    async fn shrinking_max_queue_size_trims_pipeline() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        for _ in 0..4 {
            h.master.generate_now().await;
        }
        assert_eq!(h.master.pipeline().queue_len().await, 4);

        let settings = h
            .master
            .update_settings(SettingsUpdate {
                max_queue_size: Some(2),
                ..SettingsUpdate::default()
            })
            .await;
        assert_eq!(settings.max_queue_size, 2);
        assert_eq!(h.master.pipeline().queue_len().await, 2);
    }

    #[tokio::test]
    async fn skip_consumes_current_content() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        let content = h.master.generate_now().await.unwrap();
        h.master
            .handle_playback_event(PlaybackEvent::Started {
                content_id: content.id.clone(),
            })
            .await;

        h.master.skip().await.unwrap();
        assert_eq!(h.playback.skips.load(Ordering::SeqCst), 1);
        assert_eq!(h.master.pipeline().queue_len().await, 0);
        assert!(h.master.get_status().await.current_content.is_none());
    }

    #[tokio::test]
    async fn completion_refill_waits_for_the_interval() {
        let generator = Arc::new(StaticGenerator::new(20));
        let (source, _fixes) = ChannelLocationSource::new(32);
        let (playback, mut playback_events) = LoggingPlayback::new();
        let master = MasterService::new(MasterDeps::new(
            Arc::new(source),
            generator.clone(),
            Arc::new(playback),
            Arc::new(MemoryStore::new()),
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

        master.start().await.unwrap();
        master.handle_location_update(fix(0, 48.85), walking()).await;

        // The logging player finishes each item as soon as it is enqueued.
        tokio::time::timeout(Duration::from_secs(5), async {
            while master.stats().await.content_consumed == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("content never completed");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = master.stats().await;
        assert_eq!(stats.content_generated, 1);
        assert_eq!(stats.content_consumed, 1);
        assert_eq!(generator.calls(), 1);

        master.stop().await.unwrap();
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_generation_survives_a_mode_switch() {
        let generator = Arc::new(GatedGenerator::new());
        let h = harness(generator.clone()).await;
        // Recorded while inactive, so only the ticker generates.
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        let mut rx = h.master.subscribe();

        generator.hold();
        h.master.start().await.unwrap();
        generator.wait_until_entered().await;
        assert_eq!(h.master.get_status().await.interaction_state, InteractionState::Generating);

        // Restarts the ticker at the Passive interval.
        h.master.set_mode(OperatingMode::Passive).await;
        generator.release();

        let content = next_content_ready(&mut rx).await;
        assert_eq!(h.master.pipeline().queue_len().await, 1);
        {
            let enqueued = h.playback.enqueued.lock().unwrap();
            assert_eq!(enqueued.len(), 1);
            assert_eq!(enqueued[0].0.id, content.id);
            assert!(!enqueued[0].1, "passive does not autoplay");
        }
        let status = h.master.get_status().await;
        assert_eq!(status.mode, OperatingMode::Passive);
        assert_eq!(status.interaction_state, InteractionState::Listening);
        assert_eq!(h.master.stats().await.content_generated, 1);
        assert_eq!(generator.calls(), 1);

        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn starting_to_walk_generates_at_once() {
        let generator = Arc::new(StaticGenerator::new(20));
        let h = harness(generator.clone()).await;
        h.master.handle_location_update(fix(0, 48.85), stationary_for(0.5)).await;
        let mut rx = h.master.subscribe();
        h.master.start().await.unwrap();

        h.master
            .handle_movement_change(MovementMode::Stationary, MovementMode::Walking, walking())
            .await;

        let content = next_content_ready(&mut rx).await;
        assert_eq!(content.movement_mode, MovementMode::Walking);
        assert_eq!(generator.calls(), 1);
        assert_eq!(h.playback.enqueued_count(), 1);
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn settling_down_generates_once_dwell_is_reached() {
        let generator = Arc::new(StaticGenerator::new(20));
        let h = harness(generator.clone()).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        let mut rx = h.master.subscribe();
        h.master.start().await.unwrap();

        h.master
            .handle_movement_change(MovementMode::Walking, MovementMode::Stationary, stationary_for(3.0))
            .await;

        let content = next_content_ready(&mut rx).await;
        assert_eq!(content.movement_mode, MovementMode::Stationary);
        assert_eq!(generator.calls(), 1);
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn brief_stop_defers_to_the_interval() {
        let generator = Arc::new(StaticGenerator::new(20));
        let h = harness(generator.clone()).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        h.master.start().await.unwrap();

        h.master
            .handle_movement_change(MovementMode::Walking, MovementMode::Stationary, stationary_for(1.0))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(generator.calls(), 0);
        assert_eq!(h.playback.enqueued_count(), 0);
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn faster_modes_defer_to_the_interval() {
        let generator = Arc::new(StaticGenerator::new(20));
        let h = harness(generator.clone()).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        h.master.start().await.unwrap();

        for to in [MovementMode::Cycling, MovementMode::Driving] {
            let analysis = MovementAnalysis {
                movement_mode: to,
                average_speed_kmh: if to == MovementMode::Cycling { 18.0 } else { 50.0 },
                confidence: 0.8,
                ..MovementAnalysis::default()
            };
            h.master
                .handle_movement_change(MovementMode::Walking, to, analysis)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(generator.calls(), 0);
        assert_eq!(h.playback.enqueued_count(), 0);
        h.master.stop().await.unwrap();
    }

    #[tokio::test]
    async fn clearing_content_empties_the_player_queue() {
        let h = harness(Arc::new(StaticGenerator::new(20))).await;
        h.master.set_mode(OperatingMode::Discovery).await;
        h.master.handle_location_update(fix(0, 48.85), walking()).await;
        h.master.generate_now().await.unwrap();
        h.master.generate_now().await.unwrap();
        assert_eq!(h.playback.enqueued_count(), 2);

        h.master.clear_content().await.unwrap();
        assert_eq!(h.playback.enqueued_count(), 0);
        assert_eq!(h.playback.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.master.pipeline().queue_len().await, 0);
        assert!(h.master.get_status().await.current_content.is_none());
    }
}

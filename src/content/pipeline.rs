use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{sync::Mutex, time};
use uuid::Uuid;

use super::config::PipelineConfig;
use super::prompt::build_prompt;
use super::queue::ContentQueue;
use super::scoring::{compute_priority, estimate_duration_secs, PriorityInputs};
use super::strategy::{ContentStrategy, StrategyTable};
use super::types::{ContentRequest, GeneratedContent};
use crate::collaborators::store::{load_json, save_json};
use crate::collaborators::{ConfigStore, StoryGenerator};
use crate::movement::MovementMode;

pub const HISTORY_KEY: &str = "content_history";

/// Result of one call to [`ContentPipeline::generate`].
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// New content, already queued and recorded in history.
    Generated(GeneratedContent),
    /// Another generation was in flight; this is the best queued item instead.
    Queued(Option<GeneratedContent>),
    /// The generator failed or timed out.
    Failed,
}

impl GenerationOutcome {
    pub fn content(&self) -> Option<&GeneratedContent> {
        match self {
            GenerationOutcome::Generated(content) => Some(content),
            GenerationOutcome::Queued(content) => content.as_ref(),
            GenerationOutcome::Failed => None,
        }
    }

    pub fn into_content(self) -> Option<GeneratedContent> {
        match self {
            GenerationOutcome::Generated(content) => Some(content),
            GenerationOutcome::Queued(content) => content,
            GenerationOutcome::Failed => None,
        }
    }
}

struct PipelineState {
    queue: ContentQueue,
    last_generation: Option<DateTime<Utc>>,
}

struct PipelineInner {
    config: PipelineConfig,
    strategies: StrategyTable,
    generator: Arc<dyn StoryGenerator>,
    store: Arc<dyn ConfigStore>,
    state: Mutex<PipelineState>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the generation attempt ends, however it ends.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Decides when new content is warranted, produces it through the story
/// generator, and keeps the scored queue and history.
///
/// At most one generation runs at a time; overlapping callers are served the
/// best queued item rather than waiting.
#[derive(Clone)]
pub struct ContentPipeline {
    inner: Arc<PipelineInner>,
}

impl ContentPipeline {
    pub fn new(
        config: PipelineConfig,
        strategies: StrategyTable,
        generator: Arc<dyn StoryGenerator>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let queue = ContentQueue::new(
            config.max_queue_size,
            config.max_history_size,
            config.priority_tie_epsilon,
        );
        Self {
            inner: Arc::new(PipelineInner {
                config,
                strategies,
                generator,
                store,
                state: Mutex::new(PipelineState {
                    queue,
                    last_generation: None,
                }),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn strategy_for(&self, mode: MovementMode) -> &ContentStrategy {
        self.inner.strategies.for_mode(mode)
    }

    pub fn is_generating(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Whether a generation attempt is warranted for `request` at `now`.
    pub async fn should_generate(&self, request: &ContentRequest, now: DateTime<Utc>) -> bool {
        if request.force_refresh {
            return true;
        }

        let config = &self.inner.config;
        let mode = request.mode();
        let strategy = self.strategy_for(mode);
        let state = self.inner.state.lock().await;

        if let Some(last) = state.last_generation {
            // A clock that went backwards counts as "just generated".
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < strategy.refresh_interval {
                return false;
            }
        }

        if let Some(current) = &request.current_content {
            if current.movement_mode != mode {
                debug!(
                    "Mode changed since current content ({} -> {})",
                    current.movement_mode.as_str(),
                    mode.as_str()
                );
                return true;
            }
        }

        if mode == MovementMode::Stationary
            && request.analysis.stationary_duration_minutes > config.linger_regenerate_minutes
        {
            return true;
        }

        state.queue.count_for_mode(mode) < config.min_queued_for_mode
    }

    /// Produce one piece of content for `request`.
    pub async fn generate(&self, request: &ContentRequest) -> GenerationOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            debug!("Generation already in flight; serving from queue");
            return GenerationOutcome::Queued(self.select_next(request.mode()).await);
        };

        let config = &self.inner.config;
        let mode = request.mode();
        let strategy = self.strategy_for(mode);
        let prompt = build_prompt(request, strategy);

        let story = match time::timeout(
            config.generation_timeout,
            self.inner.generator.generate_story(&prompt),
        )
        .await
        {
            Ok(Ok(story)) => story,
            Ok(Err(err)) => {
                error!("Story generation failed for {} mode: {err:?}", mode.as_str());
                return GenerationOutcome::Failed;
            }
            Err(_) => {
                warn!(
                    "Story generation timed out after {}s",
                    config.generation_timeout.as_secs_f64()
                );
                return GenerationOutcome::Failed;
            }
        };

        if story.title.trim().is_empty() || story.body.trim().is_empty() {
            warn!("Story generator returned empty content; discarding");
            return GenerationOutcome::Failed;
        }

        let created_at = Utc::now();
        let content = {
            let mut state = self.inner.state.lock().await;

            let priority = compute_priority(
                &PriorityInputs {
                    base_priority: strategy.base_priority,
                    analysis: &request.analysis,
                    interests: &request.interests,
                    origin: &request.position,
                    created_at,
                },
                state.queue.history_slice(),
                config,
            );

            let content = GeneratedContent {
                id: Uuid::new_v4().to_string(),
                estimated_duration_secs: estimate_duration_secs(&story.body, config.words_per_minute),
                title: story.title,
                body: story.body,
                movement_mode: mode,
                origin: request.position,
                interests: prompt.interests.iter().map(|i| i.name.clone()).collect(),
                created_at,
                priority,
                playing: false,
            };

            state.queue.push(content.clone());
            state.last_generation = Some(created_at);
            content
        };

        info!(
            "Generated \"{}\" for {} mode (priority {:.2}, {}s)",
            content.title,
            mode.as_str(),
            content.priority,
            content.estimated_duration_secs
        );

        self.persist_history().await;

        GenerationOutcome::Generated(content)
    }

    /// Best queued content for `mode`, if any.
    pub async fn select_next(&self, mode: MovementMode) -> Option<GeneratedContent> {
        self.inner.state.lock().await.queue.select_next(mode).cloned()
    }

    pub async fn get(&self, id: &str) -> Option<GeneratedContent> {
        self.inner.state.lock().await.queue.get(id).cloned()
    }

    pub async fn queued(&self) -> Vec<GeneratedContent> {
        self.inner.state.lock().await.queue.items().cloned().collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.state.lock().await.queue.history_len()
    }

    pub async fn count_for_mode(&self, mode: MovementMode) -> usize {
        self.inner.state.lock().await.queue.count_for_mode(mode)
    }

    pub async fn last_generation_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.last_generation
    }

    pub async fn mark_playing(&self, id: &str) {
        self.inner.state.lock().await.queue.mark_playing(id);
    }

    /// Remove consumed content from the queue. History keeps it.
    pub async fn mark_played(&self, id: &str) -> Option<GeneratedContent> {
        let removed = self.inner.state.lock().await.queue.mark_played(id);
        if removed.is_none() {
            debug!("Played content {id} was not queued");
        }
        removed
    }

    pub async fn clear_queue(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.queue.is_empty() {
            info!("Clearing {} queued items", state.queue.len());
        }
        state.queue.clear();
    }

    pub async fn set_max_queue_size(&self, max_items: usize) {
        self.inner.state.lock().await.queue.set_max_items(max_items);
    }

    /// Restore history saved by a previous run. Missing or corrupt blobs
    /// leave history empty.
    pub async fn load_history(&self) {
        let restored: Vec<GeneratedContent> =
            load_json(self.inner.store.as_ref(), HISTORY_KEY).await.unwrap_or_default();
        let count = restored.len();
        self.inner.state.lock().await.queue.restore_history(restored);
        if count > 0 {
            info!("Restored {count} history items");
        }
    }

    async fn persist_history(&self) {
        let recent = {
            let state = self.inner.state.lock().await;
            state.queue.recent_history(self.inner.config.persisted_history)
        };
        if let Err(err) = save_json(self.inner.store.as_ref(), HISTORY_KEY, &recent).await {
            error!("Failed to persist content history: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryStore;
    use crate::movement::MovementAnalysis;
    use crate::test_support::{FailingGenerator, GatedGenerator, SlowGenerator, StaticGenerator};
    use crate::utils::geo::GeoPoint;
    use chrono::Duration;

    fn pipeline_with(generator: Arc<dyn StoryGenerator>, store: Arc<dyn ConfigStore>) -> ContentPipeline {
        ContentPipeline::new(
            PipelineConfig::default(),
            StrategyTable::default(),
            generator,
            store,
        )
    }

    fn pipeline(generator: Arc<dyn StoryGenerator>) -> ContentPipeline {
        pipeline_with(generator, Arc::new(MemoryStore::new()))
    }

    fn request(mode: MovementMode) -> ContentRequest {
        let analysis = MovementAnalysis {
            movement_mode: mode,
            ..MovementAnalysis::default()
        };
        ContentRequest::new(analysis, GeoPoint::new(51.05, 3.72))
    }

    #[tokio::test]
    async fn force_refresh_always_generates() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        p.generate(&request(MovementMode::Walking)).await;
        p.generate(&request(MovementMode::Walking)).await;

        let forced = request(MovementMode::Walking).forced();
        assert!(p.should_generate(&forced, Utc::now()).await);
    }

    #[tokio::test]
    async fn first_request_with_empty_queue_generates() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        assert!(p.should_generate(&request(MovementMode::Cycling), Utc::now()).await);
    }

    #[tokio::test]
    async fn refresh_interval_gates_generation() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        let req = request(MovementMode::Walking);
        assert!(p.generate(&req).await.content().is_some());
        let last = p.last_generation_time().await.unwrap();

        assert!(!p.should_generate(&req, last + Duration::seconds(60)).await);
        // Interval passed and only one walking item queued.
        assert!(p.should_generate(&req, last + Duration::seconds(121)).await);

        p.generate(&req).await;
        let last = p.last_generation_time().await.unwrap();
        assert!(!p.should_generate(&req, last + Duration::seconds(121)).await);
    }

    #[tokio::test]
    async fn mode_change_since_current_content_triggers() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        let walking = request(MovementMode::Walking);
        p.generate(&walking).await;
        let current = p.generate(&walking).await.into_content();
        let last = p.last_generation_time().await.unwrap();

        let driving = request(MovementMode::Driving).with_current_content(current);
        assert!(p.should_generate(&driving, last + Duration::seconds(46)).await);
    }

    #[tokio::test]
    async fn long_stationary_dwell_triggers() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        let mut req = request(MovementMode::Stationary);
        p.generate(&req).await;
        p.generate(&req).await;
        let later = p.last_generation_time().await.unwrap() + Duration::seconds(301);

        req.analysis.stationary_duration_minutes = 1.0;
        assert!(!p.should_generate(&req, later).await);

        req.analysis.stationary_duration_minutes = 6.0;
        assert!(p.should_generate(&req, later).await);
    }

    #[tokio::test]
    async fn generated_content_is_scored_and_timed() {
        let p = pipeline(Arc::new(StaticGenerator::new(300)));
        let req = request(MovementMode::Walking);
        let content = p.generate(&req).await.into_content().unwrap();

        assert_eq!(content.estimated_duration_secs, 120);
        assert_eq!(content.movement_mode, MovementMode::Walking);
        assert!((content.priority - 0.8).abs() < 1e-9);
        assert_eq!(p.queue_len().await, 1);
        assert_eq!(p.history_len().await, 1);
    }

    #[tokio::test]
    async fn nearby_repeat_gets_lower_priority() {
        let p = pipeline(Arc::new(StaticGenerator::new(40)));
        let req = request(MovementMode::Walking);
        let first = p.generate(&req).await.into_content().unwrap();
        let second = p.generate(&req).await.into_content().unwrap();

        assert!(second.priority < first.priority);
        assert!((second.priority - first.priority * 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn generator_failure_leaves_state_untouched() {
        let p = pipeline(Arc::new(FailingGenerator));
        let outcome = p.generate(&request(MovementMode::Walking)).await;

        assert_eq!(outcome, GenerationOutcome::Failed);
        assert_eq!(p.queue_len().await, 0);
        assert!(p.last_generation_time().await.is_none());
        assert!(!p.is_generating());
    }

    #[tokio::test]
    async fn generator_timeout_is_a_failure() {
        let config = PipelineConfig {
            generation_timeout: std::time::Duration::from_millis(20),
            ..PipelineConfig::default()
        };
        let p = ContentPipeline::new(
            config,
            StrategyTable::default(),
            Arc::new(SlowGenerator(std::time::Duration::from_secs(5))),
            Arc::new(MemoryStore::new()),
        );

        let outcome = p.generate(&request(MovementMode::Cycling)).await;
        assert_eq!(outcome, GenerationOutcome::Failed);
        assert!(!p.is_generating());
    }

    #[tokio::test]
    async fn overlapping_generate_serves_queue() {
        let generator = Arc::new(GatedGenerator::new());
        let p = pipeline(generator.clone());

        let seeded = p.generate(&request(MovementMode::Walking)).await.into_content().unwrap();

        generator.hold();
        let background = {
            let p = p.clone();
            tokio::spawn(async move { p.generate(&request(MovementMode::Walking)).await })
        };
        generator.wait_until_entered().await;
        assert!(p.is_generating());

        let overlapping = p.generate(&request(MovementMode::Walking)).await;
        assert_eq!(overlapping, GenerationOutcome::Queued(Some(seeded)));

        generator.release();
        let finished = background.await.unwrap();
        assert!(matches!(finished, GenerationOutcome::Generated(_)));
        assert!(!p.is_generating());
        assert_eq!(p.queue_len().await, 2);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn history_is_persisted_truncated_and_restored() {
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
        let p = pipeline_with(Arc::new(StaticGenerator::new(10)), store.clone());
        for _ in 0..25 {
            p.generate(&request(MovementMode::Walking)).await;
        }
        assert_eq!(p.queue_len().await, 10);
        assert_eq!(p.history_len().await, 25);

        let saved: Vec<GeneratedContent> = load_json(store.as_ref(), HISTORY_KEY).await.unwrap();
        assert_eq!(saved.len(), 20);

        let restored = pipeline_with(Arc::new(StaticGenerator::new(10)), store);
        restored.load_history().await;
        assert_eq!(restored.history_len().await, 20);
        assert_eq!(restored.queue_len().await, 0);
    }

    #[tokio::test]
    async fn corrupt_history_blob_is_ignored() {
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
        store.save(HISTORY_KEY, "[{\"broken\": ").await.unwrap();
        let p = pipeline_with(Arc::new(StaticGenerator::new(10)), store);
        p.load_history().await;
        assert_eq!(p.history_len().await, 0);
    }

    #[tokio::test]
    async fn played_content_leaves_queue() {
        let p = pipeline(Arc::new(StaticGenerator::new(10)));
        let content = p.generate(&request(MovementMode::Walking)).await.into_content().unwrap();
        p.mark_playing(&content.id).await;
        assert!(p.get(&content.id).await.unwrap().playing);

        p.mark_played(&content.id).await;
        assert_eq!(p.queue_len().await, 0);
        let from_history = p.get(&content.id).await.unwrap();
        assert!(!from_history.playing);
    }
}

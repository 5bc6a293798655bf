use std::time::Duration;

/// Pipeline limits and scoring constants.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_queue_size: usize,
    pub max_history_size: usize,
    /// History items written to the config store on each save.
    pub persisted_history: usize,

    /// Spoken pace used to estimate content duration.
    pub words_per_minute: f64,

    /// Stationary dwell (minutes) after which new content is always warranted.
    pub linger_regenerate_minutes: f64,
    /// Queue depth for the current mode below which new content is warranted.
    pub min_queued_for_mode: usize,

    /// Interest weight that earns the interest boost.
    pub strong_interest_weight: f64,
    pub interest_boost: f64,
    /// Stationary dwell (minutes) that earns the dwell boost.
    pub dwell_boost_minutes: f64,
    pub dwell_boost: f64,

    /// History items within this radius and window mark new content as a near-duplicate.
    pub duplicate_radius_m: f64,
    pub duplicate_window: chrono::Duration,
    pub duplicate_penalty: f64,

    /// Priority gap under which two queued items count as tied.
    pub priority_tie_epsilon: f64,

    pub generation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10,
            max_history_size: 50,
            persisted_history: 20,
            words_per_minute: 150.0,
            linger_regenerate_minutes: 5.0,
            min_queued_for_mode: 2,
            strong_interest_weight: 0.7,
            interest_boost: 0.1,
            dwell_boost_minutes: 2.0,
            dwell_boost: 0.1,
            duplicate_radius_m: 100.0,
            duplicate_window: chrono::Duration::hours(24),
            duplicate_penalty: 0.7,
            priority_tie_epsilon: 0.1,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

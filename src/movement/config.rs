/// Tunable constants for speed estimation and hysteresis voting.
///
/// The values are empirical. Keep them here rather than inlined in the
/// classifier so they can be adjusted per deployment.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Ring buffer capacity for recent readings.
    pub history_capacity: usize,
    /// Number of trailing speeds used for the average and variance.
    pub averaging_window: usize,

    /// Samples closer together than this reuse the previous speed.
    pub min_sample_interval_secs: f64,
    /// Speeds above this are GPS artifacts and reuse the previous speed.
    pub max_plausible_speed_kmh: f64,

    /// Upper bound (exclusive) of the stationary band, km/h.
    pub stationary_max_kmh: f64,
    /// Upper bound (exclusive) of the walking band, km/h.
    pub walking_max_kmh: f64,
    /// Upper bound (exclusive) of the cycling band, km/h.
    pub cycling_max_kmh: f64,

    /// Votes needed before switching to a new mode.
    pub vote_threshold: f64,
    /// Multiplier applied each tick to every mode that was not voted for.
    pub vote_decay: f64,
    /// Average speed above which a Driving classification commits immediately.
    pub extreme_driving_kmh: f64,
    /// Average speed below which a Stationary classification commits immediately.
    pub extreme_stationary_kmh: f64,

    /// Speed variance (km/h squared) below which readings count as stable.
    pub stable_variance: f64,
    /// Speed variance above which readings count as erratic.
    pub erratic_variance: f64,
    pub stable_boost: f64,
    pub erratic_penalty: f64,
    /// Mean horizontal accuracy (m) considered poor / fair.
    pub poor_accuracy_m: f64,
    pub fair_accuracy_m: f64,
    pub poor_accuracy_penalty: f64,
    pub fair_accuracy_penalty: f64,
    /// Confidence floor once the vote threshold is met.
    pub committed_confidence_floor: f64,
    /// Confidence floor once `min_readings_for_floor` readings exist.
    pub baseline_confidence_floor: f64,
    pub min_readings_for_floor: usize,

    /// Speed delta (km/h) under which the trend is Stable.
    pub trend_threshold_kmh: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            averaging_window: 5,
            min_sample_interval_secs: 1.5,
            max_plausible_speed_kmh: 200.0,
            stationary_max_kmh: 2.0,
            walking_max_kmh: 15.0,
            cycling_max_kmh: 35.0,
            vote_threshold: 3.0,
            vote_decay: 0.8,
            extreme_driving_kmh: 25.0,
            extreme_stationary_kmh: 1.0,
            stable_variance: 4.0,
            erratic_variance: 15.0,
            stable_boost: 1.3,
            erratic_penalty: 0.7,
            poor_accuracy_m: 30.0,
            fair_accuracy_m: 20.0,
            poor_accuracy_penalty: 0.6,
            fair_accuracy_penalty: 0.8,
            committed_confidence_floor: 0.7,
            baseline_confidence_floor: 0.3,
            min_readings_for_floor: 3,
            trend_threshold_kmh: 2.0,
        }
    }
}

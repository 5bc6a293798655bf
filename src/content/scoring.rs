use chrono::{DateTime, Utc};

use super::config::PipelineConfig;
use super::types::{GeneratedContent, WeightedInterest};
use crate::movement::{MovementAnalysis, MovementMode};
use crate::utils::geo::GeoPoint;

/// Inputs for scoring one freshly generated item.
pub struct PriorityInputs<'a> {
    pub base_priority: f64,
    pub analysis: &'a MovementAnalysis,
    pub interests: &'a [WeightedInterest],
    pub origin: &'a GeoPoint,
    pub created_at: DateTime<Utc>,
}

/// Priority in [0, 1]: strategy base, plus boosts for strong interests and
/// long dwell, damped when similar content was produced nearby recently.
pub fn compute_priority(
    inputs: &PriorityInputs<'_>,
    history: &[GeneratedContent],
    config: &PipelineConfig,
) -> f64 {
    let mut priority = inputs.base_priority;

    if inputs
        .interests
        .iter()
        .any(|i| i.weight > config.strong_interest_weight)
    {
        priority += config.interest_boost;
    }

    if inputs.analysis.movement_mode == MovementMode::Stationary
        && inputs.analysis.stationary_duration_minutes > config.dwell_boost_minutes
    {
        priority += config.dwell_boost;
    }

    if has_recent_neighbor(inputs.origin, inputs.created_at, history, config) {
        priority *= config.duplicate_penalty;
    }

    if priority.is_finite() {
        priority.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn has_recent_neighbor(
    origin: &GeoPoint,
    created_at: DateTime<Utc>,
    history: &[GeneratedContent],
    config: &PipelineConfig,
) -> bool {
    history.iter().any(|item| {
        let age = created_at - item.created_at;
        age >= chrono::Duration::zero()
            && age <= config.duplicate_window
            && item.origin.distance_to(origin) <= config.duplicate_radius_m
    })
}

/// Spoken duration in whole seconds at the configured pace, never zero for
/// non-empty text.
pub fn estimate_duration_secs(body: &str, words_per_minute: f64) -> u32 {
    let words = body.split_whitespace().count();
    if words == 0 || words_per_minute <= 0.0 {
        return 0;
    }
    let secs = (words as f64 / words_per_minute * 60.0).round();
    (secs as u32).max(1)
}

use serde::Serialize;

use super::strategy::ContentStrategy;
use super::types::{ContentLength, ContentRequest, TopicalType, WeightedInterest};
use crate::movement::{MovementMode, Trend};
use crate::utils::geo::GeoPoint;

const MAX_PROMPT_INTERESTS: usize = 5;

/// What kind of surroundings the listener is moving through.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EnvironmentType {
    PointOfInterest,
    Pedestrian,
    CycleRoute,
    Roadway,
}

impl EnvironmentType {
    pub fn for_mode(mode: MovementMode) -> Self {
        match mode {
            MovementMode::Stationary => EnvironmentType::PointOfInterest,
            MovementMode::Walking => EnvironmentType::Pedestrian,
            MovementMode::Cycling => EnvironmentType::CycleRoute,
            MovementMode::Driving => EnvironmentType::Roadway,
        }
    }
}

/// Shape of the content being asked for.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptHints {
    pub movement_mode: MovementMode,
    pub speed_kmh: f64,
    pub trend: Trend,
    pub stationary_minutes: f64,
    pub environment: EnvironmentType,
    pub length: ContentLength,
    pub topical_type: TopicalType,
    pub target_words: u32,
}

/// Payload handed to the story generator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryPrompt {
    pub position: GeoPoint,
    pub interests: Vec<WeightedInterest>,
    pub hints: PromptHints,
    /// Title of what is playing now, so the generator can avoid repeating it.
    pub avoid_title: Option<String>,
}

pub fn build_prompt(request: &ContentRequest, strategy: &ContentStrategy) -> StoryPrompt {
    let mut interests: Vec<WeightedInterest> = request
        .interests
        .iter()
        .filter(|i| i.weight > 0.0 && !i.name.trim().is_empty())
        .cloned()
        .collect();
    interests.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    interests.truncate(MAX_PROMPT_INTERESTS);

    let analysis = &request.analysis;

    StoryPrompt {
        position: request.position,
        interests,
        hints: PromptHints {
            movement_mode: analysis.movement_mode,
            speed_kmh: analysis.average_speed_kmh,
            trend: analysis.trend,
            stationary_minutes: analysis.stationary_duration_minutes,
            environment: EnvironmentType::for_mode(analysis.movement_mode),
            length: strategy.length,
            topical_type: strategy.topical_type,
            target_words: strategy.length.target_words(),
        },
        avoid_title: request.current_content.as_ref().map(|c| c.title.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::strategy::StrategyTable;
    use crate::movement::MovementAnalysis;

    #[test]
    fn interests_sorted_and_capped() {
        let analysis = MovementAnalysis {
            movement_mode: MovementMode::Walking,
            average_speed_kmh: 4.5,
            ..MovementAnalysis::default()
        };
        let request = ContentRequest::new(analysis, GeoPoint::new(52.52, 13.40)).with_interests(vec![
            WeightedInterest::new("architecture", 0.4),
            WeightedInterest::new("music", 0.9),
            WeightedInterest::new("", 1.0),
            WeightedInterest::new("food", 0.0),
            WeightedInterest::new("war", 0.6),
            WeightedInterest::new("art", 0.5),
            WeightedInterest::new("science", 0.3),
            WeightedInterest::new("sport", 0.2),
        ]);
        let table = StrategyTable::default();
        let prompt = build_prompt(&request, table.for_mode(MovementMode::Walking));

        let names: Vec<&str> = prompt.interests.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["music", "war", "art", "architecture", "science"]);
        assert_eq!(prompt.hints.environment, EnvironmentType::Pedestrian);
        assert_eq!(prompt.hints.topical_type, TopicalType::HistoricalFact);
        assert_eq!(prompt.hints.target_words, 200);
        assert!(prompt.avoid_title.is_none());
    }
}

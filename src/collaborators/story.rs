use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::content::prompt::{EnvironmentType, StoryPrompt};
use crate::content::TopicalType;

/// Raw generator output.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub title: String,
    pub body: String,
}

/// Narrative generator, typically an LLM behind a network call. Latency is
/// unbounded; callers apply their own timeout.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate_story(&self, prompt: &StoryPrompt) -> Result<Story>;
}

const OPENERS: &[&str] = &[
    "Few people passing through here know that",
    "Long before the streets took their present shape,",
    "Locals still tell the tale of how",
    "If you look closely around you,",
];

/// Offline generator that fills fixed templates from the prompt. Keeps the
/// binary usable without a model backend.
#[derive(Default)]
pub struct TemplateStoryGenerator;

#[async_trait]
impl StoryGenerator for TemplateStoryGenerator {
    async fn generate_story(&self, prompt: &StoryPrompt) -> Result<Story> {
        let topic = prompt
            .interests
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "local history".to_string());

        let kind = match prompt.hints.topical_type {
            TopicalType::Narrative => "A story",
            TopicalType::HistoricalFact => "A moment in history",
            TopicalType::Fact => "Quick fact",
            TopicalType::Legend => "A local legend",
        };
        let setting = match prompt.hints.environment {
            EnvironmentType::PointOfInterest => "this spot",
            EnvironmentType::Pedestrian => "these streets",
            EnvironmentType::CycleRoute => "this route",
            EnvironmentType::Roadway => "the road ahead",
        };

        let opener = OPENERS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(OPENERS[0]);
        let sentence = format!(
            "{opener} {setting} near {:.4}, {:.4} has a connection to {topic}.",
            prompt.position.latitude, prompt.position.longitude
        );

        let target = prompt.hints.target_words as usize;
        let mut body = String::new();
        while body.split_whitespace().count() < target {
            if !body.is_empty() {
                body.push(' ');
            }
            body.push_str(&sentence);
        }

        Ok(Story {
            title: format!("{kind}: {topic}"),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{strategy::StrategyTable, prompt::build_prompt, ContentRequest, WeightedInterest};
    use crate::movement::{MovementAnalysis, MovementMode};
    use crate::utils::geo::GeoPoint;

    #[tokio::test]
    async fn template_story_reaches_target_length() {
        let analysis = MovementAnalysis {
            movement_mode: MovementMode::Driving,
            ..MovementAnalysis::default()
        };
        let request = ContentRequest::new(analysis, GeoPoint::new(40.0, -3.7))
            .with_interests(vec![WeightedInterest::new("castles", 0.8)]);
        let table = StrategyTable::default();
        let prompt = build_prompt(&request, table.for_mode(MovementMode::Driving));

        let story = TemplateStoryGenerator.generate_story(&prompt).await.unwrap();
        assert_eq!(story.title, "A local legend: castles");
        assert!(story.body.split_whitespace().count() >= 75);
    }
}

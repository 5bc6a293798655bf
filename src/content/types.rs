use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::movement::{MovementAnalysis, MovementMode};
use crate::utils::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContentLength {
    Short,
    Medium,
    Long,
}

impl Default for ContentLength {
    fn default() -> Self {
        ContentLength::Medium
    }
}

impl ContentLength {
    /// Word count the story generator should aim for.
    pub fn target_words(&self) -> u32 {
        match self {
            ContentLength::Short => 75,
            ContentLength::Medium => 200,
            ContentLength::Long => 400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentLength::Short => "short",
            ContentLength::Medium => "medium",
            ContentLength::Long => "long",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TopicalType {
    Narrative,
    HistoricalFact,
    Fact,
    Legend,
}

impl TopicalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicalType::Narrative => "narrative",
            TopicalType::HistoricalFact => "historical_fact",
            TopicalType::Fact => "fact",
            TopicalType::Legend => "legend",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedInterest {
    pub name: String,
    /// 0.0 - 1.0
    pub weight: f64,
}

impl WeightedInterest {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Everything the pipeline needs to decide on and produce one piece of content.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub analysis: MovementAnalysis,
    pub position: GeoPoint,
    pub interests: Vec<WeightedInterest>,
    pub current_content: Option<GeneratedContent>,
    pub force_refresh: bool,
}

impl ContentRequest {
    pub fn new(analysis: MovementAnalysis, position: GeoPoint) -> Self {
        Self {
            analysis,
            position,
            interests: Vec::new(),
            current_content: None,
            force_refresh: false,
        }
    }

    pub fn with_interests(mut self, interests: Vec<WeightedInterest>) -> Self {
        self.interests = interests;
        self
    }

    pub fn with_current_content(mut self, content: Option<GeneratedContent>) -> Self {
        self.current_content = content;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn mode(&self) -> MovementMode {
        self.analysis.movement_mode
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub id: String,
    pub title: String,
    pub body: String,
    pub estimated_duration_secs: u32,
    pub movement_mode: MovementMode,
    pub origin: GeoPoint,
    pub interests: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// 0.0 - 1.0
    pub priority: f64,
    #[serde(default)]
    pub playing: bool,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::PlaybackState;
use crate::content::GeneratedContent;
use crate::movement::{LocationReading, MovementAnalysis};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperatingMode {
    Discovery,
    Passive,
    Focused,
    Paused,
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Paused
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InteractionState {
    Idle,
    Listening,
    Generating,
    Playing,
    Waiting,
}

impl Default for InteractionState {
    fn default() -> Self {
        InteractionState::Idle
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageStats {
    pub total_distance_m: f64,
    pub content_generated: u64,
    pub content_consumed: u64,
    pub mode_switches: u64,
    pub sessions_started: u64,
    pub last_session_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MasterState {
    pub mode: OperatingMode,
    pub interaction: InteractionState,
    pub playback: Option<PlaybackState>,
    pub active: bool,
    pub generating: bool,
    pub last_reading: Option<LocationReading>,
    pub last_analysis: Option<MovementAnalysis>,
    pub current_content: Option<GeneratedContent>,
}

impl MasterState {
    pub fn new(mode: OperatingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Recompute the interaction state from what is going on right now.
    pub fn refresh_interaction(&mut self) {
        self.interaction = if self.generating {
            InteractionState::Generating
        } else {
            match self.playback {
                Some(PlaybackState::Playing) => InteractionState::Playing,
                Some(PlaybackState::Loading | PlaybackState::Paused) => InteractionState::Waiting,
                Some(PlaybackState::Idle) | None if self.active => InteractionState::Listening,
                _ => InteractionState::Idle,
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_follows_activity() {
        let mut state = MasterState::new(OperatingMode::Discovery);
        state.refresh_interaction();
        assert_eq!(state.interaction, InteractionState::Idle);

        state.active = true;
        state.refresh_interaction();
        assert_eq!(state.interaction, InteractionState::Listening);

        state.playback = Some(PlaybackState::Playing);
        state.refresh_interaction();
        assert_eq!(state.interaction, InteractionState::Playing);

        state.generating = true;
        state.refresh_interaction();
        assert_eq!(state.interaction, InteractionState::Generating);

        state.generating = false;
        state.playback = Some(PlaybackState::Loading);
        state.refresh_interaction();
        assert_eq!(state.interaction, InteractionState::Waiting);
    }
}

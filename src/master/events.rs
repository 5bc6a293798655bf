use serde::Serialize;

use super::state::{InteractionState, MasterState, OperatingMode, UsageStats};
use crate::content::GeneratedContent;
use crate::movement::MovementAnalysis;

/// What status listeners see after every state-affecting event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub mode: OperatingMode,
    pub interaction_state: InteractionState,
    pub last_analysis: Option<MovementAnalysis>,
    pub current_content: Option<GeneratedContent>,
    pub queue_size: usize,
    pub active: bool,
}

impl StatusSnapshot {
    pub fn from_state(state: &MasterState, queue_size: usize) -> Self {
        Self {
            mode: state.mode,
            interaction_state: state.interaction,
            last_analysis: state.last_analysis.clone(),
            current_content: state.current_content.clone(),
            queue_size,
            active: state.active,
        }
    }
}

/// Everything the master service pushes to listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum MasterEvent {
    Status(StatusSnapshot),
    ContentReady(GeneratedContent),
    StatsUpdated(UsageStats),
    Error(String),
}

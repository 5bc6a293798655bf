use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use super::types::{ContentLength, TopicalType};
use crate::movement::MovementMode;

/// Generation parameters for one movement mode.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentStrategy {
    pub mode: MovementMode,
    pub length: ContentLength,
    pub topical_type: TopicalType,
    pub refresh_interval: Duration,
    /// 0.0 - 1.0
    pub base_priority: f64,
}

/// One strategy per movement mode, fixed at startup.
///
/// Lingering users get long narratives on a slow cadence; fast movers get
/// short pieces more often.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    entries: [ContentStrategy; 4],
}

impl StrategyTable {
    /// Build a table from one entry per mode, in any order. Fails if a mode
    /// is listed twice (and so another is missing).
    pub fn new(entries: [ContentStrategy; 4]) -> Result<Self> {
        let mut slots: [Option<ContentStrategy>; 4] = Default::default();
        for entry in entries {
            let slot = &mut slots[entry.mode.index()];
            if slot.is_some() {
                bail!("duplicate content strategy for {} mode", entry.mode.as_str());
            }
            *slot = Some(entry);
        }

        match slots {
            [Some(stationary), Some(walking), Some(cycling), Some(driving)] => Ok(Self {
                entries: [stationary, walking, cycling, driving],
            }),
            _ => bail!("content strategy table must cover every movement mode"),
        }
    }

    pub fn for_mode(&self, mode: MovementMode) -> &ContentStrategy {
        &self.entries[mode.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentStrategy> {
        self.entries.iter()
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        // Listed in `MovementMode::index` order.
        Self {
            entries: [
                ContentStrategy {
                    mode: MovementMode::Stationary,
                    length: ContentLength::Long,
                    topical_type: TopicalType::Narrative,
                    refresh_interval: Duration::from_secs(300),
                    base_priority: 0.9,
                },
                ContentStrategy {
                    mode: MovementMode::Walking,
                    length: ContentLength::Medium,
                    topical_type: TopicalType::HistoricalFact,
                    refresh_interval: Duration::from_secs(120),
                    base_priority: 0.8,
                },
                ContentStrategy {
                    mode: MovementMode::Cycling,
                    length: ContentLength::Short,
                    topical_type: TopicalType::Fact,
                    refresh_interval: Duration::from_secs(60),
                    base_priority: 0.6,
                },
                ContentStrategy {
                    mode: MovementMode::Driving,
                    length: ContentLength::Short,
                    topical_type: TopicalType::Legend,
                    refresh_interval: Duration::from_secs(45),
                    base_priority: 0.7,
                },
            ],
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::geo::GeoPoint;

/// A single fix from the location collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReading {
    pub position: GeoPoint,
    pub timestamp: DateTime<Utc>,
    /// Speed reported by the sensor in m/s, if any.
    #[serde(default)]
    pub speed_mps: Option<f64>,
    /// Horizontal accuracy radius in meters, if any.
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl LocationReading {
    pub fn new(position: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            timestamp,
            speed_mps: None,
            accuracy_m: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Accuracy if it is usable; negative or non-finite values count as unknown.
    pub fn usable_accuracy(&self) -> Option<f64> {
        self.accuracy_m.filter(|a| a.is_finite() && *a >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MovementMode {
    Stationary,
    Walking,
    Cycling,
    Driving,
}

impl Default for MovementMode {
    fn default() -> Self {
        MovementMode::Stationary
    }
}

impl MovementMode {
    pub const ALL: [MovementMode; 4] = [
        MovementMode::Stationary,
        MovementMode::Walking,
        MovementMode::Cycling,
        MovementMode::Driving,
    ];

    /// Slot in per-mode arrays such as the vote counters.
    pub fn index(self) -> usize {
        match self {
            MovementMode::Stationary => 0,
            MovementMode::Walking => 1,
            MovementMode::Cycling => 2,
            MovementMode::Driving => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementMode::Stationary => "stationary",
            MovementMode::Walking => "walking",
            MovementMode::Cycling => "cycling",
            MovementMode::Driving => "driving",
        }
    }

    /// Whether content produced for `content_mode` may be served in this mode.
    ///
    /// Content made for a calmer mode stays acceptable one step busier
    /// (walking takes stationary, cycling takes walking), never the reverse.
    pub fn accepts(self, content_mode: MovementMode) -> bool {
        if self == content_mode {
            return true;
        }
        matches!(
            (self, content_mode),
            (MovementMode::Walking, MovementMode::Stationary)
                | (MovementMode::Cycling, MovementMode::Walking)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Trend {
    Accelerating,
    Decelerating,
    Stable,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovementAnalysis {
    pub current_speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub movement_mode: MovementMode,
    pub confidence: f64,
    pub stationary_duration_minutes: f64,
    pub trend: Trend,
}

impl MovementAnalysis {
    /// "No movement detected" result for input the classifier cannot use.
    pub fn neutral(mode: MovementMode) -> Self {
        Self {
            current_speed_kmh: 0.0,
            average_speed_kmh: 0.0,
            movement_mode: mode,
            confidence: 0.0,
            stationary_duration_minutes: 0.0,
            trend: Trend::Stable,
        }
    }
}

impl Default for MovementAnalysis {
    fn default() -> Self {
        Self::neutral(MovementMode::Stationary)
    }
}

use std::collections::VecDeque;

use log::{debug, warn};

use super::config::ClassifierConfig;
use super::types::{LocationReading, MovementAnalysis, MovementMode, Trend};

/// A stored reading together with the speed estimated when it arrived.
#[derive(Debug, Clone)]
struct Sample {
    reading: LocationReading,
    speed_kmh: f64,
}

/// Classifies movement mode from a stream of GPS fixes.
///
/// Speeds come from Haversine distance between consecutive fixes. The mode
/// implied by the averaged speed casts a vote each tick; the committed mode
/// only changes once a challenger has accumulated enough votes, so a single
/// noisy fix cannot flip it.
pub struct MovementClassifier {
    config: ClassifierConfig,
    history: VecDeque<Sample>,
    committed: MovementMode,
    votes: [f64; 4],
    last_speed_kmh: f64,
}

impl MovementClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            committed: MovementMode::Stationary,
            votes: [0.0; 4],
            last_speed_kmh: 0.0,
        }
    }

    pub fn committed_mode(&self) -> MovementMode {
        self.committed
    }

    pub fn reading_count(&self) -> usize {
        self.history.len()
    }

    pub fn votes_for(&self, mode: MovementMode) -> f64 {
        self.votes[mode.index()]
    }

    /// Feed one reading and return the updated analysis. Never fails: input
    /// that cannot be used yields a neutral analysis and leaves state alone.
    pub fn analyze(&mut self, reading: &LocationReading) -> MovementAnalysis {
        if !reading.position.is_valid() {
            warn!(
                "Ignoring malformed location ({}, {})",
                reading.position.latitude, reading.position.longitude
            );
            return MovementAnalysis::neutral(self.committed);
        }

        let speed = self.estimate_speed(reading);
        self.push(reading.clone(), speed);

        let average = self.average_speed();
        let implied = self.classify(average);
        self.cast_vote(implied);

        let previous = self.committed;
        self.committed = self.decide(implied, average);
        if previous != self.committed {
            debug!(
                "Movement mode {} -> {} (avg {:.1} km/h, votes {:.2})",
                previous.as_str(),
                self.committed.as_str(),
                average,
                self.votes_for(self.committed)
            );
        }

        let stationary_duration_minutes = if self.committed == MovementMode::Stationary {
            self.stationary_duration_minutes()
        } else {
            0.0
        };

        MovementAnalysis {
            current_speed_kmh: speed,
            average_speed_kmh: average,
            movement_mode: self.committed,
            confidence: self.confidence(),
            stationary_duration_minutes,
            trend: self.trend(),
        }
    }

    /// Clear history and votes; the committed mode goes back to Stationary.
    pub fn reset(&mut self) {
        self.history.clear();
        self.committed = MovementMode::Stationary;
        self.votes = [0.0; 4];
        self.last_speed_kmh = 0.0;
    }

    fn estimate_speed(&self, reading: &LocationReading) -> f64 {
        let Some(previous) = self.history.back() else {
            // First fix: trust the sensor speed if it looks sane.
            return reading
                .speed_mps
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(|s| s * 3.6)
                .filter(|kmh| *kmh <= self.config.max_plausible_speed_kmh)
                .unwrap_or(0.0);
        };

        let elapsed_secs =
            (reading.timestamp - previous.reading.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs < self.config.min_sample_interval_secs {
            return self.last_speed_kmh;
        }

        let distance_m = previous.reading.position.distance_to(&reading.position);
        let speed_kmh = distance_m / elapsed_secs * 3.6;

        if !speed_kmh.is_finite() || speed_kmh > self.config.max_plausible_speed_kmh {
            debug!("Discarding implausible speed {:.1} km/h", speed_kmh);
            return self.last_speed_kmh;
        }

        speed_kmh
    }

    fn push(&mut self, reading: LocationReading, speed_kmh: f64) {
        if self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(Sample { reading, speed_kmh });
        self.last_speed_kmh = speed_kmh;
    }

    fn recent_speeds(&self, count: usize) -> impl Iterator<Item = f64> + '_ {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).map(|s| s.speed_kmh)
    }

    fn average_speed(&self) -> f64 {
        mean(self.recent_speeds(self.config.averaging_window))
    }

    fn speed_variance(&self) -> f64 {
        let speeds: Vec<f64> = self.recent_speeds(self.config.averaging_window).collect();
        if speeds.len() < 2 {
            return 0.0;
        }
        let avg = mean(speeds.iter().copied());
        speeds.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / speeds.len() as f64
    }

    fn classify(&self, speed_kmh: f64) -> MovementMode {
        if speed_kmh < self.config.stationary_max_kmh {
            MovementMode::Stationary
        } else if speed_kmh < self.config.walking_max_kmh {
            MovementMode::Walking
        } else if speed_kmh < self.config.cycling_max_kmh {
            MovementMode::Cycling
        } else {
            MovementMode::Driving
        }
    }

    fn cast_vote(&mut self, implied: MovementMode) {
        for mode in MovementMode::ALL {
            let slot = &mut self.votes[mode.index()];
            if mode == implied {
                *slot += 1.0;
            } else {
                *slot = (*slot * self.config.vote_decay).max(0.0);
            }
        }
    }

    fn decide(&self, implied: MovementMode, average_kmh: f64) -> MovementMode {
        if implied == self.committed {
            return implied;
        }
        if self.votes_for(implied) >= self.config.vote_threshold {
            return implied;
        }
        let extreme = match implied {
            MovementMode::Driving => average_kmh > self.config.extreme_driving_kmh,
            MovementMode::Stationary => average_kmh < self.config.extreme_stationary_kmh,
            _ => false,
        };
        if extreme {
            implied
        } else {
            self.committed
        }
    }

    fn confidence(&self) -> f64 {
        let cfg = &self.config;
        let votes = self.votes_for(self.committed);
        let mut confidence = (votes / cfg.vote_threshold).min(1.0);

        let variance = self.speed_variance();
        if variance < cfg.stable_variance {
            confidence *= cfg.stable_boost;
        } else if variance > cfg.erratic_variance {
            confidence *= cfg.erratic_penalty;
        }

        let accuracies: Vec<f64> = self
            .history
            .iter()
            .skip(self.history.len().saturating_sub(3))
            .filter_map(|s| s.reading.usable_accuracy())
            .collect();
        if !accuracies.is_empty() {
            let mean_accuracy = mean(accuracies.iter().copied());
            if mean_accuracy > cfg.poor_accuracy_m {
                confidence *= cfg.poor_accuracy_penalty;
            } else if mean_accuracy > cfg.fair_accuracy_m {
                confidence *= cfg.fair_accuracy_penalty;
            }
        }

        if votes >= cfg.vote_threshold {
            confidence = confidence.max(cfg.committed_confidence_floor);
        }
        if self.history.len() >= cfg.min_readings_for_floor {
            confidence = confidence.max(cfg.baseline_confidence_floor);
        }

        if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn stationary_duration_minutes(&self) -> f64 {
        let run: Vec<&Sample> = self
            .history
            .iter()
            .rev()
            .take_while(|s| s.speed_kmh < self.config.stationary_max_kmh)
            .collect();

        if run.len() < 2 {
            return 0.0;
        }

        let newest = run[0].reading.timestamp;
        let oldest = run[run.len() - 1].reading.timestamp;
        let minutes = (newest - oldest).num_milliseconds() as f64 / 60_000.0;
        minutes.max(0.0)
    }

    fn trend(&self) -> Trend {
        let speeds: Vec<f64> = self.recent_speeds(4).collect();
        if speeds.len() < 4 {
            return Trend::Stable;
        }
        let earlier = (speeds[0] + speeds[1]) / 2.0;
        let later = (speeds[2] + speeds[3]) / 2.0;
        let delta = later - earlier;

        if delta.abs() < self.config.trend_threshold_kmh {
            Trend::Stable
        } else if delta > 0.0 {
            Trend::Accelerating
        } else {
            Trend::Decelerating
        }
    }
}

impl Default for MovementClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

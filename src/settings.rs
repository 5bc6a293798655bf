use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::collaborators::store::{load_json, save_json};
use crate::collaborators::ConfigStore;
use crate::content::{ContentLength, WeightedInterest};
use crate::master::{OperatingMode, UsageStats};

const PROFILE_KEY: &str = "user_profile";
const SETTINGS_KEY: &str = "settings";
const STATS_KEY: &str = "usage_stats";
const MODE_KEY: &str = "operating_mode";

const MIN_GENERATION_INTERVAL_SECS: u64 = 10;
const MAX_QUEUE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AudioQuality {
    Low,
    Standard,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActivityLevel {
    Relaxed,
    Moderate,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub interests: Vec<WeightedInterest>,
    pub preferred_length: ContentLength,
    pub activity_level: ActivityLevel,
    pub discovery_radius_m: f64,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            interests: vec![
                WeightedInterest::new("history", 0.6),
                WeightedInterest::new("architecture", 0.5),
                WeightedInterest::new("culture", 0.5),
            ],
            preferred_length: ContentLength::Medium,
            activity_level: ActivityLevel::Moderate,
            discovery_radius_m: 500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub audio_quality: AudioQuality,
    pub generation_interval_secs: u64,
    pub max_queue_size: usize,
    pub autoplay: bool,
    /// Dwell time before a switch to stationary triggers content right away.
    pub min_stationary_minutes: f64,
    pub battery_optimization: bool,
    pub data_saver: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_quality: AudioQuality::Standard,
            generation_interval_secs: 60,
            max_queue_size: 10,
            autoplay: true,
            min_stationary_minutes: 2.0,
            battery_optimization: true,
            data_saver: false,
        }
    }
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub interests: Option<Vec<WeightedInterest>>,
    pub preferred_length: Option<ContentLength>,
    pub activity_level: Option<ActivityLevel>,
    pub discovery_radius_m: Option<f64>,
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    pub audio_quality: Option<AudioQuality>,
    pub generation_interval_secs: Option<u64>,
    pub max_queue_size: Option<usize>,
    pub autoplay: Option<bool>,
    pub min_stationary_minutes: Option<f64>,
    pub battery_optimization: Option<bool>,
    pub data_saver: Option<bool>,
}

#[derive(Debug, Clone, Default)]
struct PersistedConfig {
    profile: UserProfile,
    settings: Settings,
    stats: UsageStats,
    mode: OperatingMode,
}

/// In-memory copy of the user's configuration, written back to the config
/// store on every change.
pub struct SettingsStore {
    store: Arc<dyn ConfigStore>,
    data: RwLock<PersistedConfig>,
}

impl SettingsStore {
    /// Load everything from `store`. Missing or unreadable entries fall back
    /// to defaults; loading never fails.
    pub async fn load(store: Arc<dyn ConfigStore>) -> Self {
        let profile: UserProfile = load_json(store.as_ref(), PROFILE_KEY)
            .await
            .map(sanitize_profile)
            .unwrap_or_default();
        let settings: Settings = load_json(store.as_ref(), SETTINGS_KEY)
            .await
            .map(sanitize_settings)
            .unwrap_or_default();
        let stats: UsageStats = load_json(store.as_ref(), STATS_KEY).await.unwrap_or_default();
        let mode: OperatingMode = load_json(store.as_ref(), MODE_KEY).await.unwrap_or_default();

        info!(
            "Loaded configuration: {} interests, interval {}s, last mode {:?}",
            profile.interests.len(),
            settings.generation_interval_secs,
            mode
        );

        Self {
            store,
            data: RwLock::new(PersistedConfig {
                profile,
                settings,
                stats,
                mode,
            }),
        }
    }

    pub async fn profile(&self) -> UserProfile {
        self.data.read().await.profile.clone()
    }

    pub async fn settings(&self) -> Settings {
        self.data.read().await.settings.clone()
    }

    pub async fn stats(&self) -> UsageStats {
        self.data.read().await.stats.clone()
    }

    pub async fn operating_mode(&self) -> OperatingMode {
        self.data.read().await.mode
    }

    /// Apply `update` and persist. The in-memory profile changes even if the
    /// write fails.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile> {
        let profile = {
            let mut guard = self.data.write().await;
            let profile = &mut guard.profile;
            if let Some(interests) = update.interests {
                profile.interests = interests;
            }
            if let Some(length) = update.preferred_length {
                profile.preferred_length = length;
            }
            if let Some(level) = update.activity_level {
                profile.activity_level = level;
            }
            if let Some(radius) = update.discovery_radius_m {
                profile.discovery_radius_m = radius;
            }
            *profile = sanitize_profile(profile.clone());
            profile.clone()
        };

        save_json(self.store.as_ref(), PROFILE_KEY, &profile).await?;
        Ok(profile)
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Settings> {
        let settings = {
            let mut guard = self.data.write().await;
            let settings = &mut guard.settings;
            if let Some(quality) = update.audio_quality {
                settings.audio_quality = quality;
            }
            if let Some(interval) = update.generation_interval_secs {
                settings.generation_interval_secs = interval;
            }
            if let Some(max) = update.max_queue_size {
                settings.max_queue_size = max;
            }
            if let Some(autoplay) = update.autoplay {
                settings.autoplay = autoplay;
            }
            if let Some(minutes) = update.min_stationary_minutes {
                settings.min_stationary_minutes = minutes;
            }
            if let Some(flag) = update.battery_optimization {
                settings.battery_optimization = flag;
            }
            if let Some(flag) = update.data_saver {
                settings.data_saver = flag;
            }
            *settings = sanitize_settings(settings.clone());
            settings.clone()
        };

        save_json(self.store.as_ref(), SETTINGS_KEY, &settings).await?;
        Ok(settings)
    }

    pub async fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        self.data.write().await.mode = mode;
        save_json(self.store.as_ref(), MODE_KEY, &mode).await
    }

    /// Mutate stats in memory; call [`SettingsStore::save_stats`] to persist.
    pub async fn update_stats<F>(&self, apply: F) -> UsageStats
    where
        F: FnOnce(&mut UsageStats),
    {
        let mut guard = self.data.write().await;
        apply(&mut guard.stats);
        guard.stats.clone()
    }

    pub async fn save_stats(&self) -> Result<()> {
        let stats = self.stats().await;
        save_json(self.store.as_ref(), STATS_KEY, &stats).await
    }
}

fn sanitize_profile(mut profile: UserProfile) -> UserProfile {
    for interest in &mut profile.interests {
        if !interest.weight.is_finite() {
            warn!("Interest '{}' has invalid weight; resetting", interest.name);
            interest.weight = 0.5;
        }
        interest.weight = interest.weight.clamp(0.0, 1.0);
    }
    if !profile.discovery_radius_m.is_finite() || profile.discovery_radius_m <= 0.0 {
        profile.discovery_radius_m = UserProfile::default().discovery_radius_m;
    }
    profile
}

fn sanitize_settings(mut settings: Settings) -> Settings {
    settings.generation_interval_secs = settings
        .generation_interval_secs
        .max(MIN_GENERATION_INTERVAL_SECS);
    settings.max_queue_size = settings.max_queue_size.clamp(1, MAX_QUEUE_LIMIT);
    if !settings.min_stationary_minutes.is_finite() || settings.min_stationary_minutes < 0.0 {
        settings.min_stationary_minutes = Settings::default().min_stationary_minutes;
    }
    settings
}

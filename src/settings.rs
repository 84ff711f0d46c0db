//! Game settings and balance
//!
//! Persisted separately from run snapshots in the durable store.

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::persistence::Storage;

/// Fall pace presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PacePreset {
    Relaxed,
    #[default]
    Standard,
    Intense,
}

impl PacePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacePreset::Relaxed => "Relaxed",
            PacePreset::Standard => "Standard",
            PacePreset::Intense => "Intense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "relaxed" | "slow" => Some(PacePreset::Relaxed),
            "standard" | "normal" => Some(PacePreset::Standard),
            "intense" | "fast" => Some(PacePreset::Intense),
            _ => None,
        }
    }

    /// Multiplier applied to fall durations (1.0 = standard)
    pub fn fall_duration_scale(&self) -> f32 {
        match self {
            PacePreset::Relaxed => 1.4,
            PacePreset::Standard => 1.0,
            PacePreset::Intense => 0.75,
        }
    }
}

/// Tunable game rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Fall pace preset
    pub pace: PacePreset,

    // === Run rules ===
    pub max_lives: u8,
    pub max_level: u32,
    /// Problems solved to finish a level
    pub target_per_level: u32,

    // === Timing ===
    pub spawn_delay_ms: u64,
    pub countdown_ms: u64,
    pub watchdog_timeout_ms: u64,
    /// Snapshot writes are coalesced within this window
    pub snapshot_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pace: PacePreset::Standard,

            max_lives: MAX_LIVES,
            max_level: MAX_LEVEL,
            target_per_level: TARGET_PROBLEMS_PER_LEVEL,

            spawn_delay_ms: SPAWN_DELAY_MS,
            countdown_ms: COUNTDOWN_MS,
            watchdog_timeout_ms: WATCHDOG_TIMEOUT_MS,
            snapshot_debounce_ms: SNAPSHOT_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    /// Create settings from a pace preset
    pub fn from_preset(pace: PacePreset) -> Self {
        Self {
            pace,
            ..Self::default()
        }
    }

    /// Reject values that would make the run unplayable
    pub fn sanitized(mut self) -> Self {
        self.max_lives = self.max_lives.max(1);
        self.max_level = self.max_level.clamp(1, MAX_LEVEL);
        self.target_per_level = self.target_per_level.max(1);
        self.watchdog_timeout_ms = self.watchdog_timeout_ms.max(self.spawn_delay_ms.saturating_add(TICK_MS));
        self
    }

    /// Storage key
    const STORAGE_KEY: &'static str = "mathfall_settings";

    /// Load settings from the durable store, defaults on any failure
    pub fn load(storage: &dyn Storage) -> Self {
        match storage.get(Self::STORAGE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Settings>(&json) {
                Ok(settings) => {
                    log::info!("Loaded settings ({} pace)", settings.pace.as_str());
                    return settings.sanitized();
                }
                Err(e) => log::warn!("Ignoring unreadable settings: {}", e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Settings store unavailable: {}", e),
        }

        log::info!("Using default settings");
        Self::default()
    }

    /// Save settings to the durable store (best effort)
    pub fn save(&self, storage: &mut dyn Storage) {
        match serde_json::to_string(self) {
            Ok(json) => match storage.set(Self::STORAGE_KEY, &json) {
                Ok(()) => log::info!("Settings saved"),
                Err(e) => log::warn!("Settings not saved: {}", e),
            },
            Err(e) => log::warn!("Settings not serializable: {}", e),
        }
    }
}

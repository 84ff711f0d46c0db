//! Mathfall - a timed falling-problem arithmetic game
//!
//! Core modules:
//! - `sim`: Deterministic simulation (spawning, falling, judging, level flow)
//! - `supply`: Problem batches (cache, local tables, rate-limited generator, fallback)
//! - `persistence`: Durable key/value store, run snapshots, unlock high-water mark
//! - `scoring`: Score submission and the pending-score queue
//! - `session`: Drives one run and wires the collaborators together
//! - `platform`: Browser/native platform abstraction
//! - `settings`: Data-driven game balance

pub mod error;
pub mod persistence;
pub mod platform;
pub mod scoring;
pub mod session;
pub mod settings;
pub mod sim;
pub mod supply;

pub use error::{GeneratorError, ScoreError, StorageError, SupplyError};
pub use scoring::{PendingScores, ScoreBackend, ScorePayload};
pub use session::{LoadKind, Session, SessionConfig, StartOutcome};
pub use settings::{PacePreset, Settings};
pub use supply::{ProblemSupplyService, SupplyConfig};

/// Game configuration constants
pub mod consts {
    /// Host tick cadence (20 Hz is plenty for a 1-D fall)
    pub const TICK_MS: u64 = 50;

    /// Life economy
    pub const MAX_LIVES: u8 = 3;
    /// Highest playable level; completing it wins the run
    pub const MAX_LEVEL: u32 = 10;
    /// Problems to solve before a level completes
    pub const TARGET_PROBLEMS_PER_LEVEL: u32 = 10;
    /// Points per correct answer, multiplied by the current level
    pub const POINTS_PER_LEVEL: u64 = 10;

    /// Hard cap on simultaneously falling items (any level)
    pub const MAX_ACTIVE_PROBLEMS: usize = 6;
    /// Minimum delay between two spawn batches
    pub const SPAWN_DELAY_MS: u64 = 2_000;

    /// Fall travel is measured in percent of the play area height
    pub const WARNING_Y: f32 = 80.0;
    pub const MISS_Y: f32 = 100.0;
    /// Fall duration at level 1 (Standard pace)
    pub const BASE_FALL_MS: u64 = 12_000;
    /// Fall duration shaved off per level
    pub const FALL_STEP_MS: u64 = 800;
    /// Floor so high levels stay playable
    pub const MIN_FALL_MS: u64 = 5_000;

    /// Play area width is 0..100; items keep away from the edges
    pub const PLAY_X_MIN: f32 = 8.0;
    pub const PLAY_X_MAX: f32 = 92.0;
    /// Spawn gaps (percent units)
    pub const MIN_X_GAP: f32 = 14.0;
    pub const MIN_Y_GAP: f32 = 12.0;
    /// First spawn row sits this far above the visible area
    pub const SPAWN_Y_TOP: f32 = -8.0;

    /// Settled items linger this long so their final status can render
    pub const FADE_MS: u64 = 400;
    /// Intro countdown before the first spawn
    pub const COUNTDOWN_MS: u64 = 3_000;
    /// No spawn for this long means the scheduler is stuck
    pub const WATCHDOG_TIMEOUT_MS: u64 = 30_000;

    /// Snapshot writes are coalesced inside this window
    pub const SNAPSHOT_DEBOUNCE_MS: u64 = 500;

    /// Supply cache entry lifetime (5 minutes)
    pub const SUPPLY_CACHE_TTL_MS: u64 = 5 * 60 * 1_000;
    /// External generator budget: this many calls per rolling window
    pub const GENERATOR_CALLS_PER_WINDOW: usize = 10;
    pub const GENERATOR_WINDOW_MS: u64 = 60_000;
    /// Problems requested per batch
    pub const BATCH_SIZE: usize = 10;
}


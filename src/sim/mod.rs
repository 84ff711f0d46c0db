//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Time only comes in through the `now_ms` argument
//! - Seeded RNG only
//! - Stable iteration order (oldest item first)
//! - No storage, network or platform dependencies

pub mod fall;
pub mod judge;
pub mod placement;
pub mod progression;
pub mod spawn;
pub mod state;
pub mod tick;
pub mod watchdog;

pub use fall::{fall_duration_ms, max_active_items, speed_for_level};
pub use judge::{Judgement, submit};
pub use placement::plan;
pub use spawn::SpawnOutcome;
pub use state::{
    ActiveItem, GameEvent, GameOverReason, GamePhase, GameState, ItemStatus, Operation,
    PoolFreshness, Problem, RunState,
};
pub use tick::{TickInput, pause, resume, tick};
pub use watchdog::Watchdog;

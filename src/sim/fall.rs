//! Fall simulator
//!
//! One-dimensional: every airborne item moves down by its speed once per tick.
//! Crossing `WARNING_Y` flips the status to `Warning` (cue only); crossing
//! `MISS_Y` settles the item as missed and costs a life, exactly once.

use super::judge;
use super::state::{GameState, ItemStatus};
use crate::consts::*;
use crate::settings::PacePreset;

/// Items allowed in the air at once for a level. Non-decreasing in level,
/// never above `MAX_ACTIVE_PROBLEMS`.
pub fn max_active_items(level: u32) -> usize {
    let level = level.max(1) as usize;
    (2 + (level - 1) / 2).min(MAX_ACTIVE_PROBLEMS)
}

/// Time for an item to fall the full height at this level
pub fn fall_duration_ms(level: u32, pace: PacePreset) -> u64 {
    let steps = u64::from(level.max(1) - 1);
    let base = BASE_FALL_MS.saturating_sub(steps * FALL_STEP_MS);
    let scaled = (base as f32 * pace.fall_duration_scale()) as u64;
    scaled.max(MIN_FALL_MS)
}

/// Percent of the fall covered per tick
pub fn speed_for_level(level: u32, pace: PacePreset) -> f32 {
    let ticks = fall_duration_ms(level, pace) as f32 / TICK_MS as f32;
    MISS_Y / ticks.max(1.0)
}

/// Advance every airborne item by one tick. Items crossing the bottom are
/// settled through the judge's miss path and removed from the air.
pub fn advance(state: &mut GameState, now_ms: u64) {
    let mut crossed = Vec::new();

    for item in state.items.iter_mut() {
        if !item.is_open() {
            continue;
        }
        item.pos.y += item.speed;

        if item.pos.y >= WARNING_Y && item.status == ItemStatus::Normal {
            item.status = ItemStatus::Warning;
        }
        if item.pos.y >= MISS_Y {
            crossed.push(item.id);
        }
    }

    for item_id in crossed {
        judge::miss(state, item_id, now_ms);
        if state.phase.is_terminal() {
            break;
        }
    }
}

/// Drop settled items whose grace period is over
pub fn expire_fading(state: &mut GameState, now_ms: u64) {
    state.fading.retain(|item| item.fade_until_ms > now_ms);
}

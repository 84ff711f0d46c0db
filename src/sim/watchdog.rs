//! Stall watchdog
//!
//! Armed while the run is active and unpaused, reset on every successful
//! spawn. Firing means the scheduler has produced nothing for a full timeout:
//! with at least one problem solved the level is forced complete, otherwise a
//! fresh batch is requested for the current level.

use serde::{Deserialize, Serialize};

use super::progression;
use super::state::{GameEvent, GameState};

/// Deadline timer measured on the session clock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchdog {
    pub timeout_ms: u64,
    deadline_ms: Option<u64>,
}

impl Watchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            deadline_ms: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_ms.is_some()
    }

    /// Arm if not already armed
    pub fn arm(&mut self, now_ms: u64) {
        if self.deadline_ms.is_none() {
            self.deadline_ms = Some(now_ms.saturating_add(self.timeout_ms));
        }
    }

    /// Restart the countdown (successful spawn)
    pub fn reset(&mut self, now_ms: u64) {
        self.deadline_ms = Some(now_ms.saturating_add(self.timeout_ms));
    }

    pub fn disarm(&mut self) {
        self.deadline_ms = None;
    }

    /// Push the deadline back by time spent paused
    pub fn shift(&mut self, paused_ms: u64) {
        if let Some(deadline) = self.deadline_ms.as_mut() {
            *deadline = deadline.saturating_add(paused_ms);
        }
    }

    /// True once the deadline has passed. Disarms on fire.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                self.deadline_ms = None;
                true
            }
            _ => false,
        }
    }
}

/// Arm/poll the watchdog for this tick and run recovery if it fired
pub fn check(state: &mut GameState, now_ms: u64) {
    if !state.is_active() {
        state.watchdog.disarm();
        return;
    }

    state.watchdog.arm(now_ms);
    if !state.watchdog.poll(now_ms) {
        return;
    }

    let solved = state.run.problems_solved_this_level;
    let forced_level_up = solved >= 1;
    log::warn!(
        "Watchdog fired on level {} ({} solved, {} in pool, {:?})",
        state.run.current_level,
        solved,
        state.pool.len(),
        state.freshness
    );
    state.emit(GameEvent::WatchdogFired { forced_level_up });

    if forced_level_up {
        progression::complete_level(state);
    } else {
        // Used markers may be what wedged the scheduler
        state.used.clear();
        state.request_supply();
        state.watchdog.reset(now_ms);
    }
}

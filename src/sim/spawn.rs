//! Spawn scheduler
//!
//! Admits problems from the level pool into the air, bounded by the level's
//! item cap and the spawn delay. A pool that has not been refreshed yet is a
//! normal condition: the scheduler simply waits.

use super::placement;
use super::progression;
use super::state::{ActiveItem, GameEvent, GameState, PoolFreshness, Problem};
use crate::consts::{MIN_X_GAP, MIN_Y_GAP};

/// What the scheduler did this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Not running, at the cap, or inside the spawn delay
    Waiting,
    Spawned(usize),
    /// Nothing usable and a batch has been requested (or is loading)
    Starved,
    /// Pool used up with progress made; level forced complete
    ForcedLevelUp,
}

/// Run one scheduling pass
pub fn schedule(state: &mut GameState, now_ms: u64) -> SpawnOutcome {
    if !state.is_active() {
        return SpawnOutcome::Waiting;
    }

    let cap = state.max_active();
    if state.items.len() > cap {
        log::warn!(
            "{} items airborne on level {} (cap {}), clamping",
            state.items.len(),
            state.run.current_level,
            cap
        );
        state.items.truncate(cap);
    }
    if state.items.len() >= cap {
        return SpawnOutcome::Waiting;
    }
    if let Some(last) = state.last_spawn_ms {
        if now_ms.saturating_sub(last) < state.settings.spawn_delay_ms {
            return SpawnOutcome::Waiting;
        }
    }

    let needed = cap - state.items.len();
    let mut picks = candidates(state, needed);

    if picks.is_empty() {
        if state.pool.is_empty() {
            // Only a delivered batch that came back empty ends the level
            if state.pool_delivered && state.run.problems_solved_this_level >= 1 {
                progression::complete_level(state);
                return SpawnOutcome::ForcedLevelUp;
            }
            request_when_due(state, now_ms);
            return SpawnOutcome::Starved;
        }

        if state.freshness == PoolFreshness::Refreshing {
            // New batch on its way; don't recycle the old one
            return SpawnOutcome::Starved;
        }

        log::debug!(
            "Level {} pool exhausted, recycling {} problems",
            state.run.current_level,
            state.pool.len()
        );
        state.used.clear();
        picks = candidates(state, needed);

        if picks.is_empty() {
            // Everything in the pool is solved or airborne
            if state.items.is_empty() && state.run.problems_solved_this_level >= 1 {
                progression::complete_level(state);
                return SpawnOutcome::ForcedLevelUp;
            }
            if state.items.is_empty() {
                request_when_due(state, now_ms);
            }
            return SpawnOutcome::Starved;
        }
    }

    let speed = state.speed();
    let points = placement::plan(picks.len(), MIN_X_GAP, MIN_Y_GAP, state.rng());
    let count = picks.len();
    for (problem, pos) in picks.into_iter().zip(points) {
        state.used.insert(problem.id);
        let id = state.next_entity_id();
        state.items.push(ActiveItem::new(id, problem, pos, speed));
    }

    state.last_spawn_ms = Some(now_ms);
    state.watchdog.reset(now_ms);
    state.emit(GameEvent::ItemsSpawned { count });
    SpawnOutcome::Spawned(count)
}

/// Re-request supply at most once per spawn delay
fn request_when_due(state: &mut GameState, now_ms: u64) {
    if let Some(last) = state.last_starved_request_ms {
        if now_ms.saturating_sub(last) < state.settings.spawn_delay_ms {
            return;
        }
    }
    state.last_starved_request_ms = Some(now_ms);
    state.request_supply();
}

/// Up to `needed` pool problems that are unused, unsolved and not airborne
fn candidates(state: &GameState, needed: usize) -> Vec<Problem> {
    state
        .pool
        .iter()
        .filter(|p| !state.used.contains(&p.id) && !state.solved.contains(&p.id))
        .filter(|p| !state.items.iter().any(|item| item.problem.id == p.id))
        .take(needed)
        .cloned()
        .collect()
}

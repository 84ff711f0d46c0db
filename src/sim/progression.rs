//! Level progression state machine
//!
//! ```text
//! Idle -> Running -> LevelComplete -> Transitioning -> Running(level + 1)
//!                 |               \-> GameOver(PlayerExit)
//!                 |-> GameOver(LivesExhausted)
//!                 \-> GameWon (final level target reached)
//! ```
//!
//! Transitions are plain functions over `GameState`; side effects (unlock
//! persistence, score submission, supply fetches) are requested through
//! `GameEvent`s and carried out by the session.

use super::state::{GameEvent, GameOverReason, GamePhase, GameState, PoolFreshness};

/// Intro countdown finished
pub fn start_running(state: &mut GameState) {
    if state.phase != GamePhase::Idle {
        return;
    }
    state.phase = GamePhase::Running;
    state.countdown_ms = 0;
    state.emit(GameEvent::CountdownFinished);
    state.emit(GameEvent::LevelStarted {
        level: state.run.current_level,
    });
}

/// Level target reached (or forced by the watchdog). Clears the air at once.
pub fn complete_level(state: &mut GameState) {
    if state.phase != GamePhase::Running {
        return;
    }
    let level = state.run.current_level;
    let max_level = state.settings.max_level;

    state.items.clear();
    state.watchdog.disarm();
    state.run.unlocked_level = state.run.unlocked_level.max((level + 1).min(max_level));
    state.emit(GameEvent::LevelCompleted {
        level,
        unlocked_level: state.run.unlocked_level,
    });
    log::info!(
        "Level {} complete (score {}, unlocked {})",
        level,
        state.run.score,
        state.run.unlocked_level
    );

    if level >= max_level {
        end_run(state, GamePhase::GameWon);
    } else {
        state.phase = GamePhase::LevelComplete;
    }
}

/// Player chose to continue. Returns false outside `LevelComplete`.
pub fn continue_to_next_level(state: &mut GameState) -> bool {
    if state.phase != GamePhase::LevelComplete {
        return false;
    }
    state.clear_level_tracking();
    state.pool.clear();
    state.pool_delivered = false;
    state.run.problems_solved_this_level = 0;
    state.run.current_level += 1;
    state.phase = GamePhase::Transitioning;
    log::info!("Advancing to level {}", state.run.current_level);

    // Any in-flight fetch is for the old level; its batch gets dropped
    state.freshness = PoolFreshness::Stale;
    state.request_supply();
    true
}

/// Player chose to stop at the level break
pub fn finish_after_level(state: &mut GameState) -> bool {
    if state.phase != GamePhase::LevelComplete {
        return false;
    }
    end_run(state, GamePhase::GameOver(GameOverReason::PlayerExit));
    true
}

/// Confirmed quit from any live phase
pub fn quit(state: &mut GameState) {
    end_run(state, GamePhase::GameOver(GameOverReason::PlayerExit));
}

/// Enter a terminal phase. Later calls are ignored.
pub fn end_run(state: &mut GameState, phase: GamePhase) {
    if state.phase.is_terminal() {
        return;
    }
    debug_assert!(phase.is_terminal());
    state.phase = phase;
    state.items.clear();
    state.watchdog.disarm();
    state.paused_at = None;
    log::info!(
        "Run ended: {:?} at level {} with score {}",
        phase,
        state.run.current_level,
        state.run.score
    );
    state.emit(GameEvent::RunEnded { phase });
}

//! Simulation tick
//!
//! Single driver loop: the host calls `tick` at a fixed cadence with the
//! current session clock. Order within a tick:
//! pause toggle, countdown, answer, fall, spawn, watchdog.
//! Answers are judged before the fall step, so an item solved on the tick it
//! would reach the bottom counts as solved.

use super::state::{GamePhase, GameState};
use super::{fall, judge, progression, spawn, watchdog};

/// Input commands for a single tick
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Answer typed by the player
    pub answer: Option<String>,
    /// Pause toggle
    pub pause: bool,
    /// Continue to the next level from the level-complete screen
    pub continue_level: bool,
    /// Stop the run from the level-complete screen
    pub finish: bool,
}

/// Advance the game state by one tick
pub fn tick(state: &mut GameState, input: &TickInput, now_ms: u64) {
    if state.phase.is_terminal() {
        return;
    }

    if input.pause {
        if state.is_paused() {
            resume(state, now_ms);
        } else {
            pause(state, now_ms);
            return;
        }
    }
    if state.is_paused() {
        return;
    }

    let elapsed = state
        .last_tick_ms
        .map(|last| now_ms.saturating_sub(last))
        .unwrap_or(0);
    state.last_tick_ms = Some(now_ms);

    match state.phase {
        GamePhase::Idle => {
            state.countdown_ms = state.countdown_ms.saturating_sub(elapsed);
            if state.countdown_ms == 0 {
                progression::start_running(state);
                // First spawn happens on the tick the countdown ends
                spawn::schedule(state, now_ms);
                watchdog::check(state, now_ms);
            }
        }

        GamePhase::Running => {
            state.run.elapsed_ms += elapsed;

            if let Some(answer) = input.answer.as_deref() {
                judge::submit(state, answer, now_ms);
            }
            if state.phase == GamePhase::Running {
                fall::advance(state, now_ms);
            }
            if state.phase == GamePhase::Running {
                spawn::schedule(state, now_ms);
            }
            watchdog::check(state, now_ms);
        }

        GamePhase::LevelComplete => {
            if input.continue_level {
                progression::continue_to_next_level(state);
            } else if input.finish {
                progression::finish_after_level(state);
            }
        }

        GamePhase::Transitioning | GamePhase::GameOver(_) | GamePhase::GameWon => {}
    }

    fall::expire_fading(state, now_ms);
}

/// Suspend the run; in-memory state is kept as is
pub fn pause(state: &mut GameState, now_ms: u64) {
    if state.is_paused() || state.phase.is_terminal() {
        return;
    }
    state.paused_at = Some(now_ms);
    log::debug!("Paused at {}", now_ms);
}

/// Resume, shifting every timing anchor by the time spent paused
pub fn resume(state: &mut GameState, now_ms: u64) {
    let Some(paused_at) = state.paused_at.take() else {
        return;
    };
    let paused_for = now_ms.saturating_sub(paused_at);

    if let Some(last) = state.last_spawn_ms.as_mut() {
        *last += paused_for;
    }
    if let Some(last) = state.last_starved_request_ms.as_mut() {
        *last += paused_for;
    }
    if let Some(last) = state.last_tick_ms.as_mut() {
        *last += paused_for;
    }
    for item in state.fading.iter_mut() {
        item.fade_until_ms += paused_for;
    }
    state.watchdog.shift(paused_for);
    log::debug!("Resumed after {} ms", paused_for);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use crate::settings::Settings;
    use crate::sim::state::{GameEvent, Operation, Problem};

    fn table(level: u32) -> Vec<Problem> {
        (1..=10)
            .map(|k| Problem::arithmetic(k, level as i64, Operation::Multiplication, k as i64, level).unwrap())
            .collect()
    }

    fn started() -> GameState {
        let mut state = GameState::new(12345, "multiplication", Settings::default(), 1, 1);
        state.install_batch(1, table(1));
        tick(&mut state, &TickInput::default(), 0);
        tick(&mut state, &TickInput::default(), COUNTDOWN_MS);
        state
    }

    #[test]
    fn test_tick_countdown_to_running() {
        let mut state = GameState::new(12345, "multiplication", Settings::default(), 1, 1);
        tick(&mut state, &TickInput::default(), 0);
        assert_eq!(state.phase, GamePhase::Idle);
        tick(&mut state, &TickInput::default(), COUNTDOWN_MS - TICK_MS);
        assert_eq!(state.phase, GamePhase::Idle);
        tick(&mut state, &TickInput::default(), COUNTDOWN_MS);
        assert_eq!(state.phase, GamePhase::Running);
    }

    #[test]
    fn test_first_running_tick_spawns() {
        let state = started();
        assert_eq!(state.items.len(), 2);
        assert!(state.watchdog.is_armed());
    }

    #[test]
    fn test_tick_pause_freezes_everything() {
        let mut state = started();
        let y = state.items[0].pos.y;
        let pause = TickInput {
            pause: true,
            ..Default::default()
        };
        tick(&mut state, &pause, COUNTDOWN_MS + TICK_MS);
        assert!(state.is_paused());

        tick(&mut state, &TickInput::default(), COUNTDOWN_MS + 60_000);
        assert_eq!(state.items[0].pos.y, y);
        assert_eq!(state.run.elapsed_ms, 0);

        let last_spawn = state.last_spawn_ms.unwrap();
        tick(&mut state, &pause, COUNTDOWN_MS + 70_000);
        assert!(!state.is_paused());
        assert_eq!(state.last_spawn_ms.unwrap(), last_spawn + 70_000 - TICK_MS);
        // Watchdog did not count the pause
        assert_ne!(state.phase, GamePhase::LevelComplete);
        assert!(
            !state
                .events
                .iter()
                .any(|e| matches!(e, GameEvent::WatchdogFired { .. }))
        );
    }

    #[test]
    fn test_answer_before_fall() {
        let mut state = started();
        state.items[0].pos.y = MISS_Y - 0.01;
        let answer = state.items[0].problem.answer.clone();
        let input = TickInput {
            answer: Some(answer),
            ..Default::default()
        };
        tick(&mut state, &input, COUNTDOWN_MS + TICK_MS);
        assert_eq!(state.run.lives, MAX_LIVES);
        assert_eq!(state.run.problems_solved_this_level, 1);
    }

    #[test]
    fn test_unanswered_items_cost_lives_until_game_over() {
        let mut state = started();
        let mut now = COUNTDOWN_MS;
        while !state.phase.is_terminal() && now < 10 * 60_000 {
            now += TICK_MS;
            tick(&mut state, &TickInput::default(), now);
        }
        assert_eq!(
            state.phase,
            GamePhase::GameOver(crate::sim::GameOverReason::LivesExhausted)
        );
        assert_eq!(state.run.lives, 0);
    }

    #[test]
    fn test_determinism() {
        let mut a = started();
        let mut b = started();
        for step in 1..200u64 {
            let input = TickInput {
                answer: (step % 30 == 0).then(|| "3".to_string()),
                ..Default::default()
            };
            tick(&mut a, &input, COUNTDOWN_MS + step * TICK_MS);
            tick(&mut b, &input, COUNTDOWN_MS + step * TICK_MS);
        }
        assert_eq!(a.run, b.run);
        assert_eq!(a.items.len(), b.items.len());
        for (x, y) in a.items.iter().zip(&b.items) {
            assert_eq!(x.pos, y.pos);
        }
    }
}

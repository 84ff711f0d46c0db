//! Answer judge
//!
//! Answers always target the oldest open item (first come, first served).
//! Comparison is exact string equality after trimming.

use super::progression;
use super::state::{GameEvent, GameOverReason, GamePhase, GameState, ItemStatus};
use crate::consts::POINTS_PER_LEVEL;

/// Result of a judged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgement {
    pub item_id: u64,
    pub correct: bool,
}

/// Judge a player's answer. `None` means nothing was judged: no open item,
/// run paused or not running, or a blank answer.
pub fn submit(state: &mut GameState, raw_answer: &str, now_ms: u64) -> Option<Judgement> {
    if state.phase != GamePhase::Running || state.is_paused() {
        return None;
    }
    let given = raw_answer.trim();
    if given.is_empty() {
        return None;
    }
    let index = state.items.iter().position(|item| item.is_open())?;

    let item = &mut state.items[index];
    let correct = given == item.problem.answer;
    let item_id = item.id;
    let problem_id = item.problem.id;
    item.settled = true;

    if correct {
        item.solved = true;
        item.status = ItemStatus::Correct;
        state.retire_item(index, now_ms);
        state.solved.insert(problem_id);

        state.run.score += POINTS_PER_LEVEL * u64::from(state.run.current_level);
        state.run.problems_solved_this_level += 1;
        state.emit(GameEvent::AnswerJudged { item_id, correct });
        log::debug!(
            "Correct ({}/{}) score={}",
            state.run.problems_solved_this_level,
            state.run.target_problems_per_level,
            state.run.score
        );

        if state.run.problems_solved_this_level >= state.run.target_problems_per_level {
            progression::complete_level(state);
        }
    } else {
        item.missed = true;
        item.status = ItemStatus::Incorrect;
        state.retire_item(index, now_ms);
        state.emit(GameEvent::AnswerJudged { item_id, correct });
        lose_life(state);
    }

    Some(Judgement { item_id, correct })
}

/// Timeout path: the item reached the bottom unanswered. Settled items are
/// ignored, so repeated calls for one item cost a single life.
pub fn miss(state: &mut GameState, item_id: u64, now_ms: u64) {
    let Some(index) = state
        .items
        .iter()
        .position(|item| item.id == item_id && item.is_open())
    else {
        return;
    };

    let item = &mut state.items[index];
    item.settled = true;
    item.missed = true;
    item.status = ItemStatus::Incorrect;
    state.retire_item(index, now_ms);
    state.emit(GameEvent::ItemMissed { item_id });
    lose_life(state);
}

fn lose_life(state: &mut GameState) {
    state.run.lives = state.run.lives.saturating_sub(1);
    let lives = state.run.lives;
    state.emit(GameEvent::LivesChanged { lives });
    if lives == 0 {
        progression::end_run(state, GamePhase::GameOver(GameOverReason::LivesExhausted));
    }
}

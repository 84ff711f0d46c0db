//! Game state and core simulation types
//!
//! `RunState` is the part of a run that survives a reload. Everything else in
//! `GameState` is rebuilt on restore.

use std::collections::BTreeSet;

use glam::Vec2;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use super::fall;
use super::watchdog::Watchdog;
use crate::settings::Settings;

/// Arithmetic operation a problem exercises
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    /// Free-form tag passed through from the external generator
    Other(String),
}

impl Operation {
    /// Parse a loose operation tag ("add", "+", "times", "Multiplication", ...)
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "addition" | "add" | "plus" | "sum" | "+" => Operation::Addition,
            "subtraction" | "subtract" | "minus" | "difference" | "-" => Operation::Subtraction,
            "multiplication" | "multiply" | "times" | "product" | "x" | "×" | "*" => {
                Operation::Multiplication
            }
            "division" | "divide" | "quotient" | "÷" | "/" => Operation::Division,
            _ => Operation::Other(tag),
        }
    }

    /// Canonical tag string
    pub fn tag(&self) -> &str {
        match self {
            Operation::Addition => "addition",
            Operation::Subtraction => "subtraction",
            Operation::Multiplication => "multiplication",
            Operation::Division => "division",
            Operation::Other(tag) => tag,
        }
    }

    /// Display symbol used in question text
    pub fn symbol(&self) -> &str {
        match self {
            Operation::Addition => "+",
            Operation::Subtraction => "-",
            Operation::Multiplication => "×",
            Operation::Division => "÷",
            Operation::Other(tag) => tag,
        }
    }

    /// Compute `left op right`; `None` for non-arithmetic tags, division by
    /// zero, or a non-integer quotient
    pub fn apply(&self, left: i64, right: i64) -> Option<i64> {
        match self {
            Operation::Addition => left.checked_add(right),
            Operation::Subtraction => left.checked_sub(right),
            Operation::Multiplication => left.checked_mul(right),
            Operation::Division => {
                if right == 0 || left % right != 0 {
                    None
                } else {
                    Some(left / right)
                }
            }
            Operation::Other(_) => None,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, Operation::Other(_))
    }
}

/// A question/answer pair. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: u64,
    pub question: String,
    pub answer: String,
    pub level: u32,
    pub operation: Operation,
}

impl Problem {
    /// Build `left op right` with its computed answer
    pub fn arithmetic(id: u64, left: i64, operation: Operation, right: i64, level: u32) -> Option<Self> {
        let answer = operation.apply(left, right)?;
        Some(Self {
            id,
            question: format!("{} {} {}", left, operation.symbol(), right),
            answer: answer.to_string(),
            level,
            operation,
        })
    }
}

/// Visual status of a falling item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    Normal,
    /// Past the warning line (cue only)
    Warning,
    Correct,
    Incorrect,
}

/// A problem falling through the play area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveItem {
    /// Fresh per spawn, so a recycled problem gets a new identity
    pub id: u64,
    pub problem: Problem,
    /// x in 0..100 of the play width, y in percent of the fall (100 = bottom)
    pub pos: Vec2,
    /// Percent of the fall covered per tick
    pub speed: f32,
    pub status: ItemStatus,
    pub solved: bool,
    pub missed: bool,
    /// Judged or missed; a settled item never costs a second life
    pub settled: bool,
    /// When the terminal status stops rendering (fading list only)
    #[serde(skip)]
    pub fade_until_ms: u64,
}

impl ActiveItem {
    pub fn new(id: u64, problem: Problem, pos: Vec2, speed: f32) -> Self {
        Self {
            id,
            problem,
            pos,
            speed,
            status: ItemStatus::Normal,
            solved: false,
            missed: false,
            settled: false,
            fade_until_ms: 0,
        }
    }

    /// Still eligible as an answer target
    pub fn is_open(&self) -> bool {
        !self.settled && !self.solved && !self.missed
    }
}

/// Why a run ended without winning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOverReason {
    LivesExhausted,
    /// Intentional stop (quit mid-run or exit at a level break)
    PlayerExit,
}

/// Level progression state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// Run created, intro countdown running
    Idle,
    /// Active gameplay
    Running,
    /// Level target reached, waiting for continue/exit
    LevelComplete,
    /// Next level's batch is loading
    Transitioning,
    GameOver(GameOverReason),
    GameWon,
}

impl GamePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::GameOver(_) | GamePhase::GameWon)
    }
}

/// Freshness of the level pool relative to the supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PoolFreshness {
    /// Needs a fetch that has not started yet
    #[default]
    Stale,
    /// A fetch is in flight; the current pool may be old
    Refreshing,
    Fresh,
}

/// Things that happened during a tick, drained by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    CountdownFinished,
    SupplyRequested { level: u32 },
    ItemsSpawned { count: usize },
    AnswerJudged { item_id: u64, correct: bool },
    ItemMissed { item_id: u64 },
    LivesChanged { lives: u8 },
    LevelCompleted { level: u32, unlocked_level: u32 },
    LevelStarted { level: u32 },
    WatchdogFired { forced_level_up: bool },
    RunEnded { phase: GamePhase },
    ProgressRestored { level: u32, score: u64 },
}

/// Mutable run aggregate; the persisted part of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub score: u64,
    pub lives: u8,
    pub current_level: u32,
    pub problems_solved_this_level: u32,
    pub target_problems_per_level: u32,
    /// Active (unpaused) play time
    pub elapsed_ms: u64,
    pub unlocked_level: u32,
}

impl RunState {
    pub fn new(settings: &Settings, start_level: u32, unlocked_level: u32) -> Self {
        let start_level = start_level.clamp(1, settings.max_level);
        Self {
            score: 0,
            lives: settings.max_lives,
            current_level: start_level,
            problems_solved_this_level: 0,
            target_problems_per_level: settings.target_per_level,
            elapsed_ms: 0,
            unlocked_level: unlocked_level.max(start_level).min(settings.max_level),
        }
    }

    pub fn time_spent_secs(&self) -> u64 {
        self.elapsed_ms / 1000
    }
}

/// Complete state of one session's simulation
#[derive(Debug, Clone)]
pub struct GameState {
    pub seed: u64,
    pub topic: String,
    pub settings: Settings,
    pub phase: GamePhase,
    pub run: RunState,
    /// Problems generated for the current level
    pub pool: Vec<Problem>,
    pub freshness: PoolFreshness,
    /// A batch for the current level has landed (possibly empty)
    pub pool_delivered: bool,
    /// Problem ids already admitted since the last recycle
    pub used: BTreeSet<u64>,
    /// Problem ids solved this level
    pub solved: BTreeSet<u64>,
    /// Airborne items, oldest first
    pub items: Vec<ActiveItem>,
    /// Settled items still showing their final status (not gameplay-affecting)
    pub fading: Vec<ActiveItem>,
    pub countdown_ms: u64,
    pub last_spawn_ms: Option<u64>,
    /// Last time the scheduler re-requested supply while starved
    pub last_starved_request_ms: Option<u64>,
    pub last_tick_ms: Option<u64>,
    pub paused_at: Option<u64>,
    pub watchdog: Watchdog,
    pub events: Vec<GameEvent>,
    rng: Pcg32,
    next_id: u64,
}

impl GameState {
    /// Create a fresh run sitting in the intro countdown
    pub fn new(seed: u64, topic: &str, settings: Settings, start_level: u32, unlocked_level: u32) -> Self {
        let run = RunState::new(&settings, start_level, unlocked_level);
        Self::with_run(seed, topic, settings, run)
    }

    /// Rebuild a run around a restored `RunState`; skips the countdown
    pub fn restored(seed: u64, topic: &str, settings: Settings, run: RunState) -> Self {
        let mut state = Self::with_run(seed, topic, settings, run);
        state.phase = GamePhase::Running;
        state.countdown_ms = 0;
        state.emit(GameEvent::ProgressRestored {
            level: state.run.current_level,
            score: state.run.score,
        });
        state.request_supply();
        state
    }

    fn with_run(seed: u64, topic: &str, settings: Settings, run: RunState) -> Self {
        let watchdog = Watchdog::new(settings.watchdog_timeout_ms);
        Self {
            seed,
            topic: topic.trim().to_string(),
            countdown_ms: settings.countdown_ms,
            settings,
            phase: GamePhase::Idle,
            run,
            pool: Vec::new(),
            freshness: PoolFreshness::Stale,
            pool_delivered: false,
            used: BTreeSet::new(),
            solved: BTreeSet::new(),
            items: Vec::new(),
            fading: Vec::new(),
            last_spawn_ms: None,
            last_starved_request_ms: None,
            last_tick_ms: None,
            paused_at: None,
            watchdog,
            events: Vec::new(),
            rng: Pcg32::seed_from_u64(seed),
            next_id: 1,
        }
    }

    /// Allocate a new entity ID
    pub fn next_entity_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn rng(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Running, unpaused and not over
    pub fn is_active(&self) -> bool {
        self.phase == GamePhase::Running && !self.is_paused()
    }

    /// Fall speed for the current level
    pub fn speed(&self) -> f32 {
        fall::speed_for_level(self.run.current_level, self.settings.pace)
    }

    /// Item cap for the current level
    pub fn max_active(&self) -> usize {
        fall::max_active_items(self.run.current_level)
    }

    /// Ask the session for a new batch for the current level. No-op while a
    /// fetch is already in flight.
    pub fn request_supply(&mut self) {
        if self.freshness == PoolFreshness::Refreshing {
            return;
        }
        self.freshness = PoolFreshness::Stale;
        let level = self.run.current_level;
        self.emit(GameEvent::SupplyRequested { level });
    }

    pub fn mark_refreshing(&mut self) {
        self.freshness = PoolFreshness::Refreshing;
    }

    /// Install a batch delivered by the supply. Batches for another level are
    /// dropped. An empty batch still ends a level transition; the scheduler
    /// and watchdog cope with an empty pool.
    pub fn install_batch(&mut self, level: u32, batch: Vec<Problem>) -> bool {
        if level != self.run.current_level {
            log::debug!(
                "Dropping batch for level {} (now on level {})",
                level,
                self.run.current_level
            );
            if self.freshness == PoolFreshness::Refreshing {
                self.freshness = PoolFreshness::Stale;
            }
            return false;
        }

        log::info!("Level {} pool refreshed with {} problems", level, batch.len());
        self.pool = batch;
        self.pool_delivered = true;
        self.used.clear();
        self.freshness = if self.pool.is_empty() {
            PoolFreshness::Stale
        } else {
            PoolFreshness::Fresh
        };

        if self.phase == GamePhase::Transitioning {
            self.phase = GamePhase::Running;
            self.emit(GameEvent::LevelStarted { level });
        }
        true
    }

    /// Drop every airborne item and per-level bookkeeping
    pub fn clear_level_tracking(&mut self) {
        self.items.clear();
        self.used.clear();
        self.solved.clear();
        self.last_spawn_ms = None;
        self.last_starved_request_ms = None;
    }

    /// Move an item from the airborne list to the fading list
    pub fn retire_item(&mut self, index: usize, now_ms: u64) {
        let mut item = self.items.remove(index);
        item.fade_until_ms = now_ms.saturating_add(crate::consts::FADE_MS);
        self.fading.push(item);
    }
}

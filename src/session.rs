//! Session driver
//!
//! Owns one run's `GameState` and carries out the side effects the
//! simulation asks for through `GameEvent`s: supply fetches, debounced
//! snapshots, the unlock mark and score submission. Collaborator failures
//! are logged and downgraded; nothing here ends a session early.
//!
//! A fetch claimed at the end of one tick is delivered at the start of the
//! next, so the scheduler always runs against whatever pool it already has.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SupplyError;
use crate::persistence::{self, PersistedSnapshot, SnapshotDebouncer, Storage};
use crate::scoring::{self, PendingScores, ScoreBackend, ScorePayload, ScoreRecord};
use crate::settings::Settings;
use crate::sim::{self, GameEvent, GamePhase, GameState, Judgement, RunState, TickInput, progression};
use crate::supply::{FetchTicket, ProblemSupplyService};

/// Who is playing what
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub game_id: String,
    pub student_id: String,
    pub topic: String,
    /// Level picked by the player; clamped to the unlocked range
    pub start_level: u32,
    pub seed: u64,
    pub settings: Settings,
}

/// How the host arrived at the game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Same page reloaded; an unfinished run may resume
    Reload,
    /// Fresh navigation (including a return after an explicit exit)
    Navigation,
}

/// What `Session::start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Fresh { level: u32, unlocked_level: u32 },
    Restored { level: u32, score: u64 },
}

pub struct Session {
    config: SessionConfig,
    state: GameState,
    supply: Rc<RefCell<ProblemSupplyService>>,
    storage: Box<dyn Storage>,
    scores: Box<dyn ScoreBackend>,
    in_flight: Option<FetchTicket>,
    supply_wanted: bool,
    debouncer: SnapshotDebouncer,
    last_run: RunState,
    persistence_degraded: bool,
    outbox: Vec<GameEvent>,
    last_record: Option<ScoreRecord>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        supply: Rc<RefCell<ProblemSupplyService>>,
        storage: Box<dyn Storage>,
        scores: Box<dyn ScoreBackend>,
    ) -> Self {
        let settings = config.settings.clone().sanitized();
        let state = GameState::new(config.seed, &config.topic, settings.clone(), config.start_level, 1);
        Self {
            debouncer: SnapshotDebouncer::new(settings.snapshot_debounce_ms),
            last_run: state.run.clone(),
            config: SessionConfig { settings, ..config },
            state,
            supply,
            storage,
            scores,
            in_flight: None,
            supply_wanted: false,
            persistence_degraded: false,
            outbox: Vec::new(),
            last_record: None,
        }
    }

    /// Begin (or restart) a run: retry queued scores, settle the unlocked
    /// level, then resume the stored run or start a fresh one.
    pub fn start(&mut self, now_ms: u64, load: LoadKind) -> StartOutcome {
        self.release_fetch();
        self.supply_wanted = false;
        self.outbox.clear();
        self.last_record = None;
        self.persistence_degraded = false;
        self.flush_pending();

        let unlocked = self.merge_unlocked_level();
        let settings = self.config.settings.clone();

        let outcome = match self.take_resumable(load) {
            Some(run) => {
                let mut run = resume_point(run, settings.max_level);
                run.unlocked_level = run.unlocked_level.max(unlocked).min(settings.max_level);
                let (level, score) = (run.current_level, run.score);
                log::info!("Restoring {} at level {} (score {})", self.config.game_id, level, score);
                self.state = GameState::restored(self.config.seed, &self.config.topic, settings, run);
                StartOutcome::Restored { level, score }
            }
            None => {
                let level = self.config.start_level.clamp(1, unlocked);
                self.state = GameState::new(self.config.seed, &self.config.topic, settings, level, unlocked);
                // Load the first batch during the countdown
                self.state.request_supply();
                StartOutcome::Fresh {
                    level,
                    unlocked_level: unlocked,
                }
            }
        };

        self.debouncer.clear();
        self.last_run = self.state.run.clone();
        self.absorb_events(now_ms);
        self.pump_supply();
        outcome
    }

    /// One host tick. Returns everything that happened since the last call.
    pub fn tick(&mut self, now_ms: u64, input: &TickInput) -> Vec<GameEvent> {
        self.deliver_batch(now_ms);
        sim::tick(&mut self.state, input, now_ms);
        self.absorb_events(now_ms);
        self.pump_supply();
        if self.debouncer.take_due(now_ms) {
            self.write_snapshot(now_ms);
        }
        std::mem::take(&mut self.outbox)
    }

    /// Judge an answer right away instead of waiting for the next tick
    pub fn submit_answer(&mut self, raw: &str, now_ms: u64) -> Option<Judgement> {
        let judgement = sim::submit(&mut self.state, raw, now_ms);
        self.absorb_events(now_ms);
        self.pump_supply();
        judgement
    }

    /// Pause and write any pending snapshot immediately
    pub fn pause(&mut self, now_ms: u64) {
        sim::pause(&mut self.state, now_ms);
        if self.debouncer.is_dirty() {
            self.debouncer.clear();
            self.write_snapshot(now_ms);
        }
    }

    pub fn resume(&mut self, now_ms: u64) {
        sim::resume(&mut self.state, now_ms);
    }

    /// Continue from the level-complete screen
    pub fn continue_level(&mut self, now_ms: u64) -> bool {
        let advanced = progression::continue_to_next_level(&mut self.state);
        self.absorb_events(now_ms);
        self.pump_supply();
        advanced
    }

    /// Stop at the level break
    pub fn finish_after_level(&mut self, now_ms: u64) -> bool {
        let finished = progression::finish_after_level(&mut self.state);
        self.absorb_events(now_ms);
        finished
    }

    /// Confirmed quit, navigation away or teardown. Ends a live run, clears
    /// the snapshot, releases the supply and retries queued scores.
    pub fn exit(&mut self, now_ms: u64) -> Vec<GameEvent> {
        if !self.state.phase.is_terminal() {
            progression::quit(&mut self.state);
            self.absorb_events(now_ms);
        }
        self.release_fetch();
        self.supply_wanted = false;
        self.state.watchdog.disarm();
        self.flush_pending();
        std::mem::take(&mut self.outbox)
    }

    /// Retry queued score submissions. Returns how many went through.
    pub fn flush_pending(&mut self) -> usize {
        let mut pending = PendingScores::load(self.storage.as_ref());
        if pending.is_empty() {
            return 0;
        }
        let sent = pending.flush(self.scores.as_mut());
        pending.save(self.storage.as_mut());
        sent
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Hand the store back (e.g. to a session created after a reload)
    pub fn into_storage(mut self) -> Box<dyn Storage> {
        self.release_fetch();
        std::mem::replace(&mut self.storage, Box::new(persistence::MemoryStorage::new()))
    }

    /// A fetch is claimed and waiting for delivery
    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Snapshot writes failed and were switched off for this run
    pub fn is_persistence_degraded(&self) -> bool {
        self.persistence_degraded
    }

    /// Record returned by the score service for the finished run
    pub fn last_score_record(&self) -> Option<&ScoreRecord> {
        self.last_record.as_ref()
    }

    fn merge_unlocked_level(&mut self) -> u32 {
        let game_id = &self.config.game_id;
        let remote = scoring::remote_unlocked_level(self.scores.as_mut(), game_id, &self.config.student_id);
        let local = persistence::load_unlocked_level(self.storage.as_ref(), game_id);
        let unlocked = remote.max(local).min(self.config.settings.max_level).max(1);
        if unlocked > local {
            if let Err(e) = persistence::raise_unlocked_level(self.storage.as_mut(), game_id, unlocked) {
                log::warn!("Unlock mark not stored: {}", e);
            }
        }
        unlocked
    }

    /// Run stored for this game, if it may be resumed. Anything else found
    /// under the key is discarded.
    fn take_resumable(&mut self, load: LoadKind) -> Option<RunState> {
        let snapshot = match persistence::load_snapshot(self.storage.as_ref(), &self.config.game_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Discarding unreadable snapshot: {}", e);
                self.discard_snapshot();
                return None;
            }
        };

        let same_topic = snapshot.topic == self.config.topic.trim();
        if load == LoadKind::Reload && !snapshot.is_final() && same_topic && snapshot.run.lives > 0 {
            return Some(snapshot.run);
        }
        log::info!(
            "Discarding snapshot for {} ({:?}, final={}, same_topic={})",
            self.config.game_id,
            load,
            snapshot.is_final(),
            same_topic
        );
        self.discard_snapshot();
        None
    }

    fn discard_snapshot(&mut self) {
        if let Err(e) = persistence::clear_snapshot(self.storage.as_mut(), &self.config.game_id) {
            log::warn!("Snapshot not cleared: {}", e);
        }
    }

    fn absorb_events(&mut self, now_ms: u64) {
        for event in self.state.drain_events() {
            match &event {
                GameEvent::SupplyRequested { .. } => self.supply_wanted = true,
                GameEvent::LevelCompleted { unlocked_level, .. } => {
                    let stored = persistence::raise_unlocked_level(
                        self.storage.as_mut(),
                        &self.config.game_id,
                        *unlocked_level,
                    );
                    if let Err(e) = stored {
                        log::warn!("Unlock mark not stored: {}", e);
                    }
                }
                GameEvent::RunEnded { phase } => self.finish_run(*phase, now_ms),
                _ => {}
            }
            self.outbox.push(event);
        }

        if !self.state.phase.is_terminal() && self.state.run != self.last_run {
            self.last_run = self.state.run.clone();
            self.debouncer.mark_dirty(now_ms);
        }
    }

    /// Claim a fetch if the simulation asked for one
    fn pump_supply(&mut self) {
        if !self.supply_wanted || self.in_flight.is_some() || self.state.phase.is_terminal() {
            return;
        }
        let level = self.state.run.current_level;
        let claimed = self.supply.borrow_mut().begin_fetch(&self.state.topic, level);
        match claimed {
            Ok(ticket) => {
                self.supply_wanted = false;
                self.state.mark_refreshing();
                self.in_flight = Some(ticket);
            }
            Err(SupplyError::AlreadyGenerating) => {
                log::debug!("Supply busy, retrying next tick");
            }
            Err(e) => {
                log::warn!("Supply request rejected: {}", e);
                self.supply_wanted = false;
                self.state.install_batch(level, Vec::new());
            }
        }
    }

    fn deliver_batch(&mut self, now_ms: u64) {
        let Some(ticket) = self.in_flight.take() else {
            return;
        };
        let level = ticket.level;
        let batch = self.supply.borrow_mut().complete_fetch(ticket, now_ms);
        self.state.install_batch(level, batch);
    }

    fn release_fetch(&mut self) {
        if let Some(ticket) = self.in_flight.take() {
            self.supply.borrow_mut().cancel_fetch(ticket);
        }
    }

    fn write_snapshot(&mut self, now_ms: u64) {
        if self.persistence_degraded || self.state.phase.is_terminal() {
            return;
        }
        let snapshot = PersistedSnapshot::new(&self.state.topic, &self.state.run, false, now_ms);
        if let Err(e) = persistence::save_snapshot(self.storage.as_mut(), &self.config.game_id, &snapshot) {
            log::warn!("Snapshot write failed ({}), continuing without persistence", e);
            self.persistence_degraded = true;
        }
    }

    /// Terminal phase reached: clear the snapshot, then submit the score
    fn finish_run(&mut self, phase: GamePhase, now_ms: u64) {
        self.release_fetch();
        self.supply_wanted = false;
        self.debouncer.clear();

        if let Err(e) = persistence::clear_snapshot(self.storage.as_mut(), &self.config.game_id) {
            log::warn!("Snapshot clear failed ({}), writing exit marker", e);
            let mut marker = PersistedSnapshot::new(&self.state.topic, &self.state.run, true, now_ms);
            marker.has_left_game = true;
            if let Err(e) = persistence::save_snapshot(self.storage.as_mut(), &self.config.game_id, &marker) {
                log::warn!("Exit marker not written: {}", e);
            }
        }

        let payload = ScorePayload {
            game_id: self.config.game_id.clone(),
            score: self.state.run.score,
            level: self.state.run.current_level,
            time_spent_seconds: self.state.run.time_spent_secs(),
            student_id: self.config.student_id.clone(),
        };
        log::info!("Run over ({:?}), submitting score {}", phase, payload.score);
        self.last_record = scoring::submit_or_queue(self.scores.as_mut(), self.storage.as_mut(), payload);
    }
}

/// A run saved at a level break resumes at the start of the next level
fn resume_point(mut run: RunState, max_level: u32) -> RunState {
    run.current_level = run.current_level.clamp(1, max_level);
    if run.problems_solved_this_level >= run.target_problems_per_level && run.current_level < max_level {
        run.current_level += 1;
        run.problems_solved_this_level = 0;
    }
    run
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_fetch();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("game_id", &self.config.game_id)
            .field("phase", &self.state.phase)
            .field("run", &self.state.run)
            .field("in_flight", &self.in_flight)
            .field("persistence_degraded", &self.persistence_degraded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use crate::error::{ScoreError, StorageError};
    use crate::persistence::{MemoryStorage, load_snapshot, load_unlocked_level, save_snapshot};
    use crate::sim::{GameOverReason, PoolFreshness};
    use crate::supply::SupplyConfig;

    #[derive(Default)]
    struct ScoreLog {
        submitted: Vec<ScorePayload>,
        fail: bool,
        unlocked: Option<u32>,
    }

    struct Recorder(Rc<RefCell<ScoreLog>>);

    impl ScoreBackend for Recorder {
        fn submit_score(&mut self, payload: &ScorePayload) -> Result<ScoreRecord, ScoreError> {
            let mut scores = self.0.borrow_mut();
            if scores.fail {
                return Err(ScoreError::Transient("503".into()));
            }
            scores.submitted.push(payload.clone());
            Ok(ScoreRecord {
                id: format!("score-{}", scores.submitted.len()),
                score: payload.score,
            })
        }

        fn highest_unlocked_level(&mut self, _game_id: &str, _student_id: &str) -> Result<u32, ScoreError> {
            self.0
                .borrow()
                .unlocked
                .ok_or_else(|| ScoreError::Transient("offline".into()))
        }
    }

    /// Memory store with switchable write failures
    struct Brittle {
        inner: MemoryStorage,
        fail_set: bool,
        fail_remove: bool,
    }

    impl Storage for Brittle {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_set {
                return Err(StorageError::Rejected("quota exceeded".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), StorageError> {
            if self.fail_remove {
                return Err(StorageError::Rejected("locked".into()));
            }
            self.inner.remove(key)
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            game_id: "g1".into(),
            student_id: "s1".into(),
            topic: "multiplication".into(),
            start_level: 1,
            seed: 42,
            settings: Settings::default(),
        }
    }

    fn shared_supply() -> Rc<RefCell<ProblemSupplyService>> {
        Rc::new(RefCell::new(ProblemSupplyService::new(SupplyConfig::default())))
    }

    fn scores() -> Rc<RefCell<ScoreLog>> {
        Rc::new(RefCell::new(ScoreLog::default()))
    }

    fn session(storage: Box<dyn Storage>, scores: &Rc<RefCell<ScoreLog>>) -> Session {
        Session::new(config(), shared_supply(), storage, Box::new(Recorder(scores.clone())))
    }

    /// Start and tick through the countdown
    fn running(session: &mut Session) -> u64 {
        session.start(0, LoadKind::Reload);
        session.tick(0, &TickInput::default());
        session.tick(COUNTDOWN_MS, &TickInput::default());
        assert_eq!(session.state().phase, GamePhase::Running);
        COUNTDOWN_MS
    }

    fn oldest_answer(session: &Session) -> Option<String> {
        session
            .state()
            .items
            .iter()
            .find(|item| item.is_open())
            .map(|item| item.problem.answer.clone())
    }

    /// Tick forward answering every open item until `done` holds
    fn play_until(session: &mut Session, mut now: u64, done: impl Fn(&Session) -> bool) -> u64 {
        while !done(session) && now < 600_000 {
            now += TICK_MS;
            session.tick(now, &TickInput::default());
            if let Some(answer) = oldest_answer(session) {
                session.submit_answer(&answer, now);
            }
        }
        now
    }

    #[test]
    fn test_level_complete_raises_unlock_and_continues() {
        let scores = scores();
        let mut session = session(Box::new(MemoryStorage::new()), &scores);
        let now = running(&mut session);
        let now = play_until(&mut session, now, |s| s.state().phase == GamePhase::LevelComplete);

        assert_eq!(session.state().phase, GamePhase::LevelComplete);
        assert_eq!(session.state().run.problems_solved_this_level, 10);
        assert_eq!(session.state().run.score, 100);
        assert!(session.state().items.is_empty());
        assert_eq!(load_unlocked_level(session.storage(), "g1"), 2);

        assert!(session.continue_level(now));
        assert_eq!(session.state().phase, GamePhase::Transitioning);
        let events = session.tick(now + TICK_MS, &TickInput::default());
        assert_eq!(session.state().phase, GamePhase::Running);
        assert_eq!(session.state().run.current_level, 2);
        assert!(events.contains(&GameEvent::LevelStarted { level: 2 }));
    }

    #[test]
    fn test_last_life_lost_submits_score_and_clears_snapshot() {
        let scores = scores();
        let mut session = session(Box::new(MemoryStorage::new()), &scores);
        let mut now = running(&mut session);

        let answer = oldest_answer(&session).unwrap();
        session.submit_answer(&answer, now);
        now += 1_000;
        session.tick(now, &TickInput::default());
        assert!(load_snapshot(session.storage(), "g1").unwrap().is_some());

        session.state.run.lives = 1;
        let judgement = session.submit_answer("-1", now).unwrap();
        assert!(!judgement.correct);
        assert_eq!(
            session.state().phase,
            GamePhase::GameOver(GameOverReason::LivesExhausted)
        );
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);

        let submitted = &scores.borrow().submitted;
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0],
            ScorePayload {
                game_id: "g1".into(),
                score: 10,
                level: 1,
                time_spent_seconds: 1,
                student_id: "s1".into(),
            }
        );
        assert_eq!(session.last_score_record().map(|r| r.score), Some(10));
    }

    #[test]
    fn test_reload_resumes_without_countdown() {
        let scores = scores();
        let mut first = session(Box::new(MemoryStorage::new()), &scores);
        let now = running(&mut first);
        let now = play_until(&mut first, now, |s| s.state().run.problems_solved_this_level >= 3);
        first.tick(now + 1_000, &TickInput::default());
        let saved = load_snapshot(first.storage(), "g1").unwrap().unwrap();
        assert_eq!(saved.run.score, 30);
        let storage = first.into_storage();

        let mut second = session(storage, &scores);
        let outcome = second.start(now + 5_000, LoadKind::Reload);
        assert_eq!(outcome, StartOutcome::Restored { level: 1, score: 30 });
        assert_eq!(second.state().phase, GamePhase::Running);
        assert_eq!(second.state().run.problems_solved_this_level, 3);
        assert_eq!(second.state().run.lives, saved.run.lives);

        let events = second.tick(now + 5_000, &TickInput::default());
        assert!(events.contains(&GameEvent::ProgressRestored { level: 1, score: 30 }));
        assert_eq!(second.state().pool.len(), 10);
    }

    #[test]
    fn test_level_break_snapshot_resumes_on_next_level() {
        let mut storage = MemoryStorage::new();
        let mut run = RunState::new(&Settings::default(), 3, 4);
        run.problems_solved_this_level = run.target_problems_per_level;
        run.score = 300;
        save_snapshot(
            &mut storage,
            "g1",
            &PersistedSnapshot::new("multiplication", &run, false, 0),
        )
        .unwrap();

        let mut session = session(Box::new(storage), &scores());
        assert_eq!(
            session.start(0, LoadKind::Reload),
            StartOutcome::Restored { level: 4, score: 300 }
        );
        assert_eq!(session.state().run.problems_solved_this_level, 0);
    }

    #[test]
    fn test_navigation_and_final_snapshots_start_fresh() {
        let run = RunState::new(&Settings::default(), 3, 3);
        let live = PersistedSnapshot::new("multiplication", &run, false, 0);
        let over = PersistedSnapshot::new("multiplication", &run, true, 0);
        let mut left = live.clone();
        left.has_left_game = true;
        let other_topic = PersistedSnapshot::new("division", &run, false, 0);

        let cases = [
            (live, LoadKind::Navigation),
            (over, LoadKind::Reload),
            (left, LoadKind::Reload),
            (other_topic, LoadKind::Reload),
        ];
        for (snapshot, load) in cases {
            let mut storage = MemoryStorage::new();
            save_snapshot(&mut storage, "g1", &snapshot).unwrap();
            let mut session = session(Box::new(storage), &scores());
            assert!(matches!(
                session.start(0, load),
                StartOutcome::Fresh { level: 1, .. }
            ));
            assert_eq!(session.state().phase, GamePhase::Idle);
            assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);
        }
    }

    #[test]
    fn test_unreadable_snapshot_starts_fresh() {
        let mut storage = MemoryStorage::new();
        storage.set(&persistence::snapshot_key("g1"), "{not json").unwrap();
        let mut session = session(Box::new(storage), &scores());
        assert!(matches!(
            session.start(0, LoadKind::Reload),
            StartOutcome::Fresh { .. }
        ));
    }

    #[test]
    fn test_unlock_merges_remote_and_local() {
        let scores = Rc::new(RefCell::new(ScoreLog {
            unlocked: Some(4),
            ..Default::default()
        }));
        let mut storage = MemoryStorage::new();
        persistence::raise_unlocked_level(&mut storage, "g1", 2).unwrap();
        let mut config = config();
        config.start_level = 9;
        let mut session = Session::new(
            config.clone(),
            shared_supply(),
            Box::new(storage),
            Box::new(Recorder(scores.clone())),
        );
        assert_eq!(
            session.start(0, LoadKind::Navigation),
            StartOutcome::Fresh {
                level: 4,
                unlocked_level: 4
            }
        );
        assert_eq!(load_unlocked_level(session.storage(), "g1"), 4);

        // Remote down: the local mark still counts
        scores.borrow_mut().unlocked = None;
        let storage = session.into_storage();
        let mut session = Session::new(config, shared_supply(), storage, Box::new(Recorder(scores)));
        assert_eq!(
            session.start(0, LoadKind::Navigation),
            StartOutcome::Fresh {
                level: 4,
                unlocked_level: 4
            }
        );
    }

    #[test]
    fn test_storage_failure_degrades_to_in_memory() {
        let storage = Brittle {
            inner: MemoryStorage::new(),
            fail_set: true,
            fail_remove: false,
        };
        let mut session = session(Box::new(storage), &scores());
        let now = running(&mut session);
        let now = play_until(&mut session, now, |s| s.state().run.problems_solved_this_level >= 2);
        session.tick(now + 1_000, &TickInput::default());

        assert!(session.is_persistence_degraded());
        assert_eq!(session.state().phase, GamePhase::Running);
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);

        play_until(&mut session, now + 1_000, |s| s.state().phase == GamePhase::LevelComplete);
        assert_eq!(session.state().phase, GamePhase::LevelComplete);
    }

    #[test]
    fn test_exit_clears_snapshot() {
        let scores = scores();
        let mut session = session(Box::new(MemoryStorage::new()), &scores);
        let mut now = running(&mut session);
        let answer = oldest_answer(&session).unwrap();
        session.submit_answer(&answer, now);
        now += 1_000;
        session.tick(now, &TickInput::default());
        assert!(load_snapshot(session.storage(), "g1").unwrap().is_some());

        let events = session.exit(now);
        assert!(events.contains(&GameEvent::RunEnded {
            phase: GamePhase::GameOver(GameOverReason::PlayerExit)
        }));
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);
        assert!(!session.state().watchdog.is_armed());
        assert_eq!(scores.borrow().submitted.len(), 1);

        // Exiting again changes nothing
        assert!(session.exit(now + TICK_MS).is_empty());
        assert_eq!(scores.borrow().submitted.len(), 1);
    }

    #[test]
    fn test_exit_writes_marker_when_clear_fails() {
        let storage = Brittle {
            inner: MemoryStorage::new(),
            fail_set: false,
            fail_remove: true,
        };
        let scores = scores();
        let mut session = session(Box::new(storage), &scores);
        let mut now = running(&mut session);
        let answer = oldest_answer(&session).unwrap();
        session.submit_answer(&answer, now);
        now += 1_000;
        session.tick(now, &TickInput::default());

        session.exit(now);
        let marker = load_snapshot(session.storage(), "g1").unwrap().unwrap();
        assert!(marker.has_left_game);
        assert!(marker.is_final());

        let storage = session.into_storage();
        let mut next = Session::new(config(), shared_supply(), storage, Box::new(Recorder(scores)));
        assert!(matches!(
            next.start(now, LoadKind::Reload),
            StartOutcome::Fresh { .. }
        ));
    }

    #[test]
    fn test_failed_submission_is_retried_on_next_start() {
        let scores = Rc::new(RefCell::new(ScoreLog {
            fail: true,
            ..Default::default()
        }));
        let mut session = session(Box::new(MemoryStorage::new()), &scores);
        let now = running(&mut session);
        session.exit(now);
        assert_eq!(
            session.state().phase,
            GamePhase::GameOver(GameOverReason::PlayerExit)
        );
        assert!(scores.borrow().submitted.is_empty());
        assert_eq!(PendingScores::load(session.storage()).len(), 1);

        scores.borrow_mut().fail = false;
        let storage = session.into_storage();
        let mut next = Session::new(config(), shared_supply(), storage, Box::new(Recorder(scores.clone())));
        next.start(now, LoadKind::Navigation);
        assert_eq!(scores.borrow().submitted.len(), 1);
        assert!(PendingScores::load(next.storage()).is_empty());
    }

    #[test]
    fn test_sessions_share_one_supply() {
        let supply = shared_supply();
        let scores = scores();
        let mut a = Session::new(
            config(),
            supply.clone(),
            Box::new(MemoryStorage::new()),
            Box::new(Recorder(scores.clone())),
        );
        let mut config_b = config();
        config_b.game_id = "g2".into();
        config_b.topic = "division".into();
        let mut b = Session::new(
            config_b,
            supply.clone(),
            Box::new(MemoryStorage::new()),
            Box::new(Recorder(scores.clone())),
        );

        a.start(0, LoadKind::Reload);
        b.start(0, LoadKind::Reload);
        assert!(a.is_fetching());
        assert!(!b.is_fetching());
        assert_eq!(b.state().freshness, PoolFreshness::Stale);

        a.tick(TICK_MS, &TickInput::default());
        b.tick(TICK_MS, &TickInput::default());
        assert_eq!(a.state().pool.len(), 10);
        assert!(b.is_fetching());

        b.tick(2 * TICK_MS, &TickInput::default());
        assert_eq!(b.state().pool.len(), 10);
        assert_eq!(b.state().freshness, PoolFreshness::Fresh);

        // A dropped session gives its claim back
        {
            let mut c = Session::new(
                config(),
                supply.clone(),
                Box::new(MemoryStorage::new()),
                Box::new(Recorder(scores)),
            );
            c.start(0, LoadKind::Navigation);
            assert!(supply.borrow().is_generating());
        }
        assert!(!supply.borrow().is_generating());
    }

    #[test]
    fn test_restore_while_supply_busy_waits_for_batch() {
        let supply = shared_supply();
        let held = supply.borrow_mut().begin_fetch("division", 1).unwrap();

        let mut storage = MemoryStorage::new();
        let mut run = RunState::new(&Settings::default(), 1, 1);
        run.problems_solved_this_level = 3;
        run.score = 30;
        save_snapshot(
            &mut storage,
            "g1",
            &PersistedSnapshot::new("multiplication", &run, false, 0),
        )
        .unwrap();

        let scores = scores();
        let mut session = Session::new(config(), supply.clone(), Box::new(storage), Box::new(Recorder(scores)));
        assert_eq!(
            session.start(0, LoadKind::Reload),
            StartOutcome::Restored { level: 1, score: 30 }
        );
        assert!(!session.is_fetching());

        let events = session.tick(TICK_MS, &TickInput::default());
        assert_eq!(session.state().phase, GamePhase::Running);
        assert_eq!(session.state().run.problems_solved_this_level, 3);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, GameEvent::LevelCompleted { .. }))
        );
        assert_eq!(load_unlocked_level(session.storage(), "g1"), 1);

        supply.borrow_mut().cancel_fetch(held);
        session.tick(2 * TICK_MS, &TickInput::default());
        assert!(session.is_fetching());
        session.tick(3 * TICK_MS, &TickInput::default());
        assert_eq!(session.state().pool.len(), 10);
        assert!(!session.state().items.is_empty());
        assert_eq!(session.state().phase, GamePhase::Running);
    }

    #[test]
    fn test_winning_final_level_submits_and_clears_snapshot() {
        let scores = scores();
        scores.borrow_mut().unlocked = Some(MAX_LEVEL);
        let config = SessionConfig {
            start_level: MAX_LEVEL,
            ..config()
        };
        let mut session = Session::new(
            config,
            shared_supply(),
            Box::new(MemoryStorage::new()),
            Box::new(Recorder(scores.clone())),
        );
        assert_eq!(
            session.start(0, LoadKind::Navigation),
            StartOutcome::Fresh {
                level: MAX_LEVEL,
                unlocked_level: MAX_LEVEL
            }
        );
        session.tick(0, &TickInput::default());
        session.tick(COUNTDOWN_MS, &TickInput::default());
        play_until(&mut session, COUNTDOWN_MS, |s| s.state().phase.is_terminal());

        assert_eq!(session.state().phase, GamePhase::GameWon);
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);

        let submitted = &scores.borrow().submitted;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].game_id, "g1");
        assert_eq!(submitted[0].student_id, "s1");
        assert_eq!(submitted[0].level, MAX_LEVEL);
        assert_eq!(
            submitted[0].score,
            POINTS_PER_LEVEL * u64::from(MAX_LEVEL) * u64::from(TARGET_PROBLEMS_PER_LEVEL)
        );
        assert!(session.last_score_record().is_some());
    }

    #[test]
    fn test_finish_at_level_break_queues_score_when_offline() {
        let scores = scores();
        let mut session = session(Box::new(MemoryStorage::new()), &scores);
        let now = running(&mut session);
        let now = play_until(&mut session, now, |s| s.state().phase == GamePhase::LevelComplete);
        assert_eq!(session.state().phase, GamePhase::LevelComplete);

        scores.borrow_mut().fail = true;
        assert!(session.finish_after_level(now));
        assert!(!session.finish_after_level(now));
        assert_eq!(
            session.state().phase,
            GamePhase::GameOver(GameOverReason::PlayerExit)
        );
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);
        assert!(scores.borrow().submitted.is_empty());
        assert!(session.last_score_record().is_none());

        let pending = PendingScores::load(session.storage());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.entries[0].level, 1);
        assert_eq!(pending.entries[0].score, 100);
    }

    #[test]
    fn test_pause_flushes_pending_snapshot() {
        let mut session = session(Box::new(MemoryStorage::new()), &scores());
        let now = running(&mut session);
        let answer = oldest_answer(&session).unwrap();
        session.submit_answer(&answer, now);
        assert_eq!(load_snapshot(session.storage(), "g1").unwrap(), None);

        session.pause(now + 10);
        assert!(session.state().is_paused());
        let snapshot = load_snapshot(session.storage(), "g1").unwrap().unwrap();
        assert_eq!(snapshot.run.score, 10);
    }
}

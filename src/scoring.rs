//! Score submission and the pending-score queue
//!
//! Submissions that fail are kept in a bounded queue in the durable store and
//! retried later. The player's terminal screen never waits on this.

use serde::{Deserialize, Serialize};

use crate::error::ScoreError;
use crate::persistence::Storage;

/// Maximum number of queued submissions to keep
pub const MAX_PENDING_SCORES: usize = 50;

/// Result of a finished run, as sent to the score service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    pub game_id: String,
    pub score: u64,
    pub level: u32,
    pub time_spent_seconds: u64,
    pub student_id: String,
}

/// Record the score service hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: String,
    pub score: u64,
}

/// Remote score collaborator
pub trait ScoreBackend {
    /// Persist a finished run's score
    fn submit_score(&mut self, payload: &ScorePayload) -> Result<ScoreRecord, ScoreError>;

    /// Highest level the student has unlocked for this game
    fn highest_unlocked_level(&mut self, game_id: &str, student_id: &str) -> Result<u32, ScoreError>;
}

/// Backend for offline play: every call fails transiently
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

impl ScoreBackend for OfflineBackend {
    fn submit_score(&mut self, _payload: &ScorePayload) -> Result<ScoreRecord, ScoreError> {
        Err(ScoreError::Transient("offline".to_string()))
    }

    fn highest_unlocked_level(&mut self, _game_id: &str, _student_id: &str) -> Result<u32, ScoreError> {
        Err(ScoreError::Transient("offline".to_string()))
    }
}

/// Unlocked level from the backend, 1 on any error
pub fn remote_unlocked_level(backend: &mut dyn ScoreBackend, game_id: &str, student_id: &str) -> u32 {
    match backend.highest_unlocked_level(game_id, student_id) {
        Ok(level) => level.max(1),
        Err(e) => {
            log::warn!("Unlock query failed ({}), assuming level 1", e);
            1
        }
    }
}

/// Submissions waiting for a retry (oldest first)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PendingScores {
    pub entries: Vec<ScorePayload>,
}

impl PendingScores {
    /// Storage key
    const STORAGE_KEY: &'static str = "mathfall_pending_scores";

    /// Create empty queue
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Queue a payload, dropping the oldest once full
    pub fn enqueue(&mut self, payload: ScorePayload) {
        self.entries.push(payload);
        if self.entries.len() > MAX_PENDING_SCORES {
            let overflow = self.entries.len() - MAX_PENDING_SCORES;
            self.entries.drain(..overflow);
            log::warn!("Pending score queue full, dropped {} oldest", overflow);
        }
    }

    /// Retry every queued payload in order; failures stay queued.
    /// Returns how many went through.
    pub fn flush(&mut self, backend: &mut dyn ScoreBackend) -> usize {
        let mut sent = 0;
        let mut kept = Vec::new();
        for payload in self.entries.drain(..) {
            match backend.submit_score(&payload) {
                Ok(_) => sent += 1,
                Err(e) => {
                    log::debug!("Pending score for {} still failing: {}", payload.game_id, e);
                    kept.push(payload);
                }
            }
        }
        self.entries = kept;
        if sent > 0 {
            log::info!("Flushed {} pending scores ({} left)", sent, self.entries.len());
        }
        sent
    }

    /// Load the queue from the durable store; empty on any failure
    pub fn load(storage: &dyn Storage) -> Self {
        match storage.get(Self::STORAGE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<PendingScores>(&json) {
                Ok(queue) => {
                    log::info!("Loaded {} pending scores", queue.entries.len());
                    return queue;
                }
                Err(e) => log::warn!("Ignoring unreadable pending scores: {}", e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Pending scores unavailable: {}", e),
        }
        Self::new()
    }

    /// Save the queue (best effort)
    pub fn save(&self, storage: &mut dyn Storage) {
        let result = if self.entries.is_empty() {
            storage.remove(Self::STORAGE_KEY)
        } else {
            match serde_json::to_string(self) {
                Ok(json) => storage.set(Self::STORAGE_KEY, &json),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            log::warn!("Pending scores not saved: {}", e);
        }
    }
}

/// Submit a payload; on failure queue it in the durable store.
/// Returns the record when the service accepted it.
pub fn submit_or_queue(
    backend: &mut dyn ScoreBackend,
    storage: &mut dyn Storage,
    payload: ScorePayload,
) -> Option<ScoreRecord> {
    match backend.submit_score(&payload) {
        Ok(record) => {
            log::info!("Score {} submitted for {}", payload.score, payload.game_id);
            Some(record)
        }
        Err(e) => {
            log::warn!("Score submission failed ({}), queued for retry", e);
            let mut pending = PendingScores::load(storage);
            pending.enqueue(payload);
            pending.save(storage);
            None
        }
    }
}

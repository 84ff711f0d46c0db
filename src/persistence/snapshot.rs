//! Run snapshots and the unlock high-water mark

use serde::{Deserialize, Serialize};

use super::storage::Storage;
use crate::error::StorageError;
use crate::sim::RunState;

/// Bump when the snapshot layout changes; older snapshots are discarded
pub const SNAPSHOT_VERSION: u32 = 1;

/// Key for a game instance's run snapshot
pub fn snapshot_key(game_id: &str) -> String {
    format!("mathfall_run_{}", game_id)
}

/// Key for a game instance's unlocked level (outlives runs)
pub fn unlock_key(game_id: &str) -> String {
    format!("mathfall_unlocked_{}", game_id)
}

/// Restorable copy of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub version: u32,
    pub topic: String,
    pub run: RunState,
    pub game_over: bool,
    pub has_left_game: bool,
    pub last_saved_at: u64,
}

impl PersistedSnapshot {
    pub fn new(topic: &str, run: &RunState, game_over: bool, now_ms: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            topic: topic.to_string(),
            run: run.clone(),
            game_over,
            has_left_game: false,
            last_saved_at: now_ms,
        }
    }

    /// A snapshot that must never be resumed
    pub fn is_final(&self) -> bool {
        self.game_over || self.has_left_game || self.version != SNAPSHOT_VERSION
    }
}

pub fn save_snapshot(
    storage: &mut dyn Storage,
    game_id: &str,
    snapshot: &PersistedSnapshot,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(snapshot)?;
    storage.set(&snapshot_key(game_id), &json)
}

/// Read a snapshot; a corrupt one is reported as an error, not a panic
pub fn load_snapshot(storage: &dyn Storage, game_id: &str) -> Result<Option<PersistedSnapshot>, StorageError> {
    match storage.get(&snapshot_key(game_id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn clear_snapshot(storage: &mut dyn Storage, game_id: &str) -> Result<(), StorageError> {
    storage.remove(&snapshot_key(game_id))
}

/// Stored unlocked level, 1 when absent or unreadable
pub fn load_unlocked_level(storage: &dyn Storage, game_id: &str) -> u32 {
    match storage.get(&unlock_key(game_id)) {
        Ok(Some(value)) => value.trim().parse::<u32>().unwrap_or(1).max(1),
        Ok(None) => 1,
        Err(e) => {
            log::warn!("Unlock mark unreadable: {}", e);
            1
        }
    }
}

/// Raise the stored unlocked level; never lowers it. Returns the stored value.
pub fn raise_unlocked_level(storage: &mut dyn Storage, game_id: &str, level: u32) -> Result<u32, StorageError> {
    let current = load_unlocked_level(storage, game_id);
    if level <= current {
        return Ok(current);
    }
    storage.set(&unlock_key(game_id), &level.to_string())?;
    log::info!("Unlocked level {} for {}", level, game_id);
    Ok(level)
}

/// Coalesces snapshot writes: the first change opens a window, the write
/// happens once the window has elapsed
#[derive(Debug, Clone)]
pub struct SnapshotDebouncer {
    window_ms: u64,
    dirty_since: Option<u64>,
}

impl SnapshotDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            dirty_since: None,
        }
    }

    pub fn mark_dirty(&mut self, now_ms: u64) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(now_ms);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// True when a write is due; clears the dirty state
    pub fn take_due(&mut self, now_ms: u64) -> bool {
        match self.dirty_since {
            Some(since) if now_ms.saturating_sub(since) >= self.window_ms => {
                self.dirty_since = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.dirty_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use crate::settings::Settings;
    use proptest::prelude::*;

    #[test]
    fn test_snapshot_save_load_clear() {
        let mut storage = MemoryStorage::new();
        let run = RunState::new(&Settings::default(), 2, 3);
        let snapshot = PersistedSnapshot::new("addition", &run, false, 42);
        save_snapshot(&mut storage, "g1", &snapshot).unwrap();

        assert_eq!(load_snapshot(&storage, "g1").unwrap(), Some(snapshot));
        assert_eq!(load_snapshot(&storage, "g2").unwrap(), None);

        clear_snapshot(&mut storage, "g1").unwrap();
        assert_eq!(load_snapshot(&storage, "g1").unwrap(), None);
    }

    #[test]
    fn test_snapshot_uses_camel_case_fields() {
        let run = RunState::new(&Settings::default(), 1, 1);
        let json = serde_json::to_string(&PersistedSnapshot::new("x", &run, true, 0)).unwrap();
        assert!(json.contains("\"gameOver\":true"));
        assert!(json.contains("\"hasLeftGame\":false"));
        assert!(json.contains("\"lastSavedAt\""));
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let mut storage = MemoryStorage::new();
        storage.set(&snapshot_key("g"), "{\"version\":").unwrap();
        assert!(matches!(
            load_snapshot(&storage, "g"),
            Err(StorageError::Serde(_))
        ));
    }

    #[test]
    fn test_unlock_only_rises() {
        let mut storage = MemoryStorage::new();
        assert_eq!(load_unlocked_level(&storage, "g"), 1);
        assert_eq!(raise_unlocked_level(&mut storage, "g", 4).unwrap(), 4);
        assert_eq!(raise_unlocked_level(&mut storage, "g", 2).unwrap(), 4);
        assert_eq!(load_unlocked_level(&storage, "g"), 4);
        assert_eq!(load_unlocked_level(&storage, "other"), 1);
    }

    #[test]
    fn test_debouncer_coalesces() {
        let mut debouncer = SnapshotDebouncer::new(500);
        assert!(!debouncer.take_due(0));
        debouncer.mark_dirty(100);
        debouncer.mark_dirty(300);
        assert!(!debouncer.take_due(599));
        assert!(debouncer.take_due(600));
        assert!(!debouncer.is_dirty());
    }

    fn arb_run() -> impl Strategy<Value = RunState> {
        (
            any::<u32>(),
            0u8..=3,
            1u32..=10,
            0u32..10,
            1u32..20,
            any::<u32>(),
            1u32..=10,
        )
            .prop_map(|(score, lives, level, solved, target, elapsed, unlocked)| RunState {
                score: u64::from(score),
                lives,
                current_level: level,
                problems_solved_this_level: solved,
                target_problems_per_level: target,
                elapsed_ms: u64::from(elapsed),
                unlocked_level: unlocked,
            })
    }

    proptest! {
        #[test]
        fn prop_snapshot_round_trip(run in arb_run(), topic in "[a-z ]{1,20}", saved_at in any::<u32>()) {
            let mut storage = MemoryStorage::new();
            let snapshot = PersistedSnapshot::new(&topic, &run, false, u64::from(saved_at));
            save_snapshot(&mut storage, "game", &snapshot).unwrap();
            let loaded = load_snapshot(&storage, "game").unwrap().unwrap();
            prop_assert_eq!(&loaded.run, &run);
            prop_assert_eq!(&loaded.topic, &topic);
            prop_assert!(!loaded.is_final());
        }
    }
}

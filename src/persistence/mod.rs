//! Save/load persistence
//!
//! Features:
//! - Pluggable key/value store (memory, file, LocalStorage)
//! - Versioned JSON run snapshots keyed per game instance
//! - Debounced snapshot writes
//! - Unlocked-level high-water mark that outlives individual runs

pub mod snapshot;
pub mod storage;

pub use snapshot::{
    PersistedSnapshot, SNAPSHOT_VERSION, SnapshotDebouncer, clear_snapshot, load_snapshot,
    load_unlocked_level, raise_unlocked_level, save_snapshot, snapshot_key, unlock_key,
};
#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStorage;
#[cfg(target_arch = "wasm32")]
pub use storage::LocalStorage;
pub use storage::{MemoryStorage, Storage};

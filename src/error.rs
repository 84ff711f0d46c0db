//! Error types for the collaborator seams
//!
//! None of these reach the player. Each one is downgraded at the component
//! boundary: supply errors fall back to local generation, score errors land in
//! the pending queue, storage errors switch snapshotting off.

use thiserror::Error;

/// Problem Supply refused to start a fetch
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupplyError {
    #[error("a problem batch is already being generated")]
    AlreadyGenerating,
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("level {0} is outside the playable range")]
    LevelOutOfRange(u32),
}

/// The external problem generator failed or was not consulted
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator call budget exhausted for the current window")]
    RateLimited,
    #[error("no external generator configured")]
    Unavailable,
    #[error("generator transport failed: {0}")]
    Transport(String),
    #[error("generator response unusable: {0}")]
    Malformed(String),
}

/// Durable key/value store failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable")]
    Unavailable,
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage backend rejected the write: {0}")]
    Rejected(String),
}

/// Score collaborator failure
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("score service temporarily unreachable: {0}")]
    Transient(String),
    #[error("score service rejected the request: {0}")]
    Rejected(String),
}

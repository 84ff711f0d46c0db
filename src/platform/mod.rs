//! Platform abstraction layer
//!
//! Handles browser/native differences for:
//! - Wall clock
//! - Logger setup
//! - Durable storage (LocalStorage on web, a JSON file on native)

use crate::persistence::Storage;

/// Milliseconds since the Unix epoch
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

/// Milliseconds since the Unix epoch
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Install the logger. Safe to call more than once.
#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::debug!("Logger already installed");
    }
}

/// Install the logger. Safe to call more than once.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Store used when the host doesn't supply one
#[cfg(target_arch = "wasm32")]
pub fn default_storage() -> Box<dyn Storage> {
    Box::new(crate::persistence::LocalStorage)
}

/// Store used when the host doesn't supply one. Falls back to memory if the
/// file can't be opened.
#[cfg(not(target_arch = "wasm32"))]
pub fn default_storage() -> Box<dyn Storage> {
    let path = std::env::temp_dir().join("mathfall").join("store.json");
    match crate::persistence::FileStorage::open(&path) {
        Ok(storage) => Box::new(storage),
        Err(e) => {
            log::warn!("Store {} unavailable ({}), using memory", path.display(), e);
            Box::new(crate::persistence::MemoryStorage::new())
        }
    }
}

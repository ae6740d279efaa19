//! Shared test helpers.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that touch process-wide state (the log sink, the
/// current-task slot, boot mode, forks).
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

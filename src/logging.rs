//! The boot log: timestamped lines buffered in memory until the log
//! filesystem is writable, then appended to the configured log file.
//!
//! Early in boot nothing under `/var` is guaranteed writable, so every line
//! goes into a memory ring first. `finalise` flushes the ring to disk and
//! switches the sink to direct appends. `tracing` is used for console
//! diagnostics; this sink is the persistent system log.

use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::{clock, constants::DEFAULT_LOG_FILE};

struct LogState {
    enabled: bool,
    in_memory: bool,
    buffer: String,
    path: PathBuf,
    warned_unwritable: bool,
}

static LOG: OnceLock<Mutex<LogState>> = OnceLock::new();

fn lock() -> std::sync::MutexGuard<'static, LogState> {
    LOG.get_or_init(|| {
        Mutex::new(LogState {
            enabled: true,
            in_memory: true,
            buffer: String::new(),
            path: PathBuf::new(),
            warned_unwritable: false,
        })
    })
    .lock()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Installs the `tracing` console subscriber. Called once by the binary.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Points the sink at a log file other than the default.
pub fn set_log_file(path: &str) {
    lock().path = PathBuf::from(path);
}

/// Enables or disables the sink entirely. Shutdown disables it so teardown
/// noise cannot land on a filesystem being unmounted.
pub fn set_enabled(enabled: bool) {
    lock().enabled = enabled;
}

pub fn enabled() -> bool {
    lock().enabled
}

/// Appends one timestamped line. Buffers in memory until `finalise` has run.
pub fn write_line(message: &str) {
    let mut state = lock();
    if !state.enabled {
        return;
    }
    let line = format!("{} {}\n", clock::log_stamp(), message);
    if state.in_memory {
        state.buffer.push_str(&line);
        return;
    }
    let path = if state.path.as_os_str().is_empty() {
        PathBuf::from(DEFAULT_LOG_FILE)
    } else {
        state.path.clone()
    };
    let opened = OpenOptions::new().create(true).append(true).open(&path);
    match opened {
        Ok(mut file) => {
            let _ = file.write_all(line.as_bytes());
        }
        Err(err) => {
            if !state.warned_unwritable {
                state.warned_unwritable = true;
                warn!("cannot write to log file {}: {err}", path.display());
            }
        }
    }
}

/// Flushes the memory buffer to disk and switches to direct appends.
/// `blank` truncates the log first (the `BlankLogOnBoot` option).
pub fn finalise(blank: bool) {
    let mut state = lock();
    if !state.in_memory {
        return;
    }
    state.in_memory = false;
    let buffered = std::mem::take(&mut state.buffer);
    if !state.enabled {
        return;
    }
    let path = if state.path.as_os_str().is_empty() {
        PathBuf::from(DEFAULT_LOG_FILE)
    } else {
        state.path.clone()
    };
    let opened = OpenOptions::new()
        .create(true)
        .append(!blank)
        .write(true)
        .truncate(blank)
        .open(&path);
    match opened {
        Ok(mut file) => {
            let _ = file.write_all(buffered.as_bytes());
        }
        Err(err) => {
            warn!("cannot record boot log to disk, disabling logging: {err}");
            state.enabled = false;
        }
    }
}

/// Returns the sink to its boot state. Test hook.
#[doc(hidden)]
pub fn reset_for_tests() {
    let mut state = lock();
    state.enabled = true;
    state.in_memory = true;
    state.buffer.clear();
    state.path = PathBuf::new();
    state.warned_unwritable = false;
}

/// Snapshot of the in-memory buffer. Test hook.
#[doc(hidden)]
pub fn memory_contents() -> String {
    lock().buffer.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_lines_flush_to_disk() {
        let _guard = crate::test_utils::env_lock();
        reset_for_tests();

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("system.log");
        set_log_file(path.to_str().expect("utf8 path"));

        write_line("first line");
        write_line("second line");
        assert!(memory_contents().contains("first line"));
        assert!(!path.exists());

        finalise(false);
        let on_disk = std::fs::read_to_string(&path).expect("read log");
        assert!(on_disk.contains("first line"));
        assert!(on_disk.contains("second line"));

        // After finalise, writes go straight to the file.
        write_line("third line");
        let on_disk = std::fs::read_to_string(&path).expect("read log");
        assert!(on_disk.contains("third line"));
    }

    #[test]
    fn blank_on_boot_truncates() {
        let _guard = crate::test_utils::env_lock();
        reset_for_tests();

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("system.log");
        std::fs::write(&path, "stale contents\n").expect("seed log");
        set_log_file(path.to_str().expect("utf8 path"));

        write_line("fresh boot");
        finalise(true);

        let on_disk = std::fs::read_to_string(&path).expect("read log");
        assert!(!on_disk.contains("stale contents"));
        assert!(on_disk.contains("fresh boot"));
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let _guard = crate::test_utils::env_lock();
        reset_for_tests();

        set_enabled(false);
        write_line("should vanish");
        assert!(memory_contents().is_empty());
        set_enabled(true);
    }
}

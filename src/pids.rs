//! PID discovery and liveness checks.
//!
//! Guessed PIDs from the executor are only a starting point; whenever /proc
//! is mounted the authoritative answer comes from matching an object's start
//! command against `/proc/<pid>/cmdline`.

use std::{fs, path::Path};

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

use crate::object::Object;

/// True when /proc is mounted and readable.
pub fn proc_available() -> bool {
    Path::new("/proc/self").exists()
}

/// Reads the object's pidfile: leading whitespace is skipped, then the
/// leading run of digits is taken. Anything unparseable yields zero.
pub fn read_pidfile(obj: &Object) -> u32 {
    let Some(path) = &obj.pidfile else {
        return 0;
    };
    let Ok(contents) = fs::read_to_string(path) else {
        return 0;
    };
    let trimmed = contents.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or(0)
}

/// Liveness probe for whatever PID we have on record. Reads the pidfile when
/// one is configured, otherwise uses the tracked PID. Signal 0 asks the
/// kernel whether the process exists without delivering anything.
pub fn object_process_running(obj: &Object) -> bool {
    let mut pid = 0;
    if obj.pidfile.is_some() {
        pid = read_pidfile(obj);
    }
    if pid == 0 {
        pid = obj.pid;
    }
    if pid == 0 {
        return false;
    }
    pid_alive(pid)
}

/// `kill(pid, 0)` liveness check.
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Scans `/proc/<pid>/cmdline` for the object's start command and returns the
/// matching PID, optionally updating the object's tracked PID.
///
/// Only PIDs at or above the currently tracked one are considered, the start
/// command is stripped of trailing `&`, `;`, and whitespace, and cmdline NULs
/// are treated as spaces before the prefix comparison.
pub fn advanced_pid_find(obj: &mut Object, update: bool) -> u32 {
    let Some(start_cmd) = &obj.start_cmd else {
        return 0;
    };
    let needle = start_cmd
        .trim_end_matches(|c| c == ' ' || c == '\t' || c == '&' || c == ';')
        .to_string();
    if needle.is_empty() {
        return 0;
    }

    let Ok(entries) = fs::read_dir("/proc") else {
        return 0;
    };
    let mut candidates: Vec<u32> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
        .filter(|pid| *pid >= obj.pid)
        .collect();
    candidates.sort_unstable();

    for pid in candidates {
        let Ok(raw) = fs::read(format!("/proc/{pid}/cmdline")) else {
            continue;
        };
        let cmdline: String = raw
            .iter()
            .map(|&b| if b == 0 { ' ' } else { b as char })
            .collect();
        if cmdline.starts_with(&needle) {
            if update {
                obj.pid = pid;
            }
            return pid;
        }
    }
    0
}

/// Blocks (poll + short sleep) until the given path exists or the deadline
/// passes or `abort` reads true. Used for pidfile appearance after a start.
pub fn wait_for_path(
    path: &Path,
    timeout_secs: u32,
    abort: &std::sync::atomic::AtomicBool,
) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs as u64);
    while std::time::Instant::now() < deadline {
        if abort.load(std::sync::atomic::Ordering::SeqCst) {
            return false;
        }
        if path.exists() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_micros(100));
    }
    path.exists()
}

/// Non-blocking zombie reap used both by the primary loop and by stop waits
/// that occupy the loop's place.
pub fn reap_zombies() {
    use nix::sys::wait::{WaitPidFlag, waitpid};
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(status) if status.pid().is_some() => continue,
            Ok(_) => break,
            Err(Errno::ECHILD) => break,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn obj_with_pidfile(contents: &[u8]) -> (Object, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("svc.pid");
        let mut file = std::fs::File::create(&path).expect("create pidfile");
        file.write_all(contents).expect("write pidfile");
        let mut obj = Object::new("svc", Path::new("/tmp/c"));
        obj.pidfile = Some(path);
        (obj, dir)
    }

    #[test]
    fn read_pidfile_takes_leading_digits() {
        let (obj, _dir) = obj_with_pidfile(b"  \n\t 1234 trailing\n");
        assert_eq!(read_pidfile(&obj), 1234);
    }

    #[test]
    fn read_pidfile_rejects_garbage() {
        let (obj, _dir) = obj_with_pidfile(b"not-a-pid\n");
        assert_eq!(read_pidfile(&obj), 0);

        let mut missing = Object::new("svc", Path::new("/tmp/c"));
        missing.pidfile = Some(PathBuf::from("/nonexistent/svc.pid"));
        assert_eq!(read_pidfile(&missing), 0);

        let no_pidfile = Object::new("svc", Path::new("/tmp/c"));
        assert_eq!(read_pidfile(&no_pidfile), 0);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn running_check_prefers_pidfile() {
        let (mut obj, _dir) = obj_with_pidfile(std::process::id().to_string().as_bytes());
        obj.pid = 0;
        assert!(object_process_running(&obj));

        let mut dead = Object::new("svc", Path::new("/tmp/c"));
        dead.pid = 0;
        assert!(!object_process_running(&dead));
    }

    #[test]
    fn proc_is_available_on_linux() {
        assert!(proc_available());
    }
}

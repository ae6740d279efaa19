//! Primitive operations behind the `killall5` and `wall` applet names.
//!
//! These are also used internally: scheduled halts broadcast through
//! `emul_wall`, and the `KILLALL5` stop-command form calls
//! `emul_killall5`.

use std::{
    fs,
    io::Write,
    path::Path,
};

use tracing::warn;

use crate::{clock, error::Outcome};

/// Reads the audit session id for a process, falling back to the session
/// field of `/proc/<pid>/stat` where the audit pseudo-file is absent.
fn session_id_of(pid: u32) -> Option<String> {
    if let Ok(text) = fs::read_to_string(format!("/proc/{pid}/sessionid")) {
        return Some(text.trim().to_string());
    }
    // stat: pid (comm) state ppid pgrp session ...; comm may contain spaces
    // and parens, so parse from after the last ')'.
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.get(stat.rfind(')')? + 1..)?;
    after_comm.split_whitespace().nth(3).map(str::to_string)
}

/// Signals every process outside our own session, sparing pid 1 and
/// ourselves. The classic pre-shutdown sweep.
pub fn emul_killall5(signal: i32) -> Outcome {
    if signal <= 0 || signal > 64 {
        warn!("killall5: bad signal number {signal}");
        return Outcome::Failure;
    }

    let own_pid = std::process::id();
    let Some(own_session) = session_id_of(own_pid) else {
        warn!("killall5: cannot read our own session id");
        return Outcome::Failure;
    };

    let Ok(entries) = fs::read_dir("/proc") else {
        return Outcome::Failure;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if pid == 1 || pid == own_pid {
            continue;
        }
        // Anything sharing our session must survive so our shell does.
        if session_id_of(pid).as_deref() == Some(own_session.as_str()) {
            continue;
        }
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
    Outcome::Success
}

fn broadcast_to(path: &Path, message: &str) -> bool {
    // Open-for-read first as an existence probe; consoles past the last
    // real tty simply don't exist.
    if fs::File::open(path).is_err() {
        return false;
    }
    if let Ok(mut tty) = fs::OpenOptions::new().write(true).open(path) {
        let _ = tty.write_all(message.as_bytes());
    }
    true
}

/// Writes a timestamped broadcast to every tty and pty. Used for shutdown
/// countdowns and as the `wall` applet.
pub fn emul_wall(message: &str, show_user: bool) {
    let mut text = format!("\x07\n{} ", clock::log_stamp());
    if show_user {
        let user = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| "(unknown)".to_string());
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "(unknown)".to_string());
        text.push_str(&format!("Broadcast message from {user}@{host}: "));
    } else {
        text.push_str("Broadcast message: ");
    }
    text.push_str(&format!("\n{message}\n\n"));

    for index in 1.. {
        if !broadcast_to(Path::new(&format!("/dev/tty{index}")), &text) {
            break;
        }
    }
    for index in 0.. {
        if !broadcast_to(Path::new(&format!("/dev/pts/{index}")), &text) {
            break;
        }
    }
}

//! End-to-end executor behavior with real processes.

mod common;

use std::path::Path;

use epoch::{
    error::Outcome,
    executor::{self, Phase},
    object::{Object, StopMode},
    pids,
};

fn service(id: &str) -> Object {
    let mut obj = Object::new(id, Path::new("/tmp/epoch-test.conf"));
    obj.enabled = Some(true);
    obj.runlevels = vec!["default".to_string()];
    obj
}

#[test]
fn oneshot_start_and_stop_none() {
    let _guard = common::serial_lock();
    let mut obj = service("oneshot");
    obj.start_cmd = Some("/bin/true".to_string());
    obj.stop_mode = StopMode::None;
    obj.opts.no_track = true;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Success);
    assert!(obj.started);
    assert!(obj.started_since > 0);

    assert_eq!(executor::execute(&mut obj, Phase::Stop, &[]), Outcome::Success);
    assert!(!obj.started);
    assert_eq!(obj.pid, 0);
    assert_eq!(obj.started_since, 0);
}

#[test]
fn failing_start_leaves_object_stopped() {
    let _guard = common::serial_lock();
    let mut obj = service("flaky");
    obj.start_cmd = Some("/bin/false".to_string());
    obj.stop_mode = StopMode::None;
    obj.opts.no_track = true;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Failure);
    assert!(!obj.started);
    assert_eq!(obj.started_since, 0);
}

/// Orphaned service processes must reparent to us (as they would to PID 1)
/// so stop waits can reap them.
fn adopt_orphans() {
    unsafe {
        libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1);
    }
}

#[test]
fn forked_service_start_then_stop_via_pid() {
    let _guard = common::serial_lock();
    adopt_orphans();
    let mut obj = service("sleeper");
    // FORK double-forks so the sleep outlives the synchronous wait, then
    // the rediscovery loop pins its real PID.
    obj.start_cmd = Some("sleep 6041".to_string());
    obj.opts.fork = true;
    obj.stop_mode = StopMode::Pid;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Success);
    assert!(obj.started);
    assert_ne!(obj.pid, 0, "cmdline rediscovery should pin the real PID");
    assert!(pids::pid_alive(obj.pid), "tracked PID must be the live sleep");

    let tracked = obj.pid;
    assert_eq!(executor::execute(&mut obj, Phase::Stop, &[]), Outcome::Success);
    assert!(!obj.started);
    assert!(!pids::pid_alive(tracked), "stop must terminate the service");
}

#[test]
fn prestart_failure_downgrades_a_good_start() {
    let _guard = common::serial_lock();
    let mut obj = service("warned");
    obj.prestart_cmd = Some("/bin/false".to_string());
    obj.start_cmd = Some("/bin/true".to_string());
    obj.stop_mode = StopMode::None;
    obj.opts.no_track = true;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Warning);
    assert!(obj.started, "a warning still counts as started");
}

#[test]
fn reload_signal_reaches_the_process() {
    let _guard = common::serial_lock();
    adopt_orphans();
    let mut obj = service("reloadable");
    obj.start_cmd = Some("sleep 6042".to_string());
    obj.opts.fork = true;
    obj.stop_mode = StopMode::Pid;
    obj.reload_signal = libc::SIGTERM;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Success);
    let pid = obj.pid;
    assert!(pids::pid_alive(pid));

    // The reload "signal" here is SIGTERM, so the sleep dies; that proves
    // delivery without needing a signal-handling fixture.
    assert_eq!(executor::execute(&mut obj, Phase::Reload, &[]), Outcome::Success);
    for _ in 0..100 {
        pids::reap_zombies();
        if !pids::pid_alive(pid) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    assert!(!pids::pid_alive(pid));

    obj.mark_stopped();
}

#[test]
fn stop_command_outcome_is_reported() {
    let _guard = common::serial_lock();
    let mut obj = service("cmdstop");
    obj.start_cmd = Some("/bin/true".to_string());
    obj.stop_mode = StopMode::Command;
    obj.stop_cmd = Some("/bin/true".to_string());
    obj.opts.no_track = true;

    assert_eq!(executor::execute(&mut obj, Phase::Start, &[]), Outcome::Success);
    assert_eq!(executor::execute(&mut obj, Phase::Stop, &[]), Outcome::Success);
    assert!(!obj.started);
}

#[test]
fn stopping_a_gone_pid_fails() {
    let _guard = common::serial_lock();
    let mut obj = service("gone");
    obj.stop_mode = StopMode::Pid;
    obj.started = true;
    obj.pid = 0;

    assert_eq!(executor::execute(&mut obj, Phase::Stop, &[]), Outcome::Failure);
}

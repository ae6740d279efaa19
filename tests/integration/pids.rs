//! PID discovery against real processes.

mod common;

use std::{path::Path, process::Command};

use epoch::{object::Object, pids};

fn sleeper(seconds: &str) -> std::process::Child {
    Command::new("sleep")
        .arg(seconds)
        .spawn()
        .expect("spawn sleep")
}

#[test]
fn advanced_pid_find_locates_a_running_command() {
    let _guard = common::serial_lock();
    // An unusual duration so no other process on the host matches.
    let mut child = sleeper("7431");

    let mut obj = Object::new("napper", Path::new("/tmp/epoch-test.conf"));
    obj.start_cmd = Some("sleep 7431".to_string());
    obj.pid = 0;

    let found = pids::advanced_pid_find(&mut obj, true);
    assert_eq!(found, child.id());
    assert_eq!(obj.pid, child.id());

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn advanced_pid_find_trims_shell_droppings() {
    let _guard = common::serial_lock();
    let mut child = sleeper("7432");

    let mut obj = Object::new("napper2", Path::new("/tmp/epoch-test.conf"));
    // A backgrounded shell command still matches the real cmdline.
    obj.start_cmd = Some("sleep 7432 &\t".to_string());
    obj.pid = 0;

    assert_eq!(pids::advanced_pid_find(&mut obj, false), child.id());
    // update=false must leave the object untouched.
    assert_eq!(obj.pid, 0);

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn advanced_pid_find_misses_dead_commands() {
    let _guard = common::serial_lock();
    let mut obj = Object::new("ghost", Path::new("/tmp/epoch-test.conf"));
    obj.start_cmd = Some("sleep 99887766".to_string());
    assert_eq!(pids::advanced_pid_find(&mut obj, true), 0);
    assert_eq!(obj.pid, 0);
}

#[test]
fn liveness_follows_the_pidfile() {
    let _guard = common::serial_lock();
    let mut child = sleeper("7433");
    let dir = tempfile::tempdir().expect("tempdir");
    let pidfile = dir.path().join("napper.pid");
    std::fs::write(&pidfile, format!("{}\n", child.id())).expect("write pidfile");

    let mut obj = Object::new("napper3", Path::new("/tmp/epoch-test.conf"));
    obj.pidfile = Some(pidfile.clone());
    obj.pid = 0;
    assert!(pids::object_process_running(&obj));

    let _ = child.kill();
    let _ = child.wait();
    assert!(!pids::object_process_running(&obj));

    // A garbage pidfile falls back to the (zero) tracked pid.
    std::fs::write(&pidfile, "not a pid").expect("rewrite pidfile");
    assert!(!pids::object_process_running(&obj));
}

//! CLI surface checks that don't need a running init.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn version_prints_banner() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Epoch Init System"));
}

#[test]
fn bare_invocation_shows_help() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("runlevel"))
        .stdout(predicate::str::contains("reexec"))
        .stdout(predicate::str::contains("configreload"));
}

#[test]
fn shutdown_rejects_bad_arguments() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["shutdown", "-x"])
        .assert()
        .failure();
}

#[test]
fn shutdown_help_does_not_touch_the_bus() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["shutdown", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancel a pending shutdown"));
}

#[test]
fn shutdown_accepts_a_wall_clock_time() {
    // A well-formed request parses and reaches the bus connect; with no
    // server it fails there (or at the root check when unprivileged), but
    // never as a syntax rejection.
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["shutdown", "-h", "23:59"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument").not())
        .stderr(predicate::str::contains("Bad time format").not())
        .stderr(
            predicate::str::contains("Failed to connect to membus")
                .or(predicate::str::contains("You are not root")),
        );
}

#[test]
fn shutdown_accepts_a_relative_time() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["shutdown", "-r", "+5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument").not())
        .stderr(
            predicate::str::contains("Failed to connect to membus")
                .or(predicate::str::contains("You are not root")),
        );
}

#[test]
fn setcad_validates_its_argument() {
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["setcad", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Valid values are on and off"));
}

#[test]
fn objrl_validates_the_action() {
    // Validation happens before any membus traffic for obviously bad verbs.
    Command::cargo_bin("epoch")
        .expect("binary")
        .args(["objrl", "sshd", "sing", "default"])
        .assert()
        .failure();
}

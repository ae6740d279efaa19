//! Epoch: a small Linux init system and service supervisor.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// or only in test code.
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
use strum_macros as _;

/// Applet primitives: killall5 and wall.
pub mod applets;

/// Bootup/shutdown orchestration, emergency shell, pivot_root, exec.
pub mod boot;

/// CLI front end for the multi-call binary.
pub mod cli;

/// Client-side membus operations.
pub mod client;

/// Wall-clock helpers.
pub mod clock;

/// Config loading and editing.
pub mod config;

/// Console status reports.
pub mod console;

/// Constants.
pub mod constants;

/// Errors and the tri-valued outcome.
pub mod error;

/// Command execution.
pub mod executor;

/// The boot log sink.
pub mod logging;

/// Shared-memory control channel.
pub mod membus;

/// The object model.
pub mod object;

/// PID discovery and liveness.
pub mod pids;

/// Server-side membus dispatch.
pub mod protocol;

/// Live re-execution.
pub mod reexec;

/// Runlevel transitions.
pub mod runlevel;

/// Signal handlers and flags.
pub mod signals;

/// The object store.
pub mod store;

/// The primary loop.
pub mod supervisor;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;

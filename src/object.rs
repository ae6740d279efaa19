//! The object model: every unit of work epoch supervises.
//!
//! An object is a service, a one-shot command, a mount, a pivot-root, or an
//! exec-replacement, described declaratively and ordered by integer
//! priorities within runlevels.

use std::path::PathBuf;

use strum::{Display, EnumString};

use crate::{
    constants::{MAX_EXIT_MAPPINGS, RESTART_FLOOR_SECS, STOP_TIMEOUT_SECS},
    error::Outcome,
};

/// How an object is brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum StopMode {
    /// Nothing to do; mark it stopped.
    None,
    /// Run the configured stop command.
    #[default]
    Command,
    /// Signal the tracked PID.
    Pid,
    /// Signal the PID read from the pidfile.
    PidFile,
}

impl StopMode {
    /// Wire encoding used by the LSOBJS status frame.
    pub fn wire_byte(self) -> u8 {
        match self {
            StopMode::None => 0,
            StopMode::Command => 1,
            StopMode::Pid => 2,
            StopMode::PidFile => 3,
        }
    }

    pub fn from_wire_byte(byte: u8) -> Option<StopMode> {
        match byte {
            0 => Some(StopMode::None),
            1 => Some(StopMode::Command),
            2 => Some(StopMode::Pid),
            3 => Some(StopMode::PidFile),
            _ => None,
        }
    }
}

/// One user-defined exit-status override, applied to start commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitMapEntry {
    /// The raw exit status to match.
    pub exit_status: u8,
    /// What that status means for this object.
    pub value: Outcome,
}

/// Option flags from `ObjectOptions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectOptions {
    /// Run only the stop command, at shutdown.
    pub halt_only: bool,
    /// Not stopped on runlevel switches.
    pub persistent: bool,
    /// Auto-disable after one successful start.
    pub run_once: bool,
    /// A failed start drops to the emergency shell during boot.
    pub start_fail_critical: bool,
    /// A failed stop drops to the emergency shell during shutdown.
    pub stop_fail_critical: bool,
    /// Status reports stay visible for manual starts.
    pub interactive: bool,
    /// Double-fork spawner; the service reparents to init.
    pub fork: bool,
    /// Like `fork` but the PID rediscovery scan runs only once.
    pub fork_scan_once: bool,
    /// The start command replaces init entirely.
    pub exec: bool,
    /// The start command is `<new_root> <put_old>` for pivot_root.
    pub pivot_root: bool,
    /// Suppress the "Starting"/"Stopping" prefix on status lines.
    pub raw_description: bool,
    /// Assume one extra fork level when guessing the PID.
    pub is_service: bool,
    /// Restart the object whenever it dies.
    pub auto_restart: bool,
    /// Minimum seconds between starts before the loop safeguard trips.
    pub restart_floor_secs: u32,
    /// Never scan /proc for this object's PID.
    pub no_track: bool,
    /// Always run the command through a shell.
    pub force_shell: bool,
    /// Don't wait for the process to disappear after stopping it.
    pub no_stop_wait: bool,
    /// Seconds to wait for a stopping process to go away.
    pub stop_timeout: u32,
}

impl Default for ObjectOptions {
    fn default() -> Self {
        ObjectOptions {
            halt_only: false,
            persistent: false,
            run_once: false,
            start_fail_critical: false,
            stop_fail_critical: false,
            interactive: false,
            fork: false,
            fork_scan_once: false,
            exec: false,
            pivot_root: false,
            raw_description: false,
            is_service: false,
            auto_restart: false,
            restart_floor_secs: RESTART_FLOOR_SECS,
            no_track: false,
            force_shell: false,
            no_stop_wait: false,
            stop_timeout: STOP_TIMEOUT_SECS,
        }
    }
}

/// Byte tags for option flags in the LSOBJS options frame. The numbering is
/// part of the wire protocol and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionTag {
    HaltOnly = 1,
    Persistent = 2,
    Fork = 3,
    Service = 4,
    AutoRestart = 5,
    ForceShell = 6,
    NoStopWait = 7,
    StopTimeout = 8,
    TermSignal = 9,
    RawDescription = 10,
    PivotRoot = 11,
    Exec = 12,
    RunOnce = 13,
    ForkScanOnce = 14,
    NoTrack = 15,
    StartFailCritical = 16,
    StopFailCritical = 17,
}

impl OptionTag {
    pub fn from_byte(byte: u8) -> Option<OptionTag> {
        use OptionTag::*;
        Some(match byte {
            1 => HaltOnly,
            2 => Persistent,
            3 => Fork,
            4 => Service,
            5 => AutoRestart,
            6 => ForceShell,
            7 => NoStopWait,
            8 => StopTimeout,
            9 => TermSignal,
            10 => RawDescription,
            11 => PivotRoot,
            12 => Exec,
            13 => RunOnce,
            14 => ForkScanOnce,
            15 => NoTrack,
            16 => StartFailCritical,
            17 => StopFailCritical,
            _ => return None,
        })
    }
}

/// A supervised unit of work.
#[derive(Debug, Clone)]
pub struct Object {
    /// Unique short identifier, `[A-Za-z0-9_-]+`. Primary key.
    pub id: String,
    /// Human description; falls back to the id when unset.
    pub description: String,
    /// Runlevels the object directly belongs to, in declaration order.
    pub runlevels: Vec<String>,
    /// Start ordering; zero means "never started by a sweep".
    pub start_priority: u32,
    /// Stop ordering; zero means "never stopped by a sweep".
    pub stop_priority: u32,
    pub start_cmd: Option<String>,
    pub prestart_cmd: Option<String>,
    pub stop_cmd: Option<String>,
    pub reload_cmd: Option<String>,
    pub stop_mode: StopMode,
    /// Required iff `stop_mode == PidFile`.
    pub pidfile: Option<PathBuf>,
    /// Signal sent when stopping via PID. Defaults to SIGTERM.
    pub term_signal: i32,
    /// Signal sent by the reload operation; zero means "use the command".
    pub reload_signal: i32,
    /// Credentials applied to the start command; zero leaves init's.
    pub user_id: u32,
    pub group_id: u32,
    pub working_dir: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    /// `KEY=VALUE` pairs applied in order; later entries win.
    pub env_vars: Vec<String>,
    /// Up to eight user-defined exit status overrides.
    pub exit_map: Vec<ExitMapEntry>,
    pub opts: ObjectOptions,
    /// Currently tracked PID; zero means none.
    pub pid: u32,
    /// Whether we believe the object is running.
    pub started: bool,
    /// Unix seconds of the last successful start; zero when stopped.
    pub started_since: i64,
    /// Must be explicitly set by configuration; the integrity scan rejects
    /// objects that never said either way.
    pub enabled: Option<bool>,
    /// The config file that declared this object, for editor writes.
    pub config_file: PathBuf,
}

impl Object {
    /// A fresh object as the config loader first sees it.
    pub fn new(id: &str, config_file: &std::path::Path) -> Object {
        Object {
            id: id.to_string(),
            description: id.to_string(),
            runlevels: Vec::new(),
            start_priority: 0,
            stop_priority: 0,
            start_cmd: None,
            prestart_cmd: None,
            stop_cmd: None,
            reload_cmd: None,
            stop_mode: StopMode::default(),
            pidfile: None,
            term_signal: libc::SIGTERM,
            reload_signal: 0,
            user_id: 0,
            group_id: 0,
            working_dir: None,
            stdout_path: None,
            stderr_path: None,
            env_vars: Vec::new(),
            exit_map: Vec::new(),
            opts: ObjectOptions::default(),
            pid: 0,
            started: false,
            started_since: 0,
            enabled: None,
            config_file: config_file.to_path_buf(),
        }
    }

    /// True only when configuration explicitly enabled the object.
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }

    /// Records a user-defined exit mapping; ignored past the cap.
    pub fn map_exit_status(&mut self, exit_status: u8, value: Outcome) -> bool {
        if self.exit_map.len() >= MAX_EXIT_MAPPINGS {
            return false;
        }
        self.exit_map.push(ExitMapEntry { exit_status, value });
        true
    }

    /// Looks up a user-defined override for a raw exit status.
    pub fn mapped_outcome(&self, exit_status: u8) -> Option<Outcome> {
        self.exit_map
            .iter()
            .find(|entry| entry.exit_status == exit_status)
            .map(|entry| entry.value)
    }

    /// Clears the runtime tracking state after a stop or death.
    pub fn mark_stopped(&mut self) {
        self.started = false;
        self.pid = 0;
        self.started_since = 0;
    }

    /// The option flag bytes for the LSOBJS options frame, zero-terminated
    /// by the transport.
    pub fn option_tags(&self) -> Vec<u8> {
        let mut tags = Vec::new();
        if self.opts.raw_description {
            tags.push(OptionTag::RawDescription as u8);
        }
        if self.opts.halt_only {
            tags.push(OptionTag::HaltOnly as u8);
        }
        if self.opts.persistent {
            tags.push(OptionTag::Persistent as u8);
        }
        if self.opts.fork {
            tags.push(OptionTag::Fork as u8);
        }
        if self.opts.fork_scan_once {
            tags.push(OptionTag::ForkScanOnce as u8);
        }
        if self.opts.is_service {
            tags.push(OptionTag::Service as u8);
        }
        if self.opts.auto_restart {
            tags.push(OptionTag::AutoRestart as u8);
        }
        if self.opts.force_shell {
            tags.push(OptionTag::ForceShell as u8);
        }
        if self.opts.no_stop_wait {
            tags.push(OptionTag::NoStopWait as u8);
        }
        if self.opts.exec {
            tags.push(OptionTag::Exec as u8);
        }
        if self.opts.pivot_root {
            tags.push(OptionTag::PivotRoot as u8);
        }
        if self.opts.run_once {
            tags.push(OptionTag::RunOnce as u8);
        }
        if self.opts.no_track {
            tags.push(OptionTag::NoTrack as u8);
        }
        if self.opts.start_fail_critical {
            tags.push(OptionTag::StartFailCritical as u8);
        }
        if self.opts.stop_fail_critical {
            tags.push(OptionTag::StopFailCritical as u8);
        }
        tags
    }
}

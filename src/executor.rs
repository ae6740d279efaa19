//! Forks, dresses, and execs object commands, then maps their exit statuses.
//!
//! Everything the child needs (environment, credentials, redirect targets,
//! argv) is prepared before the fork so the child only touches
//! async-signal-safe calls between `fork` and `exec`.

use std::{
    ffi::CString,
    sync::atomic::{AtomicBool, AtomicI32, Ordering},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::{
        signal::{SigmaskHow, SigSet, sigprocmask},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork},
};
use tracing::warn;

use crate::{
    boot, clock,
    config,
    console,
    constants::{SHELL_PATH, WAIT_TIMEOUT_SECS},
    error::Outcome,
    logging,
    object::{Object, StopMode},
    pids, signals,
};

/// The command slot being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prestart,
    Start,
    Stop,
    Reload,
}

// ----------------------------------------------------------------------
// The current synchronous task
// ----------------------------------------------------------------------

/// The synchronous child (or cancelable polling wait) the supervisor is
/// currently blocked on. The SIGINT handler reads only these atomics, so a
/// stuck start or stop can be aborted from the console.
pub mod current_task {
    use super::*;
    use std::sync::Mutex;

    static SET: AtomicBool = AtomicBool::new(false);
    static PID: AtomicI32 = AtomicI32::new(0);
    static CANCEL: AtomicBool = AtomicBool::new(false);
    static NAME: Mutex<String> = Mutex::new(String::new());

    /// Records a child being waited on. `pid == 0` means a polling loop
    /// that honors the cancel flag instead of a real process.
    pub fn begin(id: &str, pid: i32) {
        *NAME.lock().unwrap_or_else(|p| p.into_inner()) = id.to_string();
        PID.store(pid, Ordering::SeqCst);
        CANCEL.store(false, Ordering::SeqCst);
        SET.store(true, Ordering::SeqCst);
    }

    pub fn clear() {
        SET.store(false, Ordering::SeqCst);
        PID.store(0, Ordering::SeqCst);
        CANCEL.store(false, Ordering::SeqCst);
        NAME.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn is_set() -> bool {
        SET.load(Ordering::SeqCst)
    }

    pub fn pid() -> i32 {
        PID.load(Ordering::SeqCst)
    }

    pub fn name() -> String {
        NAME.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn cancelled() -> bool {
        CANCEL.load(Ordering::SeqCst)
    }

    /// Kills the current task: SIGKILL for a real child, the cancel flag for
    /// a polling wait. Async-signal-safe; called from the SIGINT handler and
    /// from shutdown.
    pub fn kill_blocking() -> bool {
        if !SET.load(Ordering::SeqCst) {
            return false;
        }
        let pid = PID.load(Ordering::SeqCst);
        if pid == 0 {
            CANCEL.store(true, Ordering::SeqCst);
            true
        } else {
            unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
        }
    }

    /// Raw handle to the cancel flag for polling waits.
    pub fn cancel_flag() -> &'static AtomicBool {
        &CANCEL
    }
}

// ----------------------------------------------------------------------
// Shell selection
// ----------------------------------------------------------------------

/// Shells differ in whether `-c` replaces the shell with the command
/// ("dissolves") or forks a child and sticks around. The offset-based PID
/// guess depends on knowing which kind ran the command.
struct ShellChoice {
    path: &'static str,
    dissolves: bool,
}

/// Fallbacks tried in order when the configured shell is missing. Kept as a
/// table so new shells are one line each.
const SHELL_FALLBACKS: &[ShellChoice] = &[
    ShellChoice { path: "/bin/bash", dissolves: true },
    ShellChoice { path: "/bin/dash", dissolves: true },
    ShellChoice { path: "/bin/zsh", dissolves: true },
    ShellChoice { path: "/bin/csh", dissolves: true },
    ShellChoice { path: "/bin/tcsh", dissolves: true },
    ShellChoice { path: "/bin/ksh", dissolves: true },
    ShellChoice { path: "/bin/busybox", dissolves: false },
];

fn file_usable(path: &str) -> bool {
    std::fs::File::open(path).is_ok()
}

fn pick_shell() -> ShellChoice {
    if file_usable(SHELL_PATH) {
        return ShellChoice { path: SHELL_PATH, dissolves: true };
    }
    for fallback in SHELL_FALLBACKS {
        if file_usable(fallback.path) {
            return ShellChoice { path: fallback.path, dissolves: fallback.dissolves };
        }
    }
    ShellChoice { path: SHELL_PATH, dissolves: true }
}

/// Characters that force shell interpretation of a command line.
const SHELL_METACHARS: &str = "&^$#@!()*%{}`~+|\\<>?;:'[]\"\t";

fn needs_shell(cmd: &str) -> bool {
    cmd.chars().any(|c| SHELL_METACHARS.contains(c))
}

// ----------------------------------------------------------------------
// Child planning
// ----------------------------------------------------------------------

enum ExecPlan {
    /// `<shell> -c <cmd>`, argv[0] spelled "sh".
    Shell { shell: CString, argv: Vec<CString> },
    /// Whitespace-split argv, PATH-searched.
    Direct { argv: Vec<CString> },
}

struct CredPlan {
    uid: libc::uid_t,
    gid: libc::gid_t,
    username: CString,
    env: Vec<CString>,
    chdir_home: Option<CString>,
}

struct ChildPlan {
    env: Vec<CString>,
    chdir: Option<CString>,
    stdout: Option<CString>,
    stderr: Option<CString>,
    cred: Option<CredPlan>,
    exec: ExecPlan,
    double_fork: bool,
}

fn cstring(text: &str) -> CString {
    CString::new(text.as_bytes()).unwrap_or_else(|_| CString::new("").expect("empty cstring"))
}

fn build_plan(obj: &Object, cmd: &str, global_env: &[String], is_start: bool) -> (ChildPlan, bool) {
    let shell = pick_shell();
    let use_shell = obj.opts.force_shell || needs_shell(cmd);

    let exec = if use_shell {
        ExecPlan::Shell {
            shell: cstring(shell.path),
            argv: vec![cstring("sh"), cstring("-c"), cstring(cmd)],
        }
    } else {
        let argv: Vec<CString> = cmd.split_whitespace().map(cstring).collect();
        ExecPlan::Direct { argv }
    };

    // Global variables first, the object's own after, so later entries win.
    let env: Vec<CString> = global_env
        .iter()
        .chain(obj.env_vars.iter())
        .map(|var| cstring(var))
        .collect();

    let cred = if is_start && (obj.user_id != 0 || obj.group_id != 0) {
        match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(obj.user_id)) {
            Ok(Some(user)) => {
                let gid =
                    if obj.group_id != 0 { obj.group_id } else { user.gid.as_raw() };
                Some(CredPlan {
                    uid: obj.user_id,
                    gid,
                    username: cstring(&user.name),
                    env: vec![
                        cstring(&format!("HOME={}", user.dir.display())),
                        cstring(&format!("USER={}", user.name)),
                        cstring(&format!("SHELL={}", user.shell.display())),
                    ],
                    chdir_home: obj
                        .working_dir
                        .is_none()
                        .then(|| cstring(&user.dir.display().to_string())),
                })
            }
            _ => None,
        }
    } else {
        None
    };

    let plan = ChildPlan {
        env,
        chdir: if is_start {
            obj.working_dir.as_ref().map(|dir| cstring(&dir.display().to_string()))
        } else {
            None
        },
        stdout: obj.stdout_path.as_ref().map(|p| cstring(&p.display().to_string())),
        stderr: obj.stderr_path.as_ref().map(|p| cstring(&p.display().to_string())),
        cred,
        exec,
        double_fork: is_start && obj.opts.fork,
    };
    (plan, use_shell && !shell.dissolves)
}

/// Everything between fork and exec. Only async-signal-safe calls.
fn run_child(plan: &ChildPlan) -> ! {
    unsafe {
        // Default-reset and unblock every signal.
        for signum in 1..32 {
            libc::signal(signum, libc::SIG_DFL);
        }
        let all = SigSet::all();
        let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&all), None);

        let _ = libc::setsid();

        if plan.double_fork {
            // Orphan the real child so it reparents to init; the middle
            // process exits immediately and nobody waits on the grandchild.
            libc::signal(libc::SIGCHLD, libc::SIG_IGN);
            match libc::fork() {
                -1 => libc::_exit(1),
                0 => {
                    libc::signal(libc::SIGCHLD, libc::SIG_DFL);
                }
                _ => libc::_exit(0),
            }
        }

        for var in &plan.env {
            libc::putenv(var.as_ptr() as *mut libc::c_char);
        }

        if let Some(dir) = &plan.chdir {
            if libc::chdir(dir.as_ptr()) != 0 {
                libc::_exit(1);
            }
        }

        if let Some(path) = &plan.stdout {
            let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644);
            if fd >= 0 {
                libc::dup2(fd, 1);
            }
        }
        if let Some(path) = &plan.stderr {
            let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644);
            if fd >= 0 {
                libc::dup2(fd, 2);
            }
        }

        if let Some(cred) = &plan.cred {
            libc::initgroups(cred.username.as_ptr(), cred.gid as libc::gid_t);
            libc::setgid(cred.gid);
            libc::setuid(cred.uid);
            for var in &cred.env {
                libc::putenv(var.as_ptr() as *mut libc::c_char);
            }
            if let Some(home) = &cred.chdir_home {
                libc::chdir(home.as_ptr());
            }
        }
    }

    match &plan.exec {
        ExecPlan::Shell { shell, argv } => {
            let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
            let _ = nix::unistd::execv(shell, &argv_refs);
        }
        ExecPlan::Direct { argv } => {
            if let Some(first) = argv.first() {
                let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
                let _ = nix::unistd::execvp(first, &argv_refs);
            }
        }
    }
    unsafe { libc::_exit(1) }
}

// ----------------------------------------------------------------------
// Command execution
// ----------------------------------------------------------------------

/// Runs one command synchronously and maps its exit status. For start
/// commands, also records and then refines the object's PID.
fn run_command(obj: &mut Object, cmd: &str, global_env: &[String], is_start: bool) -> Outcome {
    let (plan, shell_lingers) = build_plan(obj, cmd, global_env, is_start);

    // Block everything until the fork is done; the parent must not take a
    // signal with a half-recorded task.
    let all = SigSet::all();
    let mut previous = SigSet::empty();
    if sigprocmask(SigmaskHow::SIG_BLOCK, Some(&all), Some(&mut previous)).is_err() {
        previous = SigSet::empty();
    }

    let child = match unsafe { fork() } {
        Ok(ForkResult::Child) => run_child(&plan),
        Ok(ForkResult::Parent { child }) => child,
        Err(err) => {
            let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
            warn!("fork failed executing '{}': {err}", obj.id);
            return Outcome::Failure;
        }
    };

    current_task::begin(&obj.id, child.as_raw());
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);

    let status = loop {
        match waitpid(child, None) {
            Ok(status) => break status,
            Err(Errno::EINTR) => continue,
            Err(err) => {
                current_task::clear();
                warn!("waitpid failed for '{}': {err}", obj.id);
                return Outcome::Failure;
            }
        }
    };

    if is_start {
        // First guess: the direct child, adjusted for intermediaries that
        // stay between init and the real process.
        let mut guess = child.as_raw() as u32;
        if shell_lingers {
            guess += 1;
        }
        if obj.opts.is_service {
            guess += 1;
        }
        if obj.opts.fork {
            guess += 1;
        }
        obj.pid = guess;

        // The guess is fragile; /proc is the authority when available.
        if !obj.opts.no_track && pids::proc_available() {
            if obj.opts.fork && !obj.opts.fork_scan_once {
                // Daemons may take a while to appear under their final PID.
                current_task::begin(&obj.id, 0);
                let deadline =
                    Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
                let mut found = false;
                while Instant::now() < deadline && !current_task::cancelled() {
                    if pids::advanced_pid_find(obj, true) != 0 {
                        found = true;
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                if !found && !current_task::cancelled() {
                    let text = format!(
                        "cannot locate running PID of object {} with option FORK set; \
                         use FORKN if it exits soon after launch",
                        obj.id
                    );
                    warn!("{text}");
                    logging::write_line(&text);
                }
            } else {
                pids::advanced_pid_find(obj, true);
            }
        }
    }

    current_task::clear();
    map_exit(obj, is_start, status)
}

fn map_exit(obj: &Object, is_start: bool, status: WaitStatus) -> Outcome {
    let code = match status {
        WaitStatus::Exited(_, code) => code,
        _ => return Outcome::Failure,
    };
    if is_start {
        if let Ok(raw) = u8::try_from(code) {
            if let Some(mapped) = obj.mapped_outcome(raw) {
                return mapped;
            }
        }
    }
    match code {
        0 => Outcome::Success,
        128 | 255 => Outcome::Warning,
        _ => Outcome::Failure,
    }
}

// ----------------------------------------------------------------------
// Object lifecycle operations
// ----------------------------------------------------------------------

fn status_text(obj: &Object, starting: bool) -> String {
    if obj.opts.raw_description {
        obj.description.clone()
    } else if !starting && obj.opts.halt_only {
        // Halt-only stop commands read like starts ("Starting unmount...").
        format!("Starting {}", obj.description)
    } else {
        format!("{} {}", if starting { "Starting" } else { "Stopping" }, obj.description)
    }
}

/// Starts or stops one object: the `execute(obj, phase)` entry point for the
/// start/stop phases, including prestart, pidfile waits, and stop timeouts.
pub fn process_object(
    obj: &mut Object,
    global_env: &[String],
    starting: bool,
    print_status: bool,
) -> Outcome {
    if starting && obj.start_cmd.is_none() && !obj.opts.halt_only {
        return Outcome::Success;
    }
    if !starting
        && obj.opts.halt_only
        && obj.stop_cmd.is_none()
        && obj.stop_mode == StopMode::Command
    {
        return Outcome::Success;
    }

    let report = status_text(obj, starting);

    if starting && obj.opts.halt_only {
        if print_status {
            console::begin_status_report(&report);
            console::complete_status_report(&report, Outcome::Failure, true);
        }
        return Outcome::Failure;
    }

    if starting {
        process_start(obj, global_env, print_status, &report)
    } else {
        // Stopped objects must not race their own auto-restart.
        let saved_auto_restart = obj.opts.auto_restart;
        obj.opts.auto_restart = false;
        let outcome = process_stop(obj, global_env, print_status, &report);
        obj.opts.auto_restart = saved_auto_restart;
        outcome
    }
}

fn process_start(
    obj: &mut Object,
    global_env: &[String],
    print_status: bool,
    report: &str,
) -> Outcome {
    if print_status {
        console::begin_status_report(report);
    }

    if obj.opts.pivot_root {
        let cmd = obj.start_cmd.clone().unwrap_or_default();
        boot::perform_pivot_root(&cmd);
    }
    if obj.opts.exec {
        let cmd = obj.start_cmd.clone().unwrap_or_default();
        boot::perform_exec(&cmd);
        if print_status {
            console::complete_status_report(report, Outcome::Failure, true);
        }
        if obj.opts.start_fail_critical && signals::boot_mode() == signals::BootMode::Bootup {
            boot::emergency_shell();
        }
        return Outcome::Failure;
    }

    let prestart_outcome = match obj.prestart_cmd.clone() {
        Some(cmd) => run_command(obj, &cmd, global_env, false),
        None => Outcome::Success,
    };

    let start_cmd = obj.start_cmd.clone().unwrap_or_default();
    let mut outcome = run_command(obj, &start_cmd, global_env, true);

    if prestart_outcome != Outcome::Success && outcome.ok() {
        let text = format!(
            "prestart command {} for object \"{}\"",
            if prestart_outcome == Outcome::Warning { "returned a warning" } else { "failed" },
            obj.id
        );
        logging::write_line(&text);
        outcome = Outcome::Warning;
    }

    // Wait for the pidfile so auto-restart has something to check.
    if outcome.ok() {
        if let Some(pidfile) = obj.pidfile.clone() {
            current_task::begin(&obj.id, 0);
            let appeared =
                pids::wait_for_path(&pidfile, WAIT_TIMEOUT_SECS, current_task::cancel_flag());
            current_task::clear();
            if !appeared {
                let text = format!(
                    "object {} started but its pidfile \"{}\" did not appear within {} seconds",
                    obj.id,
                    pidfile.display(),
                    WAIT_TIMEOUT_SECS
                );
                warn!("{text}");
                logging::write_line(&text);
                outcome = Outcome::Warning;
            }
        }
    }

    obj.started = outcome.ok();
    if outcome.ok() {
        obj.started_since = clock::unix_now();
        if obj.opts.run_once && signals::boot_mode() != signals::BootMode::Neutral {
            // One-shot boot objects retire themselves after a good run.
            obj.enabled = Some(false);
            if let Err(err) =
                config::edit_value(&obj.config_file, &obj.id, "ObjectEnabled", Some("false"))
            {
                warn!("failed to persist RUNONCE disable for '{}': {err}", obj.id);
            }
        }
    }

    if print_status {
        console::complete_status_report(report, outcome, true);
    }

    if obj.opts.start_fail_critical
        && !outcome.ok()
        && signals::boot_mode() == signals::BootMode::Bootup
    {
        eprintln!(
            "{}CRITICAL:{} start of critically important object \"{}\" has failed.",
            console::COLOR_RED,
            console::END_COLOR,
            obj.id
        );
        boot::emergency_shell();
    }
    outcome
}

fn process_stop(
    obj: &mut Object,
    global_env: &[String],
    print_status: bool,
    report: &str,
) -> Outcome {
    let outcome = match obj.stop_mode {
        StopMode::None => {
            obj.mark_stopped();
            Outcome::Success
        }
        StopMode::Command => stop_via_command(obj, global_env, print_status, report),
        StopMode::Pid => {
            if print_status {
                console::begin_status_report(report);
            }
            let pid = obj.pid;
            let outcome = stop_via_signal(obj, pid);
            if outcome.ok() {
                obj.mark_stopped();
            }
            if print_status {
                console::complete_status_report(report, outcome, true);
            }
            outcome
        }
        StopMode::PidFile => {
            if print_status {
                console::begin_status_report(report);
            }
            let pid = pids::read_pidfile(obj);
            let outcome =
                if pid == 0 { Outcome::Failure } else { stop_via_signal(obj, pid) };
            if outcome.ok() {
                obj.mark_stopped();
            }
            if print_status {
                console::complete_status_report(report, outcome, true);
            }
            outcome
        }
    };

    if !outcome.ok()
        && signals::boot_mode() == signals::BootMode::Shutdown
        && obj.opts.stop_fail_critical
    {
        eprintln!(
            "{}CRITICAL:{} stop of critically important object \"{}\" has failed.",
            console::COLOR_RED,
            console::END_COLOR,
            obj.id
        );
        boot::emergency_shell();
    }
    outcome
}

fn stop_via_command(
    obj: &mut Object,
    global_env: &[String],
    print_status: bool,
    report: &str,
) -> Outcome {
    if print_status {
        console::begin_status_report(report);
    }

    let stop_cmd = obj.stop_cmd.clone().unwrap_or_default();
    let mut outcome = if let Some(rest) = stop_cmd.strip_prefix("KILLALL5") {
        run_killall5_stop(obj, rest)
    } else {
        run_command(obj, &stop_cmd, global_env, false)
    };

    if !obj.opts.no_stop_wait {
        current_task::begin(&obj.id, 0);
        let deadline = Instant::now() + Duration::from_secs(obj.opts.stop_timeout as u64);
        while pids::object_process_running(obj)
            && Instant::now() < deadline
            && !current_task::cancelled()
        {
            let pid = if obj.pidfile.is_some() { pids::read_pidfile(obj) } else { obj.pid };
            if pid == 0 {
                break;
            }
            let _ = waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG));
            std::thread::sleep(Duration::from_millis(50));
        }
        if Instant::now() >= deadline || current_task::cancelled() {
            outcome = Outcome::Warning;
        }
        current_task::clear();
    }

    if outcome.ok() {
        obj.mark_stopped();
        // HALTONLY objects only ever run their stop command, so RUNONCE
        // retirement happens here for them.
        if signals::boot_mode() != signals::BootMode::Neutral
            && obj.opts.run_once
            && obj.opts.halt_only
            && obj.is_enabled()
        {
            obj.enabled = Some(false);
            if let Err(err) =
                config::edit_value(&obj.config_file, &obj.id, "ObjectEnabled", Some("false"))
            {
                warn!("failed to persist RUNONCE disable for '{}': {err}", obj.id);
            }
        }
    }

    if print_status {
        console::complete_status_report(report, outcome, true);
    }
    outcome
}

/// The `KILLALL5 <signal> [sleep]` stop-command special form.
fn run_killall5_stop(obj: &Object, args: &str) -> Outcome {
    let mut words = args.split_whitespace();
    let signal = match words.next() {
        None => libc::SIGTERM,
        Some(word) => match word.parse::<i32>() {
            Ok(signal) if signal > 0 => signal,
            _ => {
                let text = format!(
                    "bad signal number \"{word}\" for object {} calling KILLALL5",
                    obj.id
                );
                warn!("{text}");
                logging::write_line(&text);
                return Outcome::Failure;
            }
        },
    };
    let sleep_secs = words.next().and_then(|w| w.parse::<u64>().ok());
    let outcome = crate::applets::emul_killall5(signal);
    if outcome.ok() {
        if let Some(secs) = sleep_secs {
            std::thread::sleep(Duration::from_secs(secs));
        }
    }
    outcome
}

fn stop_via_signal(obj: &Object, pid: u32) -> Outcome {
    if pid == 0 {
        return Outcome::Failure;
    }
    let target = Pid::from_raw(pid as i32);
    // Raw kill so real-time signal numbers work too.
    if unsafe { libc::kill(pid as libc::pid_t, obj.term_signal) } != 0 {
        return Outcome::Failure;
    }
    if obj.opts.no_stop_wait {
        return Outcome::Success;
    }

    current_task::begin(&obj.id, 0);
    let deadline = Instant::now() + Duration::from_secs(obj.opts.stop_timeout as u64);
    let mut outcome = Outcome::Success;
    while pids::pid_alive(pid) {
        if current_task::cancelled() {
            outcome = Outcome::Warning;
            break;
        }
        if Instant::now() >= deadline {
            outcome = Outcome::Failure;
            break;
        }
        // Harvest it ourselves; the primary loop is blocked on us.
        let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
        std::thread::sleep(Duration::from_millis(50));
    }
    current_task::clear();
    outcome
}

/// The reload operation: the configured reload command, or the reload signal
/// when one is set and no command is.
pub fn process_reload(obj: &mut Object, global_env: &[String], print_status: bool) -> Outcome {
    if obj.reload_cmd.is_none() && obj.reload_signal == 0 {
        return Outcome::Failure;
    }
    let report = format!("Reloading {}", obj.id);
    if print_status {
        console::begin_status_report(&report);
    }

    let outcome = if obj.reload_signal != 0 {
        let pid = if obj.pidfile.is_some() { pids::read_pidfile(obj) } else { obj.pid };
        if pid == 0 {
            Outcome::Failure
        } else if unsafe { libc::kill(pid as libc::pid_t, obj.reload_signal) } == 0 {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    } else {
        let cmd = obj.reload_cmd.clone().unwrap_or_default();
        run_command(obj, &cmd, global_env, false)
    };

    if print_status {
        console::complete_status_report(&report, outcome, true);
    }
    outcome
}

/// Direct command execution for a single phase, used by tests and the
/// protocol layer; start/stop go through `process_object`.
pub fn execute(obj: &mut Object, phase: Phase, global_env: &[String]) -> Outcome {
    match phase {
        Phase::Start => process_object(obj, global_env, true, false),
        Phase::Stop => process_object(obj, global_env, false, false),
        Phase::Reload => process_reload(obj, global_env, false),
        Phase::Prestart => match obj.prestart_cmd.clone() {
            Some(cmd) => run_command(obj, &cmd, global_env, false),
            None => Outcome::Failure,
        },
    }
}

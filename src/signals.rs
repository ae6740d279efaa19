//! Signal handling for the init server.
//!
//! Handlers touch only atomics and async-signal-safe calls. Anything that
//! needs real work (re-exec, reboot) is flagged here and performed
//! synchronously at the top of the next supervisor tick.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use crate::executor::current_task;

/// What phase of life the process is in; drives SIGINT semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootMode {
    /// Normal supervision, after boot and before shutdown.
    Neutral = 0,
    /// Running the boot-time start sweep.
    Bootup = 1,
    /// Running the shutdown stop sweep.
    Shutdown = 2,
}

static BOOT_MODE: AtomicU8 = AtomicU8::new(BootMode::Neutral as u8);
static AM_INIT: AtomicBool = AtomicBool::new(false);
static REEXEC_REQUESTED: AtomicBool = AtomicBool::new(false);
static REBOOT_REQUESTED: AtomicBool = AtomicBool::new(false);
static RECURSIVE_FAULT: AtomicBool = AtomicBool::new(false);
static LAST_KILL_ATTEMPT: AtomicI64 = AtomicI64::new(0);

pub fn boot_mode() -> BootMode {
    match BOOT_MODE.load(Ordering::SeqCst) {
        1 => BootMode::Bootup,
        2 => BootMode::Shutdown,
        _ => BootMode::Neutral,
    }
}

pub fn set_boot_mode(mode: BootMode) {
    BOOT_MODE.store(mode as u8, Ordering::SeqCst);
}

pub fn set_am_init(am_init: bool) {
    AM_INIT.store(am_init, Ordering::SeqCst);
}

pub fn am_init() -> bool {
    AM_INIT.load(Ordering::SeqCst)
}

/// Consumes a pending SIGUSR2 re-exec request.
pub fn take_reexec_request() -> bool {
    REEXEC_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Consumes a pending SIGINT reboot request.
pub fn take_reboot_request() -> bool {
    REBOOT_REQUESTED.swap(false, Ordering::SeqCst)
}

fn raw_time() -> i64 {
    // time(2) is async-signal-safe, unlike the chrono helpers.
    unsafe { libc::time(std::ptr::null_mut()) as i64 }
}

extern "C" fn handle_sigint(_: libc::c_int) {
    if !AM_INIT.load(Ordering::SeqCst) {
        // A client applet; just die quietly and let Drop impls run nothing.
        unsafe { libc::_exit(0) };
    }

    let mode = boot_mode();
    if current_task::is_set() && mode != BootMode::Neutral {
        let last = LAST_KILL_ATTEMPT.load(Ordering::SeqCst);
        let now = raw_time();
        // Repeated kill attempts are throttled outside of shutdown.
        if last == 0 || mode == BootMode::Shutdown || now > last + 5 {
            current_task::kill_blocking();
            LAST_KILL_ATTEMPT.store(now, Ordering::SeqCst);
        }
        return;
    }
    if mode == BootMode::Shutdown {
        // Already going down; absorb it.
        return;
    }
    REBOOT_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigusr2(_: libc::c_int) {
    if AM_INIT.load(Ordering::SeqCst) {
        REEXEC_REQUESTED.store(true, Ordering::SeqCst);
    }
}

extern "C" fn handle_crash(signum: libc::c_int) {
    const MSG: &[u8] = b"epoch: fatal signal received\n";
    unsafe {
        libc::write(2, MSG.as_ptr() as *const libc::c_void, MSG.len());
    }

    if RECURSIVE_FAULT.swap(true, Ordering::SeqCst) {
        // Faulted while handling a fault; stop making progress rather than
        // fork-bomb the emergency path.
        const AGAIN: &[u8] = b"epoch: recursive fault detected, sleeping forever\n";
        unsafe {
            libc::write(2, AGAIN.as_ptr() as *const libc::c_void, AGAIN.len());
            loop {
                libc::sleep(1);
            }
        }
    }

    if AM_INIT.load(Ordering::SeqCst) {
        crate::boot::emergency_shell();
    }
    unsafe { libc::_exit(128 + signum) };
}

fn install(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) {
    unsafe {
        libc::signal(signum, handler as libc::sighandler_t);
    }
}

/// Handlers every invocation gets, applet or init.
pub fn install_base_handlers() {
    install(libc::SIGSEGV, handle_crash);
    install(libc::SIGILL, handle_crash);
    install(libc::SIGFPE, handle_crash);
    install(libc::SIGABRT, handle_crash);
    install(libc::SIGINT, handle_sigint);
}

/// Handlers only PID 1 gets.
pub fn install_init_handlers() {
    install(libc::SIGUSR2, handle_sigusr2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_mode_round_trips() {
        let _guard = crate::test_utils::env_lock();
        set_boot_mode(BootMode::Bootup);
        assert_eq!(boot_mode(), BootMode::Bootup);
        set_boot_mode(BootMode::Shutdown);
        assert_eq!(boot_mode(), BootMode::Shutdown);
        set_boot_mode(BootMode::Neutral);
        assert_eq!(boot_mode(), BootMode::Neutral);
    }

    #[test]
    fn requests_are_consumed_once() {
        let _guard = crate::test_utils::env_lock();
        REEXEC_REQUESTED.store(true, Ordering::SeqCst);
        assert!(take_reexec_request());
        assert!(!take_reexec_request());

        REBOOT_REQUESTED.store(true, Ordering::SeqCst);
        assert!(take_reboot_request());
        assert!(!take_reboot_request());
    }
}

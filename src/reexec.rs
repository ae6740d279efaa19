//! Live re-execution: replacing the running init binary on disk without
//! losing track of supervised PIDs.
//!
//! The running init forks a courier child, then execs the new binary from
//! disk. The courier serves a second membus region under `key + 1` (so
//! ordinary clients can't interfere) and streams the runtime state to the
//! re-executed parent, which attaches to the courier's region as a client:
//! one frame per object, then the halt schedule, logging flag, and current
//! runlevel.

use std::{
    ffi::CString,
    path::PathBuf,
    time::{Duration, Instant},
};

use nix::unistd::{ForkResult, Pid, fork};
use tracing::{error, warn};

use crate::{
    applets, boot,
    clock::WallTime,
    config,
    constants::{
        CODE_ACKNOWLEDGED, CODE_FAILURE, CODE_RXD, CODE_RXD_OPTS, EPOCH_BINARY_PATH, MEMBUS_KEY,
        WAIT_TIMEOUT_SECS,
    },
    logging,
    membus::MemBus,
    supervisor::{HaltMode, HaltSchedule, Server},
};

/// The key the handshake region lives under while a re-exec is in flight.
fn handshake_key() -> libc::c_int {
    MEMBUS_KEY + 1
}

// ----------------------------------------------------------------------
// Frame encoding
// ----------------------------------------------------------------------

/// `RXD\0<id>\0<pid u32><started u8><started_since i64>`, little-endian.
fn encode_object_frame(id: &str, pid: u32, started: bool, started_since: i64) -> Vec<u8> {
    let mut frame = Vec::with_capacity(id.len() + 18);
    frame.extend_from_slice(CODE_RXD.as_bytes());
    frame.push(0);
    frame.extend_from_slice(id.as_bytes());
    frame.push(0);
    frame.extend_from_slice(&pid.to_le_bytes());
    frame.push(started as u8);
    frame.extend_from_slice(&started_since.to_le_bytes());
    frame
}

fn decode_object_frame(frame: &[u8]) -> Option<(String, u32, bool, i64)> {
    let rest = frame.strip_prefix(b"RXD\0")?;
    let id_end = rest.iter().position(|&b| b == 0)?;
    let id = String::from_utf8(rest[..id_end].to_vec()).ok()?;
    let rest = &rest[id_end + 1..];
    if rest.len() < 13 {
        return None;
    }
    let pid = u32::from_le_bytes(rest[..4].try_into().ok()?);
    let started = rest[4] != 0;
    let started_since = i64::from_le_bytes(rest[5..13].try_into().ok()?);
    Some((id, pid, started, started_since))
}

/// `ORXD\0` + halt mode code (i64, -1 when nothing is scheduled) + the
/// target civil time fields + job id.
fn encode_halt_frame(halt: Option<&HaltSchedule>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(48);
    frame.extend_from_slice(CODE_RXD_OPTS.as_bytes());
    frame.push(0);
    match halt {
        None => {
            frame.extend_from_slice(&(-1i64).to_le_bytes());
            frame.extend_from_slice(&[0u8; 24]);
            frame.extend_from_slice(&0u32.to_le_bytes());
        }
        Some(schedule) => {
            frame.extend_from_slice(&(schedule.mode.reboot_code() as i64).to_le_bytes());
            frame.extend_from_slice(&schedule.target.hour.to_le_bytes());
            frame.extend_from_slice(&schedule.target.minute.to_le_bytes());
            frame.extend_from_slice(&schedule.target.second.to_le_bytes());
            frame.extend_from_slice(&schedule.target.month.to_le_bytes());
            frame.extend_from_slice(&schedule.target.day.to_le_bytes());
            frame.extend_from_slice(&schedule.target.year.to_le_bytes());
            frame.extend_from_slice(&schedule.job_id.to_le_bytes());
        }
    }
    frame
}

fn decode_halt_frame(frame: &[u8]) -> Option<Option<HaltSchedule>> {
    let rest = frame.strip_prefix(b"ORXD\0")?;
    if rest.len() < 36 {
        return None;
    }
    let mode_code = i64::from_le_bytes(rest[..8].try_into().ok()?);
    if mode_code < 0 {
        return Some(None);
    }
    let mode = HaltMode::from_code(mode_code as u32)?;
    let target = WallTime {
        hour: u32::from_le_bytes(rest[8..12].try_into().ok()?),
        minute: u32::from_le_bytes(rest[12..16].try_into().ok()?),
        second: u32::from_le_bytes(rest[16..20].try_into().ok()?),
        month: u32::from_le_bytes(rest[20..24].try_into().ok()?),
        day: u32::from_le_bytes(rest[24..28].try_into().ok()?),
        year: i32::from_le_bytes(rest[28..32].try_into().ok()?),
    };
    let job_id = u32::from_le_bytes(rest[32..36].try_into().ok()?);
    Some(Some(HaltSchedule { mode, target, job_id }))
}

fn opts_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.extend_from_slice(CODE_RXD_OPTS.as_bytes());
    frame.push(0);
    frame.extend_from_slice(payload);
    frame
}

// ----------------------------------------------------------------------
// The running-init side
// ----------------------------------------------------------------------

/// Restores the normal bus and reports a failed re-exec to the client.
fn recover_failed_reexec(server: &mut Server) {
    MemBus::remove_region(handshake_key());
    match server.start_bus() {
        Ok(()) => {
            if let Some(bus) = &server.bus {
                let _ = bus.write(&format!("{CODE_FAILURE} {CODE_RXD}"));
            }
        }
        Err(err) => {
            error!("failed to restart membus after failed re-exec: {err}");
        }
    }
}

/// Replaces the running init with the binary on disk. On success this call
/// never returns: the process image is replaced. On failure the normal bus
/// is restored and the client told `FAIL RXD`. Whether the request came over
/// the membus travels in `EPOCHRXDMEMBUS`, set by the protocol handler.
pub fn reexecute_epoch(server: &mut Server) {
    // The normal-key region goes away first so clients can't interleave.
    if let Some(mut bus) = server.bus.take() {
        bus.shutdown();
    }

    if std::fs::File::open(EPOCH_BINARY_PATH).is_err() {
        applets::emul_wall(
            &format!("epoch: ERROR: unable to read \"{EPOCH_BINARY_PATH}\", cannot re-exec"),
            false,
        );
        recover_failed_reexec(server);
        return;
    }

    let child = match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            courier_child(server);
        }
        Ok(ForkResult::Parent { child }) => child,
        Err(err) => {
            applets::emul_wall("epoch: ERROR: unable to fork, aborting re-execution", false);
            warn!("re-exec fork failed: {err}");
            recover_failed_reexec(server);
            return;
        }
    };

    logging::write_line("re-executing epoch");

    // Wait for the courier's handshake region before nuking our image.
    let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
    while !MemBus::region_exists(handshake_key()) {
        if Instant::now() >= deadline {
            applets::emul_wall("epoch: ERROR: re-exec courier never came up", false);
            let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
            recover_failed_reexec(server);
            return;
        }
        std::thread::sleep(Duration::from_micros(100));
    }

    let binary = CString::new(EPOCH_BINARY_PATH).expect("static path");
    let argv = [
        CString::new("!rxd").expect("static"),
        CString::new("REEXEC").expect("static"),
    ];
    let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
    let _ = nix::unistd::execv(&binary, &argv_refs);

    // Exec failed; the courier is useless now.
    applets::emul_wall(
        &format!("epoch: ERROR: failed to execute \"{EPOCH_BINARY_PATH}\", cannot re-exec"),
        false,
    );
    logging::write_line("re-execution failed");
    let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
    recover_failed_reexec(server);
}

/// The forked courier: serves the handshake region and streams state to the
/// re-executed parent, then exits.
fn courier_child(server: &Server) -> ! {
    let mut bus = match MemBus::init_server(handshake_key()) {
        Ok(bus) => bus,
        Err(err) => {
            applets::emul_wall(
                "epoch: ERROR: re-exec courier cannot start the handshake bus",
                false,
            );
            warn!("courier bus failed: {err}");
            std::process::exit(1);
        }
    };

    // The re-executed parent announces itself with the standard attach ping.
    let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
    loop {
        if bus.handle_pings() {
            break;
        }
        if Instant::now() >= deadline {
            error!("re-executed process never attached; courier exiting");
            bus.shutdown();
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    // Our PID doubles as the greeting; the parent reaps us by it.
    let own_pid = std::process::id() as i32;
    let _ = bus.bin_write(&own_pid.to_le_bytes());

    for obj in server.config.store.objects() {
        let frame = encode_object_frame(&obj.id, obj.pid, obj.started, obj.started_since);
        let _ = bus.bin_write(&frame);
    }

    let _ = bus.bin_write(&encode_halt_frame(server.halt.as_ref()));
    let _ = bus.bin_write(&opts_frame(&[logging::enabled() as u8]));
    let _ = bus.bin_write(&opts_frame(server.config.store.current_runlevel.as_bytes()));

    // Hold the region open until the parent says it has everything.
    let _ = bus.read_blocking();
    bus.shutdown();
    std::process::exit(0);
}

// ----------------------------------------------------------------------
// The re-executed side
// ----------------------------------------------------------------------

/// Entry point of the freshly exec'd binary (`argv[0] == "!rxd"`). Pulls the
/// runtime state from the courier, restores the normal bus, and resumes the
/// primary loop. Never returns.
pub fn recover_from_reexec(
    via_membus: bool,
    config_path: PathBuf,
    runlevel_override: Option<String>,
) -> ! {
    let mut config = match config::load(&config_path, runlevel_override.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            applets::emul_wall(
                "epoch: ERROR: cannot reload configuration for re-exec",
                false,
            );
            error!("re-exec config load failed: {err}");
            boot::emergency_shell();
        }
    };
    if !config.store.scan_integrity().outcome.ok() {
        applets::emul_wall("epoch: ERROR: configuration failed integrity check on re-exec", false);
        boot::emergency_shell();
    }

    let mut courier = match MemBus::init_client(handshake_key()) {
        Ok(bus) => bus,
        Err(err) => {
            applets::emul_wall(
                "epoch: ERROR: re-executed process cannot connect to the handshake bus",
                false,
            );
            error!("handshake attach failed: {err}");
            boot::emergency_shell();
        }
    };

    let mut buffer = [0u8; crate::constants::MEMBUS_MSGSIZE + 1];

    // Frame 1: the courier's PID.
    let courier_pid = match courier.bin_read_blocking(&mut buffer) {
        Ok(len) if len >= 4 => i32::from_le_bytes(buffer[..4].try_into().expect("4 bytes")),
        _ => {
            applets::emul_wall("epoch: ERROR: re-exec handshake broke down", false);
            boot::emergency_shell();
        }
    };

    // Object frames until the options frame shows up.
    let halt = loop {
        let Ok(len) = courier.bin_read_blocking(&mut buffer) else {
            applets::emul_wall("epoch: ERROR: re-exec handshake broke down", false);
            boot::emergency_shell();
        };
        let frame = &buffer[..len];
        if let Some((id, pid, started, started_since)) = decode_object_frame(frame) {
            if let Some(obj) = config.store.lookup_mut(&id) {
                obj.pid = pid;
                obj.started = started;
                obj.started_since = started_since;
            }
            continue;
        }
        match decode_halt_frame(frame) {
            Some(halt) => break halt,
            None => {
                applets::emul_wall("epoch: ERROR: unrecognized re-exec frame", false);
                boot::emergency_shell();
            }
        }
    };

    // Logging flag, then the current runlevel.
    let enable_logging = match courier.bin_read_blocking(&mut buffer) {
        Ok(len) if len >= 6 && buffer.starts_with(b"ORXD\0") => buffer[5] != 0,
        _ => true,
    };
    if let Ok(len) = courier.bin_read_blocking(&mut buffer) {
        if let Some(rest) = buffer[..len].strip_prefix(b"ORXD\0") {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            if let Ok(runlevel) = String::from_utf8(rest[..end].to_vec()) {
                if !runlevel.is_empty() {
                    config.store.current_runlevel = runlevel;
                }
            }
        }
    }

    // Release the courier and reap it.
    let _ = courier.write(CODE_RXD_OPTS);
    let _ = nix::sys::wait::waitpid(Pid::from_raw(courier_pid), None);
    courier.shutdown();

    unsafe {
        std::env::set_var("HOME", crate::constants::ENV_HOME);
        std::env::set_var("USER", crate::constants::ENV_USER);
        std::env::set_var("PATH", crate::constants::ENV_PATH);
        std::env::set_var("SHELL", crate::constants::ENV_SHELL);
    }

    logging::set_enabled(enable_logging);
    if let Some(log_file) = &config.settings.log_file {
        logging::set_log_file(log_file);
    }

    let mut server = Server::new(config);
    server.halt = halt;
    if let Some(schedule) = &server.halt {
        server.next_job_id = schedule.job_id;
    }
    if let Err(err) = server.start_bus() {
        warn!("cannot restart normal membus after re-exec; system otherwise operational: {err}");
    }

    if via_membus {
        // The requesting client is polling for us; answer its attach ping
        // and confirm the re-exec.
        if let Some(bus) = &server.bus {
            let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
            while Instant::now() < deadline {
                if bus.handle_pings() {
                    let _ = bus.write(&format!("{CODE_ACKNOWLEDGED} {CODE_RXD}"));
                    break;
                }
                std::thread::sleep(Duration::from_micros(100));
            }
        }
    }

    logging::finalise(false);
    logging::write_line(&format!("re-executed epoch, now running {}", crate::constants::VERSION_STRING));

    server.run();
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_frame_round_trip() {
        let frame = encode_object_frame("sshd", 4242, true, 1_700_000_000);
        let (id, pid, started, since) = decode_object_frame(&frame).expect("decode");
        assert_eq!(id, "sshd");
        assert_eq!(pid, 4242);
        assert!(started);
        assert_eq!(since, 1_700_000_000);
    }

    #[test]
    fn object_frame_rejects_other_prefixes() {
        assert!(decode_object_frame(b"ORXD\0junk").is_none());
        assert!(decode_object_frame(b"RXD\0no-terminator").is_none());
    }

    #[test]
    fn halt_frame_round_trip_none() {
        let frame = encode_halt_frame(None);
        assert_eq!(decode_halt_frame(&frame), Some(None));
    }

    #[test]
    fn halt_frame_round_trip_scheduled() {
        let schedule = HaltSchedule {
            mode: HaltMode::Reboot,
            target: WallTime { hour: 10, minute: 2, second: 0, month: 3, day: 14, year: 2031 },
            job_id: 7,
        };
        let frame = encode_halt_frame(Some(&schedule));
        let decoded = decode_halt_frame(&frame).expect("decode").expect("some");
        assert_eq!(decoded, schedule);
    }

    #[test]
    fn halt_frame_rejects_garbage() {
        assert_eq!(decode_halt_frame(b"RXD\0zzz"), None);
        assert_eq!(decode_halt_frame(b"ORXD\0short"), None);
    }
}

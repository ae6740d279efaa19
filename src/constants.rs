//! Constants and configuration values for the epoch init system.
//!
//! This module centralizes the magic numbers, wire codes, and default paths
//! shared between the init server, the membus client, and the applets.

// ============================================================================
// Filesystem defaults
// ============================================================================

/// Where the init binary lives on disk. Only used by re-execution.
pub const EPOCH_BINARY_PATH: &str = "/sbin/epoch";

/// Default shell used when a command needs shell interpretation.
pub const SHELL_PATH: &str = "/bin/sh";

/// Directory holding the main configuration file.
pub const CONFIG_DIR: &str = "/etc/epoch/";

/// Main configuration file name.
pub const CONFIG_NAME: &str = "epoch.conf";

/// Default log file written once the log filesystem is available.
pub const DEFAULT_LOG_FILE: &str = "/var/log/system.log";

// ============================================================================
// Environment defaults exposed to children and the init process itself
// ============================================================================

pub const ENV_HOME: &str = "/";
pub const ENV_USER: &str = "root";
pub const ENV_SHELL: &str = SHELL_PATH;
pub const ENV_PATH: &str = "/bin:/sbin:/usr/bin:/usr/sbin:/usr/local/bin:/usr/local/sbin";

/// Overrides the configuration file path when set.
pub const ENV_CONFIG_OVERRIDE: &str = "epochconfig";

/// Overrides the default runlevel when set (e.g. from the kernel cmdline).
pub const ENV_RUNLEVEL_OVERRIDE: &str = "runlevel";

/// Present in the re-executed process when the re-exec was requested over the
/// membus rather than by SIGUSR2, so the new process knows a client is waiting.
pub const ENV_RXD_VIA_MEMBUS: &str = "EPOCHRXDMEMBUS";

// ============================================================================
// Kernel reboot(2) command codes
// ============================================================================

pub const OSCTL_REBOOT: u32 = 0x0123_4567;
pub const OSCTL_HALT: u32 = 0xcdef_0123;
pub const OSCTL_POWEROFF: u32 = 0x4321_fedc;
pub const OSCTL_DISABLE_CTRLALTDEL: u32 = 0;
pub const OSCTL_ENABLE_CTRLALTDEL: u32 = 0x89ab_cdef;

// ============================================================================
// MemBus geometry
// ============================================================================

/// System V IPC key for the shared region. The derivation is historical and
/// must not change: clients compiled against other versions depend on it.
pub const MEMBUS_KEY: i32 = (('E' as i32 + 'P' as i32 + 'O' as i32 + 'C' as i32 + 'H' as i32)
    + ('W' as i32 + 'h' as i32 + 'i' as i32 + 't' as i32 + 'e' as i32
        + 'R' as i32 + 'a' as i32 + 't' as i32))
    * 7;

/// Payload area of the region, split into a server half and a client half.
pub const MEMBUS_SIZE: usize = 4096 + 16;

/// Each half starts with a one byte status code followed by the message area.
pub const MEMBUS_HALF: usize = MEMBUS_SIZE / 2;

/// Maximum length of a single message in either direction.
pub const MEMBUS_MSGSIZE: usize = 2047;

/// Byte offset of the client lock PID slot.
pub const MEMBUS_LOCK_PID_OFFSET: usize = 0;

/// Byte offset of the lock acquisition timestamp slot.
pub const MEMBUS_LOCK_TIME_OFFSET: usize = 8;

/// Offset of the server half (status byte + payload).
pub const MEMBUS_SERVER_OFFSET: usize = 16;

/// Offset of the client half.
pub const MEMBUS_CLIENT_OFFSET: usize = 16 + MEMBUS_HALF;

/// Total size of the shared region.
pub const MEMBUS_REGION_SIZE: usize = 16 + MEMBUS_HALF * 2;

/// Seconds a client may hold the bus lock before the server force-releases it.
pub const MEMBUS_LOCK_STALE_SECS: i64 = 60;

// Slot status bytes. Anything else in a status slot means the peer is gone.
pub const MEMBUS_NOMSG: u8 = 25;
pub const MEMBUS_MSG: u8 = 100;
pub const MEMBUS_PING_NOMSG: u8 = 34;
pub const MEMBUS_PING_MSG: u8 = 43;

// ============================================================================
// MemBus protocol codes
// ============================================================================

// Response prefixes.
pub const CODE_ACKNOWLEDGED: &str = "OK";
pub const CODE_WARNING: &str = "WARN";
pub const CODE_FAILURE: &str = "FAIL";
pub const CODE_BADPARAM: &str = "BADPARAM";

// Request verbs.
pub const CODE_ABORTHALT: &str = "INIT_ABORTHALT";
pub const CODE_HALT: &str = "INIT_HALT";
pub const CODE_POWEROFF: &str = "INIT_POWEROFF";
pub const CODE_REBOOT: &str = "INIT_REBOOT";
pub const CODE_RESET: &str = "EPOCH_REINIT";
pub const CODE_CADON: &str = "CADON";
pub const CODE_CADOFF: &str = "CADOFF";
pub const CODE_OBJSTART: &str = "OBJSTART";
pub const CODE_OBJSTOP: &str = "OBJSTOP";
pub const CODE_OBJENABLE: &str = "OBJENABLE";
pub const CODE_OBJDISABLE: &str = "OBJDISABLE";
pub const CODE_OBJRELOAD: &str = "OBJRELOAD";
pub const CODE_OBJRLS_CHECK: &str = "OBJRLS_CHECK";
pub const CODE_OBJRLS_ADD: &str = "OBJRLS_ADD";
pub const CODE_OBJRLS_DEL: &str = "OBJRLS_DEL";
pub const CODE_RUNLEVEL: &str = "RUNLEVEL";
pub const CODE_GETRL: &str = "GETRL";
pub const CODE_KILLOBJ: &str = "KILLOBJ";
pub const CODE_SENDPID: &str = "SENDPID";
pub const CODE_LSOBJS: &str = "LSOBJS";
pub const CODE_RXD: &str = "RXD";
pub const CODE_RXD_OPTS: &str = "ORXD";

/// Version tag carried by every LSOBJS status frame. Relevant object options
/// change between releases, so both ends check this before decoding.
pub const LSOBJS_VERSION: &str = "V4";

// ============================================================================
// Supervision timing
// ============================================================================

/// Primary loop tick length.
pub const TICK_MILLIS: u64 = 50;

/// Heavy work (membus, halt schedule, restart scan) runs every N ticks.
pub const HEAVY_TICK_EVERY: u32 = 5;

/// PID rescans for running services happen every N heavy ticks (~1 minute).
pub const PID_RESCAN_EVERY: u32 = 240;

/// Default floor between restarts before the loop safeguard trips.
pub const RESTART_FLOOR_SECS: u32 = 5;

/// Default seconds to wait for a stopping process to disappear.
pub const STOP_TIMEOUT_SECS: u32 = 10;

/// Every bounded wait in the system (membus ping, pidfile appearance,
/// fork PID discovery) gives up after this long.
pub const WAIT_TIMEOUT_SECS: u32 = 10;

/// Wall warnings begin this many minutes before a scheduled halt.
pub const HALT_WARN_WINDOW_MINS: i64 = 20;

// ============================================================================
// Limits
// ============================================================================

/// Longest accepted config line, description, or wire message body.
pub const MAX_LINE_SIZE: usize = 2048;

/// An object may map at most this many exit statuses.
pub const MAX_EXIT_MAPPINGS: usize = 8;

/// Version banner printed at boot and by the CLI.
pub const VERSION_STRING: &str = concat!("Epoch Init System ", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membus_key_matches_historical_derivation() {
        // (sum of "EPOCH") + (sum of "WhiteRat") = 367 + 808, times 7.
        assert_eq!(MEMBUS_KEY, (367 + 808) * 7);
        assert_eq!(MEMBUS_KEY, 8225);
    }

    #[test]
    fn membus_halves_fit_region() {
        assert_eq!(MEMBUS_REGION_SIZE, 16 + MEMBUS_HALF * 2);
        assert!(MEMBUS_MSGSIZE < MEMBUS_HALF - 1);
    }
}

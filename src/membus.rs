//! The membus: a shared-memory duplex message channel between the init
//! server and one co-resident CLI client.
//!
//! The region holds a client lock (PID + acquisition time) and two halves,
//! each a one-byte status slot followed by a message area. Each side writes
//! requests into its *peer's* half and reads replies from its own, with the
//! `NOMSG`/`MSG` status toggle serializing one in-flight message per
//! direction. Clients prove the server is alive with a ping status before
//! taking the lock.

use std::time::{Duration, Instant};

use crate::{
    clock,
    constants::{
        MEMBUS_CLIENT_OFFSET, MEMBUS_KEY, MEMBUS_LOCK_PID_OFFSET, MEMBUS_LOCK_STALE_SECS,
        MEMBUS_LOCK_TIME_OFFSET, MEMBUS_MSG, MEMBUS_MSGSIZE, MEMBUS_NOMSG, MEMBUS_PING_MSG,
        MEMBUS_PING_NOMSG, MEMBUS_REGION_SIZE, MEMBUS_SERVER_OFFSET, WAIT_TIMEOUT_SECS,
    },
    error::BusError,
};

/// One attached end of the bus.
#[derive(Debug)]
pub struct MemBus {
    shmid: libc::c_int,
    root: *mut u8,
    server_side: bool,
    detached: bool,
}

// The region is plain shared memory; the raw pointer is valid for the
// lifetime of the attachment and this process only ever runs one thread
// against it.
unsafe impl Send for MemBus {}

impl MemBus {
    /// Creates (server) the region under the given key, zeroed, with the
    /// server slot marked idle.
    pub fn init_server(key: libc::c_int) -> Result<MemBus, BusError> {
        let shmid = unsafe {
            libc::shmget(key, MEMBUS_REGION_SIZE, libc::IPC_CREAT | 0o660)
        };
        if shmid < 0 {
            return Err(BusError::Open(nix::errno::Errno::last()));
        }
        let root = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if root as isize == -1 {
            return Err(BusError::Open(nix::errno::Errno::last()));
        }
        let bus = MemBus { shmid, root: root as *mut u8, server_side: true, detached: false };
        unsafe {
            std::ptr::write_bytes(bus.root, 0, MEMBUS_REGION_SIZE);
        }
        bus.set_status(MEMBUS_SERVER_OFFSET, MEMBUS_NOMSG);
        Ok(bus)
    }

    /// Attaches (client) to an existing region: waits for the server slot to
    /// initialize, respects the client lock, pings the server, then takes
    /// the lock.
    pub fn init_client(key: libc::c_int) -> Result<MemBus, BusError> {
        let shmid = unsafe { libc::shmget(key, MEMBUS_REGION_SIZE, 0o660) };
        if shmid < 0 {
            return Err(BusError::Open(nix::errno::Errno::last()));
        }
        let root = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if root as isize == -1 {
            return Err(BusError::Open(nix::errno::Errno::last()));
        }
        let mut bus =
            MemBus { shmid, root: root as *mut u8, server_side: false, detached: false };

        // The server may itself be mid-startup.
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        loop {
            let status = bus.status(MEMBUS_SERVER_OFFSET);
            if status == MEMBUS_NOMSG || status == MEMBUS_MSG {
                break;
            }
            if Instant::now() >= deadline {
                bus.detach();
                return Err(BusError::ServerNotReady);
            }
            std::thread::sleep(Duration::from_micros(100));
        }

        let own_pid = std::process::id() as u64;
        let lock_pid = bus.lock_pid();
        if lock_pid != 0 && lock_pid != own_pid {
            bus.detach();
            return Err(BusError::Locked(lock_pid));
        }

        // Ping: flip the server status to the matching PING code and wait
        // for the server's heavy tick to flip it back.
        let status = bus.status(MEMBUS_SERVER_OFFSET);
        let ping = if status == MEMBUS_MSG { MEMBUS_PING_MSG } else { MEMBUS_PING_NOMSG };
        bus.set_status(MEMBUS_SERVER_OFFSET, ping);
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        while bus.status(MEMBUS_SERVER_OFFSET) == ping {
            if Instant::now() >= deadline {
                bus.detach();
                return Err(BusError::PingTimeout);
            }
            std::thread::sleep(Duration::from_micros(100));
        }

        bus.set_lock(own_pid, clock::unix_now() as u64);
        bus.set_status(MEMBUS_CLIENT_OFFSET, MEMBUS_NOMSG);
        Ok(bus)
    }

    /// Server under the default key.
    pub fn server() -> Result<MemBus, BusError> {
        MemBus::init_server(MEMBUS_KEY)
    }

    /// Client under the default key.
    pub fn client() -> Result<MemBus, BusError> {
        MemBus::init_client(MEMBUS_KEY)
    }

    /// Does a region exist under this key right now?
    pub fn region_exists(key: libc::c_int) -> bool {
        unsafe { libc::shmget(key, MEMBUS_REGION_SIZE, 0o660) >= 0 }
    }

    /// Marks the region under `key` for removal without an attachment.
    /// Last-resort cleanup on paths that no longer hold a `MemBus`.
    pub fn remove_region(key: libc::c_int) {
        unsafe {
            let shmid = libc::shmget(key, MEMBUS_REGION_SIZE, 0o660);
            if shmid >= 0 {
                libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
            }
        }
    }

    // ------------------------------------------------------------------
    // Raw slot access
    // ------------------------------------------------------------------

    fn status(&self, offset: usize) -> u8 {
        unsafe { std::ptr::read_volatile(self.root.add(offset)) }
    }

    fn set_status(&self, offset: usize, value: u8) {
        unsafe { std::ptr::write_volatile(self.root.add(offset), value) }
    }

    fn lock_pid(&self) -> u64 {
        unsafe { std::ptr::read_volatile(self.root.add(MEMBUS_LOCK_PID_OFFSET) as *const u64) }
    }

    fn lock_time(&self) -> u64 {
        unsafe { std::ptr::read_volatile(self.root.add(MEMBUS_LOCK_TIME_OFFSET) as *const u64) }
    }

    fn set_lock(&self, pid: u64, time: u64) {
        unsafe {
            std::ptr::write_volatile(self.root.add(MEMBUS_LOCK_PID_OFFSET) as *mut u64, pid);
            std::ptr::write_volatile(self.root.add(MEMBUS_LOCK_TIME_OFFSET) as *mut u64, time);
        }
    }

    /// Offset of the half this side reads from.
    fn own_offset(&self) -> usize {
        if self.server_side { MEMBUS_SERVER_OFFSET } else { MEMBUS_CLIENT_OFFSET }
    }

    /// Offset of the half this side writes into.
    fn peer_offset(&self) -> usize {
        if self.server_side { MEMBUS_CLIENT_OFFSET } else { MEMBUS_SERVER_OFFSET }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Sends a text message, waiting up to the bus timeout for the peer to
    /// finish with its previous one.
    pub fn write(&self, message: &str) -> Result<(), BusError> {
        self.bin_write(message.as_bytes()).map(|_| ())
    }

    /// Sends raw bytes, length-capped to the message size. The payload is
    /// NUL-terminated in the slot so text reads stay bounded.
    pub fn bin_write(&self, data: &[u8]) -> Result<usize, BusError> {
        let offset = self.peer_offset();
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        while self.status(offset) != MEMBUS_NOMSG {
            if Instant::now() >= deadline {
                return Err(BusError::WriteTimeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let len = data.len().min(MEMBUS_MSGSIZE);
        unsafe {
            let payload = self.root.add(offset + 1);
            std::ptr::copy_nonoverlapping(data.as_ptr(), payload, len);
            std::ptr::write_volatile(payload.add(len), 0);
        }
        self.set_status(offset, MEMBUS_MSG);
        Ok(len)
    }

    /// Non-blocking text receive from this side's own slot.
    pub fn read(&self) -> Option<String> {
        let mut buffer = [0u8; MEMBUS_MSGSIZE + 1];
        let len = self.bin_read(&mut buffer)?;
        let terminated = buffer[..len].iter().position(|&b| b == 0).unwrap_or(len);
        Some(String::from_utf8_lossy(&buffer[..terminated]).into_owned())
    }

    /// Non-blocking binary receive. Returns the bytes copied, or `None`
    /// when no message is pending.
    pub fn bin_read(&self, buffer: &mut [u8]) -> Option<usize> {
        let offset = self.own_offset();
        if self.status(offset) != MEMBUS_MSG {
            return None;
        }
        let len = buffer.len().min(MEMBUS_MSGSIZE);
        unsafe {
            std::ptr::copy_nonoverlapping(self.root.add(offset + 1), buffer.as_mut_ptr(), len);
        }
        self.set_status(offset, MEMBUS_NOMSG);
        Some(len)
    }

    /// Blocking text receive with the standard bus timeout.
    pub fn read_blocking(&self) -> Result<String, BusError> {
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        loop {
            if let Some(message) = self.read() {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Err(BusError::WriteTimeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Blocking binary receive with the standard bus timeout.
    pub fn bin_read_blocking(&self, buffer: &mut [u8]) -> Result<usize, BusError> {
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        loop {
            if let Some(len) = self.bin_read(buffer) {
                return Ok(len);
            }
            if Instant::now() >= deadline {
                return Err(BusError::WriteTimeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Waits for the peer to consume the message sitting in its half.
    /// Used before tearing the bus down under a just-sent reply.
    pub fn wait_peer_drained(&self) -> bool {
        let offset = self.peer_offset();
        let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64);
        while self.status(offset) == MEMBUS_MSG {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    // ------------------------------------------------------------------
    // Server housekeeping
    // ------------------------------------------------------------------

    /// Answers a client liveness ping by restoring the pre-ping status.
    /// Returns true when a ping was answered.
    pub fn handle_pings(&self) -> bool {
        match self.status(MEMBUS_SERVER_OFFSET) {
            MEMBUS_PING_MSG => {
                self.set_status(MEMBUS_SERVER_OFFSET, MEMBUS_MSG);
                true
            }
            MEMBUS_PING_NOMSG => {
                self.set_status(MEMBUS_SERVER_OFFSET, MEMBUS_NOMSG);
                true
            }
            _ => false,
        }
    }

    /// Force-releases the lock of a client that died holding it. Returns
    /// false when a stale client was disconnected.
    pub fn check_integrity(&self) -> bool {
        if self.lock_pid() == 0 {
            return true;
        }
        if (self.lock_time() as i64) + MEMBUS_LOCK_STALE_SECS < clock::unix_now() {
            self.set_status(MEMBUS_SERVER_OFFSET, MEMBUS_NOMSG);
            self.set_status(MEMBUS_CLIENT_OFFSET, MEMBUS_NOMSG);
            unsafe {
                std::ptr::write_volatile(self.root.add(MEMBUS_SERVER_OFFSET + 1), 0);
                std::ptr::write_volatile(self.root.add(MEMBUS_CLIENT_OFFSET + 1), 0);
            }
            self.set_lock(0, 0);
            return false;
        }
        true
    }

    /// Backdates the lock acquisition time. Test hook for staleness checks.
    #[doc(hidden)]
    pub fn age_lock_for_tests(&self, seconds: i64) {
        let pid = self.lock_pid();
        self.set_lock(pid, (clock::unix_now() - seconds) as u64);
    }

    fn detach(&mut self) {
        if !self.detached {
            unsafe {
                libc::shmdt(self.root as *const libc::c_void);
            }
            self.detached = true;
        }
    }

    /// Tears down this end. The server marks the region for removal; the
    /// client releases its lock.
    pub fn shutdown(&mut self) {
        if self.detached {
            return;
        }
        self.set_status(MEMBUS_CLIENT_OFFSET, MEMBUS_NOMSG);
        if self.server_side {
            self.set_status(MEMBUS_SERVER_OFFSET, MEMBUS_NOMSG);
            unsafe {
                libc::shmctl(self.shmid, libc::IPC_RMID, std::ptr::null_mut());
            }
        } else {
            self.set_lock(0, 0);
        }
        self.detach();
    }
}

impl Drop for MemBus {
    fn drop(&mut self) {
        // Detach quietly; region removal stays an explicit decision.
        self.detach();
    }
}

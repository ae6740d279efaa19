//! The primary loop: zombie reaping, membus pumping, scheduled halts, and
//! auto-restart supervision.

use std::time::Duration;

use tracing::info;

use crate::{
    applets, boot,
    clock::{self, WallTime},
    config::Config,
    constants::{
        HALT_WARN_WINDOW_MINS, HEAVY_TICK_EVERY, OSCTL_HALT, OSCTL_POWEROFF, OSCTL_REBOOT,
        PID_RESCAN_EVERY, TICK_MILLIS,
    },
    executor, logging, membus::MemBus,
    pids, protocol, reexec, signals,
};

/// Which way the system goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltMode {
    Halt,
    Poweroff,
    Reboot,
}

impl HaltMode {
    /// The reboot(2) command code for this mode.
    pub fn reboot_code(self) -> u32 {
        match self {
            HaltMode::Halt => OSCTL_HALT,
            HaltMode::Poweroff => OSCTL_POWEROFF,
            HaltMode::Reboot => OSCTL_REBOOT,
        }
    }

    /// The word used in wall broadcasts and log lines.
    pub fn verb(self) -> &'static str {
        match self {
            HaltMode::Halt => "halt",
            HaltMode::Poweroff => "poweroff",
            HaltMode::Reboot => "reboot",
        }
    }

    pub fn from_code(code: u32) -> Option<HaltMode> {
        match code {
            OSCTL_HALT => Some(HaltMode::Halt),
            OSCTL_POWEROFF => Some(HaltMode::Poweroff),
            OSCTL_REBOOT => Some(HaltMode::Reboot),
            _ => None,
        }
    }
}

/// The single pending scheduled halt. Scheduling while one is pending fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltSchedule {
    pub mode: HaltMode,
    pub target: WallTime,
    pub job_id: u32,
}

/// All state the running init server owns.
pub struct Server {
    pub config: Config,
    pub bus: Option<MemBus>,
    pub halt: Option<HaltSchedule>,
    pub next_job_id: u32,
    /// `(job_id, minutes_remaining)` of the last countdown broadcast, so the
    /// second rollover doesn't repeat it.
    last_warned: Option<(u32, i64)>,
    heavy_counter: u32,
    rescan_counter: u32,
    stop_loop: bool,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Server {
            config,
            bus: None,
            halt: None,
            next_job_id: 0,
            last_warned: None,
            heavy_counter: 0,
            rescan_counter: 0,
            stop_loop: false,
        }
    }

    /// Brings up the server side of the membus.
    pub fn start_bus(&mut self) -> Result<(), crate::error::BusError> {
        self.bus = Some(MemBus::server()?);
        Ok(())
    }

    /// Registers a new scheduled halt. Fails when one is already pending.
    pub fn schedule_halt(&mut self, mode: HaltMode, target: WallTime) -> Result<u32, ()> {
        if self.halt.is_some() {
            return Err(());
        }
        self.next_job_id += 1;
        let job_id = self.next_job_id;
        self.halt = Some(HaltSchedule { mode, target, job_id });
        Ok(job_id)
    }

    /// Cancels the pending halt, returning it for the abort broadcast.
    pub fn cancel_halt(&mut self) -> Option<HaltSchedule> {
        self.halt.take()
    }

    /// The loop that runs from the end of bootup until reboot, halt, or
    /// re-exec replaces the process.
    pub fn run(&mut self) {
        self.stop_loop = false;
        while !self.stop_loop {
            self.tick();
            std::thread::sleep(Duration::from_millis(TICK_MILLIS));
        }
    }

    /// Stops `run` at the end of the current iteration.
    pub fn request_stop(&mut self) {
        self.stop_loop = true;
    }

    /// One loop iteration. The heavy phase runs every few ticks so the
    /// zombie harvest stays hot without hammering /proc and the bus.
    pub fn tick(&mut self) {
        pids::reap_zombies();

        if signals::take_reexec_request() {
            logging::write_line("received SIGUSR2, re-executing as requested");
            reexec::reexecute_epoch(self);
        }
        if signals::take_reboot_request() {
            boot::launch_shutdown(self, HaltMode::Reboot);
        }

        self.heavy_counter += 1;
        if self.heavy_counter >= HEAVY_TICK_EVERY {
            self.heavy_counter = 0;
            self.heavy_tick();
        }
    }

    fn heavy_tick(&mut self) {
        if let Some(bus) = &self.bus {
            bus.handle_pings();
            bus.check_integrity();
        }
        protocol::pump(self);
        self.evaluate_halt_schedule();
        self.poll_auto_restart();

        self.rescan_counter += 1;
        if self.rescan_counter >= PID_RESCAN_EVERY {
            self.rescan_counter = 0;
            self.rescan_pids();
        }
    }

    /// Fires a due scheduled halt, or broadcasts the countdown once per
    /// minute inside the warning window.
    fn evaluate_halt_schedule(&mut self) {
        let Some(schedule) = self.halt else {
            return;
        };
        if schedule.target.is_due() {
            boot::launch_shutdown(self, schedule.mode);
        }
        let remaining = schedule.target.minutes_until();
        if remaining > 0 && remaining <= HALT_WARN_WINDOW_MINS {
            let key = (schedule.job_id, remaining);
            if self.last_warned != Some(key) {
                self.last_warned = Some(key);
                applets::emul_wall(
                    &format!(
                        "System is going down for {} in {} minutes!",
                        schedule.mode.verb(),
                        remaining
                    ),
                    false,
                );
            }
        }
    }

    /// Restarts dead auto-restart objects, guarding against restart loops.
    pub fn poll_auto_restart(&mut self) {
        let global_env = self.config.store.global_env.clone();
        let now = clock::unix_now();

        for idx in 0..self.config.store.len() {
            let obj = &self.config.store.objects()[idx];
            if !(obj.opts.auto_restart && obj.started) {
                continue;
            }
            if pids::object_process_running(obj) {
                continue;
            }

            let obj = &mut self.config.store.objects_mut()[idx];

            // Services re-fork and change PIDs; try to follow before
            // declaring them dead.
            if obj.pidfile.is_none() && pids::advanced_pid_find(obj, true) != 0 {
                continue;
            }

            if obj.started_since + obj.opts.restart_floor_secs as i64 > now {
                let text = format!(
                    "AUTORESTART: object {} died within {} seconds of starting; \
                     marking it stopped (restart loop safeguard)",
                    obj.id, obj.opts.restart_floor_secs
                );
                info!("{text}");
                logging::write_line(&text);
                obj.mark_stopped();
                continue;
            }

            let text = format!("AUTORESTART: object {} is not running, restarting", obj.id);
            info!("{text}");
            logging::write_line(&text);

            let interactive = obj.opts.interactive;
            let outcome = executor::process_object(obj, &global_env, true, interactive);
            let text = if outcome.ok() {
                format!("AUTORESTART: object {} successfully restarted", obj.id)
            } else {
                obj.mark_stopped();
                format!("AUTORESTART: failed to restart object {}; marking it stopped", obj.id)
            };
            info!("{text}");
            logging::write_line(&text);
        }
    }

    /// Periodic refresh of tracked PIDs for running pidfile-less services.
    fn rescan_pids(&mut self) {
        for idx in 0..self.config.store.len() {
            let obj = &mut self.config.store.objects_mut()[idx];
            if obj.started && obj.pidfile.is_none() && !obj.opts.no_track {
                pids::advanced_pid_find(obj, true);
            }
        }
    }
}

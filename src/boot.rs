//! Bootup and shutdown orchestration, the emergency shell, and the two ways
//! an object can replace init outright (exec and pivot_root).

use std::{
    ffi::CString,
    io::BufRead,
    path::{Path, PathBuf},
};

use tracing::{error, warn};

use crate::{
    applets, config::{self, Config, MountRequest},
    console,
    constants::{
        ENV_HOME, ENV_PATH, ENV_SHELL, ENV_USER, MEMBUS_KEY, OSCTL_DISABLE_CTRLALTDEL,
        SHELL_PATH, VERSION_STRING,
    },
    executor::current_task,
    logging, membus::MemBus,
    runlevel,
    supervisor::{HaltMode, Server},
};

fn cstring(text: &str) -> CString {
    CString::new(text.as_bytes()).unwrap_or_else(|_| CString::new("").expect("empty"))
}

fn set_default_environment() {
    unsafe {
        std::env::set_var("HOME", ENV_HOME);
        std::env::set_var("USER", ENV_USER);
        std::env::set_var("PATH", ENV_PATH);
        std::env::set_var("SHELL", ENV_SHELL);
    }
}

/// Mounts the virtual filesystems configuration asked for.
fn mount_virtuals(mounts: &[MountRequest]) {
    for request in mounts {
        let target = request.fs.mount_point();
        if request.mkdir {
            if let Err(err) = std::fs::create_dir_all(target) {
                warn!("failed to create mount point {target}: {err}");
            }
        }
        let source = cstring(request.fs.fs_type());
        let target_c = cstring(target);
        let fstype = cstring(request.fs.fs_type());
        let data = if request.fs == crate::config::VirtualFs::DevPts {
            Some(cstring("gid=5,mode=620"))
        } else {
            None
        };
        let rc = unsafe {
            libc::mount(
                source.as_ptr(),
                target_c.as_ptr(),
                fstype.as_ptr(),
                0,
                data.as_ref().map_or(std::ptr::null(), |d| d.as_ptr() as *const libc::c_void),
            )
        };
        if rc != 0 {
            if !request.ignore_errors {
                let text = format!("failed to mount virtual filesystem {target}");
                warn!("{text}");
                logging::write_line(&text);
            }
        } else {
            logging::write_line(&format!("mounted virtual filesystem {target}"));
        }
    }
}

fn apply_identity(settings: &crate::config::Settings) {
    if let Some(hostname) = &settings.hostname {
        match nix::unistd::sethostname(hostname) {
            Ok(()) => logging::write_line(&format!("hostname set to \"{hostname}\"")),
            Err(err) => {
                let text = format!("unable to set hostname to \"{hostname}\": {err}");
                warn!("{text}");
                logging::write_line(&text);
            }
        }
    }
    if let Some(domainname) = &settings.domainname {
        let name = cstring(domainname);
        if unsafe { libc::setdomainname(name.as_ptr(), domainname.len()) } != 0 {
            warn!("unable to set domainname to \"{domainname}\"");
        }
    }
}

/// Asks the console for a usable runlevel when the configured one names
/// nothing. An empty answer drops to the emergency shell.
fn prompt_for_runlevel(config: &mut Config) {
    let stdin = std::io::stdin();
    loop {
        println!(
            "Please enter a valid runlevel to continue,\n\
             or strike enter to go to an emergency shell.\n"
        );
        print!("--> ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            emergency_shell();
        }
        let answer = answer.trim();
        if answer.is_empty() {
            println!("Starting emergency shell as per your request.");
            emergency_shell();
        }
        if config.store.valid_runlevel(answer) {
            println!("Runlevel accepted.\n");
            config.store.current_runlevel = answer.to_string();
            return;
        }
        eprintln!("The runlevel you entered was not found. Please try again.\n");
    }
}

/// Everything PID 1 does from the kernel handing us control to entering the
/// primary loop.
pub fn launch_bootup(config_path: PathBuf, runlevel_override: Option<String>) -> ! {
    let _ = nix::unistd::setsid();

    println!("\n{VERSION_STRING}\n");
    set_default_environment();

    if config_path != Path::new(crate::constants::CONFIG_DIR).join(crate::constants::CONFIG_NAME)
    {
        println!("Using configuration file \"{}\".\n", config_path.display());
    }
    if let Some(runlevel) = &runlevel_override {
        println!("Booting to runlevel \"{runlevel}\".\n");
    }

    let mut config = match config::load(&config_path, runlevel_override.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("cannot load configuration: {err}");
            emergency_shell();
        }
    };

    logging::set_enabled(config.settings.enable_logging);
    if let Some(log_file) = &config.settings.log_file {
        logging::set_log_file(log_file);
    }

    let report = config.store.scan_integrity();
    if !report.outcome.ok() {
        error!("configuration integrity check failed");
        emergency_shell();
    }
    if report.runlevel_invalid {
        prompt_for_runlevel(&mut config);
    }

    console::print_boot_banner(
        config.settings.banner_text.as_deref(),
        config.settings.banner_color.as_deref(),
    );
    logging::write_line(&format!("{VERSION_STRING} booting up"));

    mount_virtuals(&config.settings.mounts);
    apply_identity(&config.settings);

    if config.settings.disable_cad {
        if unsafe { libc::reboot(OSCTL_DISABLE_CTRLALTDEL as libc::c_int) } == 0 {
            logging::write_line("taken control of CTRL-ALT-DEL events");
        } else {
            let text = "unable to take control of CTRL-ALT-DEL events";
            warn!("{text}");
            logging::write_line(text);
        }
    } else {
        logging::write_line("not requesting control of CTRL-ALT-DEL events");
    }

    logging::write_line("starting all objects");
    if !runlevel::run_all_objects(&mut config.store, true).ok() {
        emergency_shell();
    }

    // The log filesystem should be writable by now.
    logging::finalise(config.settings.blank_log_on_boot);
    logging::write_line("bootup complete");

    let mut server = Server::new(config);
    if let Err(err) = server.start_bus() {
        let text = format!(
            "MEMBUS FAILURE: {err}; you won't be able to control the system with epoch"
        );
        error!("{text}");
        logging::write_line(&text);
        eprint!("\x07");
    }

    server.run();
    // The loop only breaks for test harnesses; PID 1 must never return.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

/// Ordered teardown: stop sweep, config shutdown, sync, and the reboot
/// syscall. Never returns; a failed teardown lands in the emergency shell.
pub fn launch_shutdown(server: &mut Server, mode: HaltMode) -> ! {
    applets::emul_wall(
        &format!("System is going down for {} NOW!", mode.verb()),
        false,
    );
    if !server.config.settings.blank_log_on_boot {
        logging::write_line(match mode {
            HaltMode::Reboot => "rebooting",
            _ => "shutting down",
        });
    }
    logging::set_enabled(false);

    // A synchronous child (or polling wait) must not outlive us.
    if current_task::is_set() {
        println!(
            "{}Killing task {}.{}",
            console::COLOR_YELLOW,
            current_task::name(),
            console::END_COLOR
        );
        let pid = current_task::pid();
        current_task::kill_blocking();
        if pid != 0 {
            let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
        }
        current_task::clear();
    }

    // Bring down the bus first; no further commands can reach us.
    if let Some(mut bus) = server.bus.take() {
        bus.shutdown();
    }

    println!(
        "{}{}{}",
        console::COLOR_RED,
        match mode {
            HaltMode::Reboot => "Rebooting.",
            _ => "Shutting down.",
        },
        console::END_COLOR
    );

    if !runlevel::run_all_objects(&mut server.config.store, false).ok() {
        error!("failed to complete the shutdown sequence");
        emergency_shell();
    }

    server.config.store.shutdown();

    println!(
        "{}Attempting to {} the system...{}",
        console::COLOR_CYAN,
        mode.verb(),
        console::END_COLOR
    );

    nix::unistd::sync();
    unsafe {
        libc::reboot(mode.reboot_code() as libc::c_int);
    }

    // reboot(2) only returns on failure.
    error!("reboot syscall failed");
    emergency_shell();
}

/// Syncs, releases what can be released without a handle, and becomes a
/// shell. PID 1 must never exit, so a failed exec sleeps forever.
pub fn emergency_shell() -> ! {
    eprintln!(
        "\n{}Preparing to start emergency shell.{}\n---",
        console::COLOR_MAGENTA,
        console::END_COLOR
    );
    eprintln!("Syncing disks...");
    nix::unistd::sync();

    eprintln!("Shutting down epoch...");
    MemBus::remove_region(MEMBUS_KEY);

    eprintln!("Launching the shell...");
    let shell = cstring(SHELL_PATH);
    let argv = [cstring("sh")];
    let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
    let _ = nix::unistd::execv(&shell, &argv_refs);

    eprintln!("Failed to start emergency shell! Sleeping forever.");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

fn reset_signal_handlers() {
    unsafe {
        for signum in 1..32 {
            libc::signal(signum, libc::SIG_DFL);
        }
    }
}

fn exec_command_line(command: &str) {
    let argv: Vec<CString> = command.split_whitespace().map(cstring).collect();
    if let Some(first) = argv.first() {
        let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|a| a.as_c_str()).collect();
        let _ = nix::unistd::execvp(first, &argv_refs);
    }
}

/// Replaces init with the given command (the EXEC object option). Returns
/// only if the exec failed.
pub fn perform_exec(command: &str) {
    logging::write_line(&format!("replacing init with \"{command}\""));
    nix::unistd::sync();
    MemBus::remove_region(MEMBUS_KEY);
    reset_signal_handlers();
    exec_command_line(command);
    warn!("failed to exec \"{command}\"");
}

/// The PIVOT object option: the start command is
/// `<new_root> <put_old> [replacement init...]`. Pivots the root filesystem
/// and execs the replacement (default `/sbin/init`). Any failure lands in
/// the emergency shell, so this never returns.
pub fn perform_pivot_root(start_cmd: &str) -> ! {
    let mut words = start_cmd.split_whitespace();
    let (Some(new_root), Some(put_old)) = (words.next(), words.next()) else {
        error!("malformed pivot command \"{start_cmd}\"");
        emergency_shell();
    };
    let replacement = {
        let rest: Vec<&str> = words.collect();
        if rest.is_empty() { "/sbin/init".to_string() } else { rest.join(" ") }
    };

    logging::write_line(&format!("performing a pivot root to {new_root}"));
    logging::set_enabled(false);
    nix::unistd::sync();
    MemBus::remove_region(MEMBUS_KEY);

    let new_root_c = cstring(new_root);
    let put_old_c = cstring(put_old);
    let rc = unsafe {
        libc::syscall(libc::SYS_pivot_root, new_root_c.as_ptr(), put_old_c.as_ptr())
    };
    if rc != 0 {
        error!("pivot_root to \"{new_root}\" failed");
        emergency_shell();
    }

    let _ = nix::unistd::chdir("/");
    reset_signal_handlers();
    exec_command_line(&replacement);

    error!("exec failed after pivot_root");
    emergency_shell();
}

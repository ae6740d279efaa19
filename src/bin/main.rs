//! The multi-call entry point. The same binary is init itself (PID 1, or
//! `--init`, or the `!rxd REEXEC` re-exec handoff) and, under other names,
//! the management CLI and the classic applets.

use std::path::PathBuf;

use clap::Parser;

use epoch::{
    boot, cli,
    constants::{CONFIG_DIR, CONFIG_NAME, ENV_CONFIG_OVERRIDE, ENV_RUNLEVEL_OVERRIDE,
        ENV_RXD_VIA_MEMBUS},
    logging, reexec, signals,
    supervisor::HaltMode,
};

/// The command name we were invoked under, from the tail of argv[0].
fn invoked_as(argv0: &str) -> &str {
    argv0.rsplit('/').next().unwrap_or(argv0)
}

fn config_path() -> PathBuf {
    match std::env::var(ENV_CONFIG_OVERRIDE) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(CONFIG_DIR).join(CONFIG_NAME),
    }
}

fn runlevel_override() -> Option<String> {
    std::env::var(ENV_RUNLEVEL_OVERRIDE).ok().filter(|name| !name.is_empty())
}

fn main() {
    logging::init_tracing();
    signals::install_base_handlers();

    let args: Vec<String> = std::env::args().collect();
    let argv0 = args.first().cloned().unwrap_or_else(|| "epoch".to_string());
    let name = invoked_as(&argv0);

    let is_reexec_handoff = argv0 == "!rxd" && args.get(1).map(String::as_str) == Some("REEXEC");
    let is_init = nix::unistd::getpid().as_raw() == 1
        || (args.len() == 2
            && (name == "epoch" || name == "init")
            && args[1] == "--init")
        || is_reexec_handoff;

    if is_init {
        if !nix::unistd::getuid().is_root() {
            eprintln!("Can't init as non-root.");
            std::process::exit(1);
        }
        signals::set_am_init(true);
        signals::install_init_handlers();

        if is_reexec_handoff {
            let via_membus = std::env::var(ENV_RXD_VIA_MEMBUS).is_ok();
            if via_membus {
                unsafe { std::env::remove_var(ENV_RXD_VIA_MEMBUS) };
            }
            reexec::recover_from_reexec(via_membus, config_path(), runlevel_override());
        }

        // `epoch shell` on the kernel cmdline skips straight to a shell.
        if args.iter().skip(1).any(|arg| arg == "shell") {
            println!("Now launching a simple shell as per your request.");
            boot::emergency_shell();
        }

        boot::launch_bootup(config_path(), runlevel_override());
    }

    let code = match name {
        "halt" => power_applet(HaltMode::Halt, &args[1..]),
        "reboot" => power_applet(HaltMode::Reboot, &args[1..]),
        "poweroff" => power_applet(HaltMode::Poweroff, &args[1..]),
        "shutdown" => cli::run_shutdown_applet(&args[1..]),
        "wall" => cli::run_wall_applet(&args[1..]),
        "killall5" => cli::run_killall5_applet(&args[1..]),
        "init" => cli::run_init_applet(&args[1..]),
        // The management program proper; includes "epoch" and anything
        // unrecognized that symlinked us.
        _ => cli::run(cli::EpochCli::parse_from(args)),
    };
    std::process::exit(code);
}

fn power_applet(mode: HaltMode, args: &[String]) -> i32 {
    match args {
        [] => cli::run_power(mode, false),
        [flag] if flag == "-f" => cli::run_power(mode, true),
        _ => {
            eprintln!("Bad argument(s).");
            1
        }
    }
}

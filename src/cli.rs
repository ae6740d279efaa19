//! The argv-based front end. The binary answers to several names
//! (`epoch`, `init`, `halt`, `reboot`, `poweroff`, `shutdown`, `wall`,
//! `killall5`); each subcommand resolves to at most one membus verb.

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};

use crate::{
    applets, client,
    clock::{self, WallTime},
    console,
    constants::{
        CODE_ABORTHALT, CODE_CADOFF, CODE_CADON, CODE_HALT, CODE_OBJDISABLE, CODE_OBJENABLE,
        CODE_OBJRELOAD, CODE_OBJSTART, CODE_OBJSTOP, CODE_POWEROFF, CODE_REBOOT, VERSION_STRING,
    },
    error::Outcome,
    object::OptionTag,
    supervisor::HaltMode,
};

/// Management front end for the Epoch init system.
#[derive(Parser)]
#[command(name = "epoch", version, about, arg_required_else_help = true)]
pub struct EpochCli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the running version.
    Version,
    /// Power off the system (-f skips the supervisor and calls reboot(2)).
    Poweroff {
        /// Bypass init; sync and invoke the syscall directly.
        #[arg(short)]
        force: bool,
    },
    /// Halt the system.
    Halt {
        #[arg(short)]
        force: bool,
    },
    /// Reboot the system.
    Reboot {
        #[arg(short)]
        force: bool,
    },
    /// Schedule or cancel a shutdown (wrapper around the shutdown applet).
    #[command(disable_help_flag = true)]
    Shutdown {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Re-execute the init binary from disk, keeping supervised state.
    Reexec,
    /// Reload the configuration file in place.
    Configreload,
    /// Print status for one object, or all of them.
    Status { object: Option<String> },
    /// Print the current runlevel, or switch to a new one.
    Runlevel { name: Option<String> },
    /// Enable or disable instant Ctrl-Alt-Del reboot.
    Setcad { state: String },
    /// Enable objects (persisted to their config files).
    Enable { objects: Vec<String> },
    /// Disable objects.
    Disable { objects: Vec<String> },
    /// Start objects.
    Start { objects: Vec<String> },
    /// Stop objects.
    Stop { objects: Vec<String> },
    /// Stop, then start objects.
    Restart { objects: Vec<String> },
    /// Run objects' reload commands (or signals).
    Reload { objects: Vec<String> },
    /// Print the PID on record for an object.
    Getpid { object: String },
    /// SIGKILL an object's tracked PID.
    Kill { object: String },
    /// Check or change an object's runlevel membership.
    Objrl {
        object: String,
        /// One of add, del, check.
        action: String,
        runlevel: String,
    },
}

fn connect_or_die() -> crate::membus::MemBus {
    match client::connect() {
        Ok(bus) => bus,
        Err(err) => {
            eprintln!("epoch: cannot reach the running init: {err}");
            std::process::exit(1);
        }
    }
}

fn exit_code(outcome: Outcome) -> i32 {
    if outcome.ok() { 0 } else { 1 }
}

/// Runs one `epoch` subcommand, returning the process exit code.
pub fn run(cli: EpochCli) -> i32 {
    match cli.command {
        Command::Version => {
            println!("{VERSION_STRING}");
            0
        }
        Command::Poweroff { force } => run_power(HaltMode::Poweroff, force),
        Command::Halt { force } => run_power(HaltMode::Halt, force),
        Command::Reboot { force } => run_power(HaltMode::Reboot, force),
        Command::Shutdown { args } => run_shutdown_applet(&args),
        Command::Reexec => {
            println!("Re-executing Epoch.");
            match client::request_reexec() {
                Outcome::Success => {
                    println!("Reexecution successful.");
                    0
                }
                _ => {
                    eprintln!("{}FAILED TO REEXECUTE!{}", console::COLOR_RED, console::END_COLOR);
                    1
                }
            }
        }
        Command::Configreload => {
            let mut bus = connect_or_die();
            let outcome = client::config_reload(&bus);
            bus.shutdown();
            match outcome {
                Outcome::Success => println!("Reload successful."),
                _ => eprintln!("Reload failed!"),
            }
            exit_code(outcome)
        }
        Command::Status { object } => run_status(object.as_deref()),
        Command::Runlevel { name } => {
            let mut bus = connect_or_die();
            let code = match name {
                None => match client::get_runlevel(&bus) {
                    Some(runlevel) => {
                        println!("Current runlevel is \"{runlevel}\".");
                        0
                    }
                    None => {
                        eprintln!("epoch: unable to read the current runlevel");
                        1
                    }
                },
                Some(target) => {
                    let outcome = client::set_runlevel(&bus, &target);
                    if !outcome.ok() {
                        eprintln!("Unable to switch to runlevel {target}.");
                    }
                    exit_code(outcome)
                }
            };
            bus.shutdown();
            code
        }
        Command::Setcad { state } => {
            let verb = match state.as_str() {
                "on" => CODE_CADON,
                "off" => CODE_CADOFF,
                _ => {
                    eprintln!("Bad parameter. Valid values are on and off.");
                    return 1;
                }
            };
            let mut bus = connect_or_die();
            let outcome = client::send_power_control(&bus, verb);
            bus.shutdown();
            match outcome {
                Outcome::Success => {
                    println!(
                        "Ctrl-Alt-Del instant reboot has been {}d.",
                        if verb == CODE_CADON { "enable" } else { "disable" }
                    );
                    0
                }
                _ => {
                    eprintln!("Failed to change Ctrl-Alt-Del instant reboot!");
                    1
                }
            }
        }
        Command::Enable { objects } => run_obj_batch(CODE_OBJENABLE, "Enabling", &objects),
        Command::Disable { objects } => run_obj_batch(CODE_OBJDISABLE, "Disabling", &objects),
        Command::Start { objects } => run_obj_batch(CODE_OBJSTART, "Starting", &objects),
        Command::Stop { objects } => run_obj_batch(CODE_OBJSTOP, "Stopping", &objects),
        Command::Reload { objects } => run_obj_batch(CODE_OBJRELOAD, "Reloading", &objects),
        Command::Restart { objects } => run_restart(&objects),
        Command::Getpid { object } => {
            let mut bus = connect_or_die();
            let result = client::get_pid(&bus, &object);
            bus.shutdown();
            match result {
                Some(pid) => {
                    println!("PID for object {object}: {pid}");
                    0
                }
                None => {
                    eprintln!("Unable to retrieve PID for object {object}.");
                    1
                }
            }
        }
        Command::Kill { object } => {
            let mut bus = connect_or_die();
            let outcome = client::kill_object(&bus, &object);
            bus.shutdown();
            match outcome {
                Outcome::Success => {
                    println!("Object {object} successfully killed.");
                    0
                }
                _ => {
                    eprintln!("Unable to kill object {object}.");
                    1
                }
            }
        }
        Command::Objrl { object, action, runlevel } => {
            if !matches!(action.as_str(), "add" | "del" | "check") {
                eprintln!("Invalid runlevel option {action}.");
                return 1;
            }
            let mut bus = connect_or_die();
            let code = match action.as_str() {
                "add" | "del" => {
                    let adding = action == "add";
                    let outcome = client::objrl_modify(&bus, &object, &runlevel, adding);
                    match (outcome.ok(), adding) {
                        (true, true) => println!("Object {object} added to runlevel {runlevel}"),
                        (true, false) => {
                            println!("Object {object} deleted from runlevel {runlevel}")
                        }
                        (false, true) => {
                            eprintln!("Unable to add {object} to runlevel {runlevel}!")
                        }
                        (false, false) => {
                            eprintln!("Unable to remove {object} from runlevel {runlevel}!")
                        }
                    }
                    exit_code(outcome)
                }
                "check" => match client::objrl_check(&bus, &object, &runlevel) {
                    Some('0') => {
                        println!("Object {object} is NOT enabled for runlevel {runlevel}.");
                        0
                    }
                    Some('1') => {
                        println!("Object {object} is enabled for runlevel {runlevel}.");
                        0
                    }
                    Some('2') => {
                        println!("Object {object} is inherited by runlevel {runlevel}.");
                        0
                    }
                    _ => {
                        eprintln!(
                            "Unable to determine if object {object} belongs to runlevel {runlevel}. Does it exist?"
                        );
                        1
                    }
                },
                other => {
                    eprintln!("Invalid runlevel option {other}.");
                    1
                }
            };
            bus.shutdown();
            code
        }
    }
}

fn power_verb(mode: HaltMode) -> &'static str {
    match mode {
        HaltMode::Halt => CODE_HALT,
        HaltMode::Poweroff => CODE_POWEROFF,
        HaltMode::Reboot => CODE_REBOOT,
    }
}

/// Shared by the `epoch poweroff/halt/reboot` subcommands and the
/// standalone applet names.
pub fn run_power(mode: HaltMode, force: bool) -> i32 {
    if force {
        nix::unistd::sync();
        unsafe {
            libc::reboot(mode.reboot_code() as libc::c_int);
        }
        eprintln!("epoch: reboot syscall failed; are you root?");
        return 1;
    }
    let mut bus = connect_or_die();
    let outcome = client::send_power_control(&bus, power_verb(mode));
    bus.shutdown();
    match outcome {
        Outcome::Success => {
            println!(
                "\n{}",
                match mode {
                    HaltMode::Halt => "System halt in progress.",
                    HaltMode::Poweroff => "Power off in progress.",
                    HaltMode::Reboot => "Reboot in progress.",
                }
            );
            0
        }
        _ => {
            eprintln!("Failed to request {}.", mode.verb());
            1
        }
    }
}

fn run_obj_batch(verb: &str, action: &str, objects: &[String]) -> i32 {
    if objects.is_empty() {
        eprintln!("Too few arguments.");
        return 1;
    }
    let mut bus = connect_or_die();
    let mut worst = Outcome::Success;
    for id in objects {
        let report = format!("{action} {id}");
        console::begin_status_report(&report);
        let outcome = client::obj_control(&bus, verb, id);
        console::complete_status_report(&report, outcome, false);
        worst = worst.worst_of(outcome);
    }
    bus.shutdown();
    exit_code(worst)
}

fn run_restart(objects: &[String]) -> i32 {
    if objects.is_empty() {
        eprintln!("Too few arguments.");
        return 1;
    }
    let mut bus = connect_or_die();
    let mut worst = Outcome::Success;
    for id in objects {
        let report = format!("Stopping {id}");
        console::begin_status_report(&report);
        let stopped = client::obj_control(&bus, CODE_OBJSTOP, id);
        console::complete_status_report(&report, stopped, false);
        if !stopped.ok() {
            worst = Outcome::Failure;
            continue;
        }
        let report = format!("Starting {id}");
        console::begin_status_report(&report);
        let started = client::obj_control(&bus, CODE_OBJSTART, id);
        console::complete_status_report(&report, started, false);
        worst = worst.worst_of(started);
    }
    bus.shutdown();
    exit_code(worst)
}

// ----------------------------------------------------------------------
// Status rendering
// ----------------------------------------------------------------------

fn yes_no(flag: bool) -> String {
    if flag {
        format!("{}Yes{}", console::COLOR_GREEN, console::END_COLOR)
    } else {
        format!("{}No{}", console::COLOR_RED, console::END_COLOR)
    }
}

fn option_name(tag: OptionTag) -> &'static str {
    match tag {
        OptionTag::HaltOnly => "HALTONLY",
        OptionTag::Persistent => "PERSISTENT",
        OptionTag::Fork => "FORK",
        OptionTag::Service => "SERVICE",
        OptionTag::AutoRestart => "AUTORESTART",
        OptionTag::ForceShell => "FORCESHELL",
        OptionTag::NoStopWait => "NOSTOPWAIT",
        OptionTag::StopTimeout => "STOPTIMEOUT",
        OptionTag::TermSignal => "TERMSIGNAL",
        OptionTag::RawDescription => "RAWDESCRIPTION",
        OptionTag::PivotRoot => "PIVOT",
        OptionTag::Exec => "EXEC",
        OptionTag::RunOnce => "RUNONCE",
        OptionTag::ForkScanOnce => "FORKN",
        OptionTag::NoTrack => "NOTRACK",
        OptionTag::StartFailCritical => "STARTFAILCRITICAL",
        OptionTag::StopFailCritical => "STOPFAILCRITICAL",
    }
}

fn run_status(filter: Option<&str>) -> i32 {
    let mut bus = connect_or_die();
    let result = client::fetch_status(&bus, filter);
    bus.shutdown();

    let objects = match result {
        Ok(objects) => objects,
        Err(err) => {
            eprintln!("epoch: {err}");
            return 1;
        }
    };
    if objects.is_empty() {
        match filter {
            Some(_) => eprintln!("Specified object not found."),
            None => eprintln!("No objects found!"),
        }
        return 1;
    }

    for obj in &objects {
        let inert = obj.options.iter().any(|tag| {
            matches!(tag, OptionTag::HaltOnly | OptionTag::PivotRoot | OptionTag::Exec)
        });
        println!("ObjectID: {}", obj.id);
        println!("ObjectDescription: {}", obj.description);
        let not_applicable =
            format!("{}N/A{}", console::COLOR_YELLOW, console::END_COLOR);
        println!(
            "Enabled: {} | Started: {} | Running: {} | Stop mode: {}{}",
            yes_no(obj.enabled),
            if inert { not_applicable.clone() } else { yes_no(obj.started) },
            if inert { not_applicable } else { yes_no(obj.running) },
            obj.stop_mode.map_or("?".to_string(), |mode| mode.to_string()),
            if obj.running { format!(" | PID: {}", obj.pid) } else { String::new() },
        );

        if obj.started && obj.started_since > 0 {
            if let Some(since) = Local.timestamp_opt(obj.started_since, 0).single() {
                let minutes = (clock::unix_now() - obj.started_since) / 60;
                println!(
                    "Started since {}, for total of {minutes} mins.",
                    since.format("%a %b %e %H:%M:%S %Y")
                );
            }
        }

        if !obj.options.is_empty() {
            let names: Vec<&str> = obj.options.iter().map(|&tag| option_name(tag)).collect();
            println!("Options: {}", names.join(" "));
        }
        for (value, status) in &obj.exit_map {
            println!(" MAPEXITSTATUS={status},{value}");
        }
        if !obj.runlevels.is_empty() {
            println!("Runlevels: {}", obj.runlevels.join(" "));
        }
        if obj.user_id != 0 || obj.group_id != 0 {
            println!("User: {} Group: {}", obj.user_id, obj.group_id);
        }
        if filter.is_none() {
            println!("-------");
        }
    }
    0
}

// ----------------------------------------------------------------------
// The shutdown applet
// ----------------------------------------------------------------------

/// `shutdown -hrp [hh:mm | +m | now] | -c`. Resolves to one scheduled or
/// immediate power verb, or the abort verb.
pub fn run_shutdown_applet(args: &[String]) -> i32 {
    if args.iter().any(|arg| arg == "--help") {
        println!(
            "Usage: shutdown -hrpc [12:00/+10/now] -c\n\n\
             -h -H --halt: Halt the system, don't power down.\n\
             -p -P --poweroff: Power down the system.\n\
             -r -R --reboot: Reboot the system.\n\
             -c --cancel: Cancel a pending shutdown.\n\n\
             Specify time in hh:mm, +m, or \"now\"."
        );
        return 0;
    }
    if !nix::unistd::getuid().is_root() {
        eprintln!("Unable to comply with shutdown request. You are not root.");
        return 1;
    }

    let mut verb: Option<&str> = None;
    let mut mode_count = 0;
    let mut when: Option<WallTime> = None;
    let mut time_count = 0;
    let mut immediate = false;
    let mut aborting = false;

    for arg in args {
        match arg.as_str() {
            "-h" | "-H" | "--halt" => {
                verb = Some(CODE_HALT);
                mode_count += 1;
            }
            "-r" | "-R" | "--reboot" => {
                verb = Some(CODE_REBOOT);
                mode_count += 1;
            }
            "-p" | "-P" | "--poweroff" => {
                verb = Some(CODE_POWEROFF);
                mode_count += 1;
            }
            "-c" | "--cancel" => {
                aborting = true;
                break;
            }
            "now" => {
                immediate = true;
                time_count += 1;
            }
            other if other.starts_with('+') && other[1..].chars().all(|c| c.is_ascii_digit()) => {
                let minutes: i64 = other[1..].parse().unwrap_or(0);
                when = Some(WallTime::mins_from_now(minutes));
                time_count += 1;
            }
            other if other.contains(':') && !other.starts_with('-') => {
                let Some((hour, minute)) = other.split_once(':') else {
                    eprintln!("Bad time format. Please enter in the format of \"hh:mm\"");
                    return 1;
                };
                let (Ok(hour), Ok(minute)) = (hour.parse::<u32>(), minute.parse::<u32>()) else {
                    eprintln!("Bad time format. Please enter in the format of \"hh:mm\"");
                    return 1;
                };
                when = Some(WallTime::next_occurrence(hour, minute));
                time_count += 1;
            }
            other => {
                eprintln!("Invalid argument {other}. See --help for usage.");
                return 1;
            }
        }
    }

    let request = if aborting {
        CODE_ABORTHALT.to_string()
    } else {
        if mode_count == 0 {
            eprintln!("You must specify one of -hrp.");
            return 1;
        }
        if mode_count > 1 {
            eprintln!("Please specify only ONE of -hrp.");
            return 1;
        }
        if time_count == 0 {
            eprintln!("You must specify a time in the format of hh:mm or +m.");
            return 1;
        }
        if time_count > 1 {
            eprintln!("Multiple time arguments specified. Please specify only one.");
            return 1;
        }
        let verb = verb.expect("mode_count == 1");
        if immediate {
            verb.to_string()
        } else {
            format!("{verb} {}", when.expect("time_count == 1").wire_format())
        }
    };

    let mut bus = match client::connect() {
        Ok(bus) => bus,
        Err(err) => {
            eprintln!("Failed to connect to membus: {err}");
            return 1;
        }
    };
    let outcome = client::send_power_control(&bus, &request);
    bus.shutdown();

    if !outcome.ok() {
        if aborting {
            eprintln!("Failed to abort shutdown. Is a shutdown scheduled?");
        } else {
            eprintln!(
                "Failed to schedule shutdown.\nIs another already scheduled? Use shutdown -c to cancel it."
            );
        }
        return 1;
    }
    0
}

// ----------------------------------------------------------------------
// Other applet names
// ----------------------------------------------------------------------

/// The `init <runlevel>` applet.
pub fn run_init_applet(args: &[String]) -> i32 {
    if args.len() != 1 {
        eprintln!("Specify one argument to set the runlevel.");
        return 1;
    }
    let mut bus = connect_or_die();
    let outcome = client::set_runlevel(&bus, &args[0]);
    bus.shutdown();
    if !outcome.ok() {
        eprintln!("Failed to change runlevel to \"{}\".", args[0]);
    }
    exit_code(outcome)
}

/// The `killall5 [-signum]` applet.
pub fn run_killall5_applet(args: &[String]) -> i32 {
    let signal = match args.first() {
        None => libc::SIGTERM,
        Some(arg) => {
            let digits = arg.strip_prefix('-').unwrap_or(arg);
            match digits.parse::<i32>() {
                Ok(signal) if !digits.is_empty() => signal,
                _ => {
                    eprintln!(
                        "Bad signal number. Please specify an integer signal number.\n\
                         Pass no arguments to assume signal 15."
                    );
                    return 1;
                }
            }
        }
    };
    if args.len() > 1 {
        eprintln!("Too many arguments. Syntax is killall5 -signum.");
        return 1;
    }
    exit_code(applets::emul_killall5(signal))
}

/// The `wall [-n] message` applet.
pub fn run_wall_applet(args: &[String]) -> i32 {
    match args {
        [message] => {
            applets::emul_wall(message, true);
            0
        }
        [flag, message] if flag == "-n" => {
            applets::emul_wall(message, false);
            0
        }
        _ => {
            eprintln!("Usage: wall [-n] message");
            1
        }
    }
}

//! Server-side dispatch of membus requests.
//!
//! Requests are text-framed, `VERB [args...]`. Every response echoes the
//! request after an `OK`, `WARN`, `FAIL`, or `BADPARAM` prefix so clients
//! can correlate. At most one request is handled per heavy tick.

use tracing::warn;

use crate::{
    applets, boot, clock::WallTime, config,
    constants::{
        CODE_ABORTHALT, CODE_ACKNOWLEDGED, CODE_BADPARAM, CODE_CADOFF, CODE_CADON, CODE_FAILURE,
        CODE_GETRL, CODE_HALT, CODE_KILLOBJ, CODE_LSOBJS, CODE_OBJDISABLE, CODE_OBJENABLE,
        CODE_OBJRELOAD, CODE_OBJRLS_ADD, CODE_OBJRLS_CHECK, CODE_OBJRLS_DEL, CODE_OBJSTART,
        CODE_OBJSTOP, CODE_POWEROFF, CODE_REBOOT, CODE_RESET, CODE_RUNLEVEL, CODE_RXD,
        CODE_SENDPID, ENV_RXD_VIA_MEMBUS, LSOBJS_VERSION, OSCTL_DISABLE_CTRLALTDEL,
        OSCTL_ENABLE_CTRLALTDEL,
    },
    error::Outcome,
    executor, logging, pids, reexec, runlevel,
    supervisor::{HaltMode, Server},
};

/// Reads and handles at most one pending request.
pub fn pump(server: &mut Server) {
    let Some(bus) = &server.bus else {
        return;
    };
    let Some(request) = bus.read() else {
        return;
    };
    handle_request(server, &request);
}

fn reply(server: &Server, text: &str) {
    if let Some(bus) = &server.bus {
        if bus.write(text).is_err() {
            warn!("membus reply timed out: {text}");
        }
    }
}

/// Splits `VERB arg` returning the argument, or `None` when absent or
/// malformed (leading space means an empty first argument).
fn single_arg<'r>(request: &'r str, verb: &str) -> Option<&'r str> {
    let rest = request.strip_prefix(verb)?.strip_prefix(' ')?;
    if rest.is_empty() || rest.starts_with(' ') {
        return None;
    }
    Some(rest)
}

fn handle_request(server: &mut Server, request: &str) {
    let verb = request.split(' ').next().unwrap_or("");
    match verb {
        CODE_RESET => {
            let outcome = config::reload(&mut server.config);
            let code = if outcome.ok() { CODE_ACKNOWLEDGED } else { CODE_FAILURE };
            reply(server, &format!("{code} {CODE_RESET}"));
        }
        CODE_OBJSTART | CODE_OBJSTOP => handle_obj_start_stop(server, request, verb),
        CODE_LSOBJS => handle_lsobjs(server, request),
        CODE_GETRL => {
            reply(server, &format!("{CODE_GETRL} {}", server.config.store.current_runlevel));
        }
        CODE_OBJENABLE | CODE_OBJDISABLE => handle_enable_disable(server, request, verb),
        CODE_RUNLEVEL => handle_runlevel(server, request),
        CODE_OBJRLS_CHECK | CODE_OBJRLS_ADD | CODE_OBJRLS_DEL => {
            handle_objrls(server, request, verb)
        }
        CODE_HALT | CODE_POWEROFF | CODE_REBOOT => handle_power(server, request, verb),
        CODE_ABORTHALT => handle_aborthalt(server),
        CODE_CADOFF => {
            let ok = unsafe { libc::reboot(OSCTL_DISABLE_CTRLALTDEL as libc::c_int) } == 0;
            let code = if ok { CODE_ACKNOWLEDGED } else { CODE_FAILURE };
            reply(server, &format!("{code} {CODE_CADOFF}"));
        }
        CODE_CADON => {
            let ok = unsafe { libc::reboot(OSCTL_ENABLE_CTRLALTDEL as libc::c_int) } == 0;
            let code = if ok { CODE_ACKNOWLEDGED } else { CODE_FAILURE };
            reply(server, &format!("{code} {CODE_CADON}"));
        }
        CODE_SENDPID => handle_sendpid(server, request),
        CODE_KILLOBJ => handle_killobj(server, request),
        CODE_OBJRELOAD => handle_objreload(server, request),
        CODE_RXD => {
            // Mark the trigger so the re-executed process answers the client.
            unsafe { std::env::set_var(ENV_RXD_VIA_MEMBUS, "1") };
            reexec::reexecute_epoch(server);
        }
        _ => {
            reply(server, &format!("{CODE_BADPARAM} {request}"));
        }
    }
}

fn handle_obj_start_stop(server: &mut Server, request: &str, verb: &str) {
    let starting_verb = verb == CODE_OBJSTART;
    let Some(id) = single_arg(request, verb) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };

    let global_env = server.config.store.global_env.clone();
    let outcome = match server.config.store.lookup_mut(id) {
        None => Outcome::Failure,
        Some(obj) => {
            // Asking to "start" a halt-only object runs its stop command,
            // because that is all it has.
            let starting = starting_verb && !obj.opts.halt_only;
            let outcome = executor::process_object(obj, &global_env, starting, false);
            logging::write_line(&format!(
                "manual {} of object {} {}{}",
                if starting_verb { "start" } else { "stop" },
                id,
                if outcome.ok() { "succeeded" } else { "failed" },
                if outcome == Outcome::Warning { " with a warning" } else { "" },
            ));
            outcome
        }
    };
    reply(server, &format!("{} {verb} {id}", outcome.wire_code()));
}

fn handle_enable_disable(server: &mut Server, request: &str, verb: &str) {
    let enabling = verb == CODE_OBJENABLE;
    let Some(id) = single_arg(request, verb) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    let Some(obj) = server.config.store.lookup_mut(id) else {
        reply(server, &format!("{CODE_FAILURE} {verb} {id}"));
        return;
    };
    obj.enabled = Some(enabling);
    let file = obj.config_file.clone();
    let value = if enabling { "true" } else { "false" };
    let code = match config::edit_value(&file, id, "ObjectEnabled", Some(value)) {
        Ok(()) => CODE_ACKNOWLEDGED,
        Err(err) => {
            warn!("failed to persist enable state for '{id}': {err}");
            CODE_FAILURE
        }
    };
    reply(server, &format!("{code} {request}"));
}

fn handle_runlevel(server: &mut Server, request: &str) {
    let Some(target) = single_arg(request, CODE_RUNLEVEL) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    if !server.config.store.valid_runlevel(target) {
        reply(server, &format!("{CODE_FAILURE} {CODE_RUNLEVEL} {target}"));
        return;
    }
    // Acknowledge first; the transition can take a while and the client
    // should not sit through it.
    reply(server, &format!("{CODE_ACKNOWLEDGED} {CODE_RUNLEVEL} {target}"));
    logging::write_line(&format!("changing runlevel to \"{target}\""));

    let target = target.to_string();
    if !runlevel::switch_runlevel(&mut server.config.store, &target).ok() {
        let text = format!("failed to switch to runlevel \"{target}\"");
        warn!("{text}");
        logging::write_line(&text);
    }
}

fn handle_objrls(server: &mut Server, request: &str, verb: &str) {
    let Some(rest) = single_arg(request, verb) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    let Some((id, runlevel_name)) = rest.split_once(' ') else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    if runlevel_name.is_empty() || runlevel_name.contains(' ') {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    }
    let Some(obj) = server.config.store.lookup(id).cloned() else {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    };

    match verb {
        CODE_OBJRLS_CHECK => {
            let membership = server.config.store.belongs(runlevel_name, &obj);
            reply(
                server,
                &format!(
                    "{CODE_OBJRLS_CHECK} {id} {runlevel_name} {}",
                    membership.wire_digit()
                ),
            );
        }
        CODE_OBJRLS_ADD => {
            if !server.config.store.runlevel_add(id, runlevel_name) {
                reply(server, &format!("{CODE_FAILURE} {request}"));
                return;
            }
            if persist_runlevels(server, id) {
                reply(server, &format!("{CODE_ACKNOWLEDGED} {request}"));
            } else {
                reply(server, &format!("{CODE_FAILURE} {request}"));
            }
        }
        CODE_OBJRLS_DEL => {
            if !server.config.store.runlevel_del(id, runlevel_name) {
                reply(server, &format!("{CODE_FAILURE} {request}"));
                return;
            }
            if persist_runlevels(server, id) {
                reply(server, &format!("{CODE_ACKNOWLEDGED} {request}"));
            } else {
                reply(server, &format!("{CODE_FAILURE} {request}"));
            }
        }
        _ => unreachable!("caller matched the verb"),
    }
}

/// Writes the object's current runlevel list back to its config file.
/// An empty list deletes the line; a missing line is added right after the
/// object's id declaration.
fn persist_runlevels(server: &mut Server, id: &str) -> bool {
    let Some(obj) = server.config.store.lookup(id) else {
        return false;
    };
    let file = obj.config_file.clone();
    let value = if obj.runlevels.is_empty() { None } else { Some(obj.runlevels.join(" ")) };

    match config::edit_value(&file, id, "ObjectRunlevels", value.as_deref()) {
        Ok(()) => true,
        Err(crate::error::ConfigError::EditTargetMissing { .. }) => match &value {
            // No ObjectRunlevels line yet: create one inside the stanza.
            Some(text) => config::add_attribute(&file, id, "ObjectRunlevels", text).is_ok(),
            // Deleting a line that is already gone is fine.
            None => true,
        },
        Err(_) => false,
    }
}

fn handle_power(server: &mut Server, request: &str, verb: &str) {
    let mode = match verb {
        CODE_HALT => HaltMode::Halt,
        CODE_POWEROFF => HaltMode::Poweroff,
        _ => HaltMode::Reboot,
    };

    let Some(arg) = single_arg(request, verb) else {
        // Immediate. Acknowledge, let the client collect the reply, then
        // take the system down.
        reply(server, &format!("{CODE_ACKNOWLEDGED} {verb}"));
        if let Some(bus) = &server.bus {
            bus.wait_peer_drained();
        }
        boot::launch_shutdown(server, mode);
    };

    if !(arg.contains(':') && arg.contains('/')) {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    }
    if server.halt.is_some() {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    let Some(target) = WallTime::parse(arg) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    if server.schedule_halt(mode, target).is_err() {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    reply(server, &format!("{CODE_ACKNOWLEDGED} {request}"));
    applets::emul_wall(
        &format!(
            "System is going down for {} at {}!",
            mode.verb(),
            target.display_short()
        ),
        false,
    );
}

fn handle_aborthalt(server: &mut Server) {
    match server.cancel_halt() {
        Some(schedule) => {
            applets::emul_wall(
                &format!(
                    "The shutdown scheduled for {} has been aborted.",
                    schedule.target.display_short()
                ),
                false,
            );
            reply(server, &format!("{CODE_ACKNOWLEDGED} {CODE_ABORTHALT}"));
        }
        None => {
            reply(server, &format!("{CODE_FAILURE} {CODE_ABORTHALT}"));
        }
    }
}

fn handle_sendpid(server: &mut Server, request: &str) {
    let Some(id) = single_arg(request, CODE_SENDPID) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    let Some(obj) = server.config.store.lookup(id) else {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    };
    if !obj.started {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    let pid = if obj.pidfile.is_some() { pids::read_pidfile(obj) } else { obj.pid };
    reply(server, &format!("{CODE_SENDPID} {id} {pid}"));
}

fn handle_killobj(server: &mut Server, request: &str) {
    let Some(id) = single_arg(request, CODE_KILLOBJ) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    let Some(obj) = server.config.store.lookup_mut(id) else {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    };
    if !obj.started {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    let pid = if obj.pidfile.is_some() { pids::read_pidfile(obj) } else { obj.pid };
    let killed = pid != 0 && unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) } == 0;
    if killed {
        obj.mark_stopped();
        reply(server, &format!("{CODE_ACKNOWLEDGED} {request}"));
    } else {
        reply(server, &format!("{CODE_FAILURE} {request}"));
    }
}

fn handle_objreload(server: &mut Server, request: &str) {
    let Some(id) = single_arg(request, CODE_OBJRELOAD) else {
        reply(server, &format!("{CODE_BADPARAM} {request}"));
        return;
    };
    let global_env = server.config.store.global_env.clone();
    let Some(obj) = server.config.store.lookup_mut(id) else {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    };
    if !obj.started {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    if obj.reload_cmd.is_none() && obj.reload_signal == 0 {
        reply(server, &format!("{CODE_FAILURE} {request}"));
        return;
    }
    let outcome = executor::process_reload(obj, &global_env, false);
    reply(server, &format!("{} {request}", outcome.wire_code()));
    logging::write_line(&format!(
        "reload of object {id} {}",
        match outcome {
            Outcome::Success => "succeeded",
            Outcome::Warning => "succeeded with a warning",
            Outcome::Failure => "failed",
        }
    ));
}

// ----------------------------------------------------------------------
// LSOBJS streaming
// ----------------------------------------------------------------------

/// Encodes the fixed-width status frame for one object.
pub fn encode_status_frame(
    obj: &crate::object::Object,
    running: bool,
    pid: u32,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(CODE_LSOBJS.as_bytes());
    frame.push(b' ');
    frame.extend_from_slice(LSOBJS_VERSION.as_bytes());
    frame.push(0);
    frame.push((obj.started && !obj.opts.halt_only) as u8);
    frame.push(running as u8);
    frame.push(obj.is_enabled() as u8);
    frame.push(obj.term_signal as u8);
    frame.push(obj.reload_signal as u8);
    frame.extend_from_slice(&obj.user_id.to_le_bytes());
    frame.extend_from_slice(&obj.group_id.to_le_bytes());
    frame.push(obj.stop_mode.wire_byte());
    frame.extend_from_slice(&pid.to_le_bytes());
    frame.extend_from_slice(&obj.started_since.to_le_bytes());
    frame.extend_from_slice(&obj.opts.stop_timeout.to_le_bytes());
    frame
}

/// Encodes the exit-map frame: count, then `(value, exit_status)` pairs.
pub fn encode_exit_map_frame(obj: &crate::object::Object) -> Vec<u8> {
    let mut frame = Vec::with_capacity(32);
    frame.extend_from_slice(CODE_LSOBJS.as_bytes());
    frame.extend_from_slice(b" MXS");
    frame.push(0);
    frame.push(obj.exit_map.len() as u8);
    for entry in &obj.exit_map {
        frame.push(entry.value as u8);
        frame.push(entry.exit_status);
    }
    frame
}

fn handle_lsobjs(server: &mut Server, request: &str) {
    let filter = single_arg(request, CODE_LSOBJS).map(str::to_string);
    let count = server.config.store.len();

    for idx in 0..count {
        let obj = server.config.store.objects()[idx].clone();
        if let Some(wanted) = &filter {
            if &obj.id != wanted {
                continue;
            }
        }

        let running = pids::object_process_running(&obj);
        let pid = if obj.pidfile.is_some() {
            let read = pids::read_pidfile(&obj);
            if read != 0 { read } else { obj.pid }
        } else {
            obj.pid
        };

        let frames_ok = {
            let Some(bus) = &server.bus else { return };
            bus.bin_write(&encode_status_frame(&obj, running, pid)).is_ok()
                && bus.write(&format!("{} {}", obj.id, obj.description)).is_ok()
                && {
                    let mut tags = obj.option_tags();
                    tags.push(0);
                    bus.bin_write(&tags).is_ok()
                }
                && bus.bin_write(&encode_exit_map_frame(&obj)).is_ok()
        };
        if !frames_ok {
            warn!("client stopped reading mid-LSOBJS stream");
            return;
        }

        let Some(bus) = &server.bus else { return };
        for runlevel_name in &obj.runlevels {
            if bus
                .write(&format!("{CODE_LSOBJS} {LSOBJS_VERSION} {} {runlevel_name}", obj.id))
                .is_err()
            {
                return;
            }
        }
    }

    reply(server, &format!("{CODE_ACKNOWLEDGED} {CODE_LSOBJS}"));
}

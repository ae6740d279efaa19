//! Client-side membus operations. Each CLI subcommand resolves to one of
//! these helpers, all speaking the request/response protocol the server's
//! dispatch understands.

use std::time::{Duration, Instant};

use crate::{
    constants::{
        CODE_ACKNOWLEDGED, CODE_BADPARAM, CODE_FAILURE, CODE_GETRL, CODE_KILLOBJ, CODE_LSOBJS,
        CODE_OBJRLS_ADD, CODE_OBJRLS_CHECK, CODE_OBJRLS_DEL, CODE_RESET, CODE_RUNLEVEL, CODE_RXD,
        CODE_SENDPID, CODE_WARNING, LSOBJS_VERSION, MEMBUS_KEY, MEMBUS_MSGSIZE,
        WAIT_TIMEOUT_SECS,
    },
    error::{BusError, Outcome},
    membus::MemBus,
    object::{OptionTag, StopMode},
};

/// Attaches to the running init's bus.
pub fn connect() -> Result<MemBus, BusError> {
    MemBus::client()
}

/// One request, one reply.
pub fn transact(bus: &MemBus, request: &str) -> Result<String, BusError> {
    bus.write(request)?;
    bus.read_blocking()
}

/// Classifies a reply that echoes the request after its code prefix.
fn classify_reply(reply: &str, echoed: &str) -> Outcome {
    if reply == format!("{CODE_ACKNOWLEDGED} {echoed}") {
        Outcome::Success
    } else if reply == format!("{CODE_WARNING} {echoed}") {
        Outcome::Warning
    } else if reply == format!("{CODE_FAILURE} {echoed}") {
        Outcome::Failure
    } else if reply.starts_with(CODE_BADPARAM) {
        eprintln!("epoch: the running init rejected our request as malformed");
        Outcome::Failure
    } else {
        eprintln!("epoch: unrecognized reply received over the membus");
        Outcome::Failure
    }
}

/// Sends a verb plus object id and classifies the `<code> <verb> <id>`
/// reply. Covers OBJSTART/OBJSTOP/OBJENABLE/OBJDISABLE/OBJRELOAD.
pub fn obj_control(bus: &MemBus, verb: &str, id: &str) -> Outcome {
    let request = format!("{verb} {id}");
    match transact(bus, &request) {
        Ok(reply) => classify_reply(&reply, &request),
        Err(err) => {
            eprintln!("epoch: {err}");
            Outcome::Failure
        }
    }
}

/// An immediate or scheduled power-control request
/// (INIT_HALT/INIT_POWEROFF/INIT_REBOOT/INIT_ABORTHALT/CADON/CADOFF),
/// with any argument already baked into `request`.
pub fn send_power_control(bus: &MemBus, request: &str) -> Outcome {
    match transact(bus, request) {
        Ok(reply) => classify_reply(&reply, request),
        Err(err) => {
            eprintln!("epoch: {err}");
            Outcome::Failure
        }
    }
}

/// The current runlevel, per the server.
pub fn get_runlevel(bus: &MemBus) -> Option<String> {
    let reply = transact(bus, CODE_GETRL).ok()?;
    reply.strip_prefix(&format!("{CODE_GETRL} ")).map(str::to_string)
}

pub fn set_runlevel(bus: &MemBus, target: &str) -> Outcome {
    obj_control(bus, CODE_RUNLEVEL, target)
}

pub fn config_reload(bus: &MemBus) -> Outcome {
    match transact(bus, CODE_RESET) {
        Ok(reply) => classify_reply(&reply, CODE_RESET),
        Err(err) => {
            eprintln!("epoch: {err}");
            Outcome::Failure
        }
    }
}

/// The PID the server has on record for an object.
pub fn get_pid(bus: &MemBus, id: &str) -> Option<u32> {
    let request = format!("{CODE_SENDPID} {id}");
    let reply = transact(bus, &request).ok()?;
    reply
        .strip_prefix(&format!("{CODE_SENDPID} {id} "))
        .and_then(|pid| pid.parse().ok())
}

pub fn kill_object(bus: &MemBus, id: &str) -> Outcome {
    obj_control(bus, CODE_KILLOBJ, id)
}

/// Runlevel membership mutation; `add` selects ADD vs DEL.
pub fn objrl_modify(bus: &MemBus, id: &str, runlevel: &str, add: bool) -> Outcome {
    let verb = if add { CODE_OBJRLS_ADD } else { CODE_OBJRLS_DEL };
    let request = format!("{verb} {id} {runlevel}");
    match transact(bus, &request) {
        Ok(reply) => classify_reply(&reply, &request),
        Err(err) => {
            eprintln!("epoch: {err}");
            Outcome::Failure
        }
    }
}

/// Runlevel membership query: 0 = no, 1 = direct, 2 = inherited.
pub fn objrl_check(bus: &MemBus, id: &str, runlevel: &str) -> Option<char> {
    let request = format!("{CODE_OBJRLS_CHECK} {id} {runlevel}");
    let reply = transact(bus, &request).ok()?;
    reply
        .strip_prefix(&format!("{CODE_OBJRLS_CHECK} {id} {runlevel} "))
        .and_then(|digit| digit.chars().next())
}

/// Requests a live re-exec and follows the server across it: wait for the
/// old region to vanish, the new one to appear, then collect the verdict.
pub fn request_reexec() -> Outcome {
    let Ok(mut bus) = connect() else {
        return Outcome::Failure;
    };
    if bus.write(CODE_RXD).is_err() {
        bus.shutdown();
        return Outcome::Failure;
    }
    bus.shutdown();

    // The server tears its region down, re-execs, and brings it back.
    let deadline = Instant::now() + Duration::from_secs(WAIT_TIMEOUT_SECS as u64 * 3);
    while MemBus::region_exists(MEMBUS_KEY) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_micros(100));
    }
    while !MemBus::region_exists(MEMBUS_KEY) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_micros(100));
    }

    let Ok(mut bus) = connect() else {
        return Outcome::Failure;
    };
    let verdict = bus.read_blocking();
    bus.shutdown();
    match verdict {
        Ok(reply) if reply == format!("{CODE_ACKNOWLEDGED} {CODE_RXD}") => Outcome::Success,
        _ => Outcome::Failure,
    }
}

// ----------------------------------------------------------------------
// LSOBJS decoding
// ----------------------------------------------------------------------

/// One object's status as streamed by the server.
#[derive(Debug, Clone, Default)]
pub struct RemoteObject {
    pub id: String,
    pub description: String,
    pub started: bool,
    pub running: bool,
    pub enabled: bool,
    pub term_signal: u8,
    pub reload_signal: u8,
    pub user_id: u32,
    pub group_id: u32,
    pub stop_mode: Option<StopMode>,
    pub pid: u32,
    pub started_since: i64,
    pub stop_timeout: u32,
    pub options: Vec<OptionTag>,
    pub exit_map: Vec<(Outcome, u8)>,
    pub runlevels: Vec<String>,
}

fn frame_as_text(frame: &[u8]) -> String {
    let end = frame.iter().position(|&b| b == 0).unwrap_or(frame.len());
    String::from_utf8_lossy(&frame[..end]).into_owned()
}

fn decode_status_frame(frame: &[u8]) -> Option<RemoteObject> {
    let rest = frame.strip_prefix(b"LSOBJS ")?;
    let rest = rest.strip_prefix(LSOBJS_VERSION.as_bytes())?;
    let rest = rest.strip_prefix(&[0u8][..])?;
    if rest.len() < 30 {
        return None;
    }
    Some(RemoteObject {
        started: rest[0] != 0,
        running: rest[1] != 0,
        enabled: rest[2] != 0,
        term_signal: rest[3],
        reload_signal: rest[4],
        user_id: u32::from_le_bytes(rest[5..9].try_into().ok()?),
        group_id: u32::from_le_bytes(rest[9..13].try_into().ok()?),
        stop_mode: StopMode::from_wire_byte(rest[13]),
        pid: u32::from_le_bytes(rest[14..18].try_into().ok()?),
        started_since: i64::from_le_bytes(rest[18..26].try_into().ok()?),
        stop_timeout: u32::from_le_bytes(rest[26..30].try_into().ok()?),
        ..RemoteObject::default()
    })
}

fn decode_exit_map_frame(frame: &[u8]) -> Vec<(Outcome, u8)> {
    let Some(rest) = frame.strip_prefix(b"LSOBJS MXS\0") else {
        return Vec::new();
    };
    let Some((&count, pairs)) = rest.split_first() else {
        return Vec::new();
    };
    pairs
        .chunks_exact(2)
        .take(count as usize)
        .filter_map(|pair| Outcome::from_wire_byte(pair[0]).map(|value| (value, pair[1])))
        .collect()
}

/// Streams object status records. A protocol version mismatch drains the
/// stream and fails so the bus is left clean for the next client.
pub fn fetch_status(bus: &MemBus, filter: Option<&str>) -> Result<Vec<RemoteObject>, String> {
    let request = match filter {
        Some(id) => format!("{CODE_LSOBJS} {id}"),
        None => CODE_LSOBJS.to_string(),
    };
    bus.write(&request).map_err(|err| err.to_string())?;

    let terminator = format!("{CODE_ACKNOWLEDGED} {CODE_LSOBJS}");
    let mut objects: Vec<RemoteObject> = Vec::new();
    let mut buffer = [0u8; MEMBUS_MSGSIZE + 1];

    loop {
        let len = bus.bin_read_blocking(&mut buffer).map_err(|err| err.to_string())?;
        let frame = &buffer[..len];
        let text = frame_as_text(frame);

        if text == terminator {
            return Ok(objects);
        }

        // Runlevel frames are text: "LSOBJS V4 <id> <rl>".
        let runlevel_prefix = format!("{CODE_LSOBJS} {LSOBJS_VERSION} ");
        if let Some(rest) = text.strip_prefix(&runlevel_prefix) {
            if let Some((id, runlevel)) = rest.split_once(' ') {
                if let Some(last) = objects.last_mut() {
                    if last.id == id {
                        last.runlevels.push(runlevel.to_string());
                        continue;
                    }
                }
            }
        }

        // Otherwise this opens a new object: the fixed status frame, then
        // id/description, options, and exit mappings.
        let Some(mut object) = decode_status_frame(frame) else {
            // Unknown version or stream damage: drain to the terminator so
            // the bus is usable for the next client.
            loop {
                let len =
                    bus.bin_read_blocking(&mut buffer).map_err(|err| err.to_string())?;
                if frame_as_text(&buffer[..len]) == terminator {
                    break;
                }
            }
            return Err(format!(
                "LSOBJS protocol version mismatch; expected \"{LSOBJS_VERSION}\""
            ));
        };

        let len = bus.bin_read_blocking(&mut buffer).map_err(|err| err.to_string())?;
        let id_line = frame_as_text(&buffer[..len]);
        match id_line.split_once(' ') {
            Some((id, description)) => {
                object.id = id.to_string();
                object.description = description.to_string();
            }
            None => object.id = id_line,
        }

        let len = bus.bin_read_blocking(&mut buffer).map_err(|err| err.to_string())?;
        object.options = buffer[..len]
            .iter()
            .take_while(|&&b| b != 0)
            .filter_map(|&b| OptionTag::from_byte(b))
            .collect();

        let len = bus.bin_read_blocking(&mut buffer).map_err(|err| err.to_string())?;
        object.exit_map = decode_exit_map_frame(&buffer[..len]);

        objects.push(object);
    }
}

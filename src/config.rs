//! Configuration loading, reloading, and in-place editing.
//!
//! The format is one `Attribute Value` (or `Attribute=Value`) pair per line.
//! `#` comments run to end of line; `>!>` opens a block comment that `<!<`
//! closes, both recognized at the start of a line. `Import` pulls in further
//! files, and objects remember which file declared them so editor writes land
//! in the right place.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{
    constants::MAX_LINE_SIZE,
    error::{ConfigError, Outcome},
    logging,
    object::{Object, StopMode},
    store::Store,
};

/// Virtual filesystems `MountVirtual` can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualFs {
    Proc,
    Sys,
    Dev,
    DevPts,
    DevShm,
}

impl VirtualFs {
    pub fn config_name(self) -> &'static str {
        match self {
            VirtualFs::Proc => "procfs",
            VirtualFs::Sys => "sysfs",
            VirtualFs::Dev => "devfs",
            VirtualFs::DevPts => "devpts",
            VirtualFs::DevShm => "devshm",
        }
    }

    pub fn fs_type(self) -> &'static str {
        match self {
            VirtualFs::Proc => "proc",
            VirtualFs::Sys => "sysfs",
            VirtualFs::Dev => "devtmpfs",
            VirtualFs::DevPts => "devpts",
            VirtualFs::DevShm => "tmpfs",
        }
    }

    pub fn mount_point(self) -> &'static str {
        match self {
            VirtualFs::Proc => "/proc",
            VirtualFs::Sys => "/sys",
            VirtualFs::Dev => "/dev",
            VirtualFs::DevPts => "/dev/pts",
            VirtualFs::DevShm => "/dev/shm",
        }
    }

    pub fn all() -> [VirtualFs; 5] {
        [VirtualFs::Proc, VirtualFs::Sys, VirtualFs::Dev, VirtualFs::DevPts, VirtualFs::DevShm]
    }
}

/// One `MountVirtual` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountRequest {
    pub fs: VirtualFs,
    /// `+` suffix: create the mount point first.
    pub mkdir: bool,
    /// `~` prefix: stay quiet if the mount fails.
    pub ignore_errors: bool,
}

/// Boot-scoped options that live outside the object store.
#[derive(Debug, Clone)]
pub struct Settings {
    pub banner_text: Option<String>,
    pub banner_color: Option<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub disable_cad: bool,
    pub enable_logging: bool,
    pub blank_log_on_boot: bool,
    pub log_file: Option<String>,
    pub mounts: Vec<MountRequest>,
    pub starting_status_format: Option<String>,
    pub finished_status_format: Option<String>,
    pub status_names: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            banner_text: None,
            banner_color: None,
            hostname: None,
            domainname: None,
            disable_cad: false,
            enable_logging: true,
            blank_log_on_boot: true,
            log_file: None,
            mounts: Vec::new(),
            starting_status_format: None,
            finished_status_format: None,
            status_names: None,
        }
    }
}

/// A fully loaded configuration: the store plus its boot settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: Store,
    pub settings: Settings,
    pub main_file: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Parses a signal given by number or by common name. Each named signal maps
/// to itself.
pub fn parse_signal(text: &str) -> Option<i32> {
    if text.chars().all(|c| c.is_ascii_digit()) && !text.is_empty() {
        let num: i32 = text.parse().ok()?;
        return (num > 0 && num < 65).then_some(num);
    }
    Some(match text {
        "SIGHUP" => libc::SIGHUP,
        "SIGINT" => libc::SIGINT,
        "SIGQUIT" => libc::SIGQUIT,
        "SIGABRT" => libc::SIGABRT,
        "SIGKILL" => libc::SIGKILL,
        "SIGUSR1" => libc::SIGUSR1,
        "SIGUSR2" => libc::SIGUSR2,
        "SIGTERM" => libc::SIGTERM,
        "SIGCONT" => libc::SIGCONT,
        "SIGSTOP" => libc::SIGSTOP,
        _ => return None,
    })
}

fn id_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new("^[A-Za-z0-9_-]+$").expect("static pattern"))
}

/// Is `name` a legal object id or priority alias?
pub fn valid_identifier(name: &str) -> bool {
    id_pattern().is_match(name)
}

struct Parser {
    store: Store,
    settings: Settings,
    files: Vec<PathBuf>,
    /// Index of the object the current attribute lines apply to.
    cur: Option<usize>,
}

impl Parser {
    fn problem(&self, file: &Path, line: usize, attribute: &str, detail: &str) {
        let text = format!(
            "CONFIG: bad {attribute} at {}:{line}: {detail}",
            file.display()
        );
        warn!("{text}");
        logging::write_line(&text);
    }

    fn cur_obj(&mut self) -> Option<&mut Object> {
        let idx = self.cur?;
        self.store.objects_mut().get_mut(idx)
    }

    fn parse_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.files.push(path.to_path_buf());

        let mut in_block_comment = false;
        let mut imports = Vec::new();

        for (lineno, raw) in contents.lines().enumerate() {
            let lineno = lineno + 1;
            let mut line = raw.trim_start();

            if in_block_comment {
                match line.strip_prefix("<!<") {
                    Some(rest) => {
                        in_block_comment = false;
                        line = rest.trim_start();
                    }
                    None => continue,
                }
            }
            if line.starts_with(">!>") {
                in_block_comment = true;
                continue;
            }
            if let Some(hash) = line.find('#') {
                line = line[..hash].trim_end();
            }
            if line.is_empty() {
                continue;
            }
            if line.len() >= MAX_LINE_SIZE {
                self.problem(path, lineno, "line", "line too long, skipping");
                continue;
            }

            let (attribute, value) = split_attribute(line);
            if let Some(import) = self.handle_line(path, lineno, attribute, value) {
                imports.push(import);
            }
        }

        // Imports parse after the file that named them, in order.
        for import in imports {
            let resolved = if import.is_absolute() {
                import
            } else {
                path.parent().unwrap_or(Path::new("/")).join(import)
            };
            self.parse_file(&resolved)?;
        }
        Ok(())
    }

    /// Dispatches one attribute line. Returns a path when the line was an
    /// `Import`.
    fn handle_line(
        &mut self,
        file: &Path,
        lineno: usize,
        attribute: &str,
        value: &str,
    ) -> Option<PathBuf> {
        macro_rules! require_value {
            () => {
                if value.is_empty() {
                    self.problem(file, lineno, attribute, "missing value");
                    return None;
                }
            };
        }
        macro_rules! require_object {
            () => {
                match self.cur {
                    Some(_) => {}
                    None => {
                        self.problem(file, lineno, attribute, "appears before any ObjectID");
                        return None;
                    }
                }
            };
        }

        match attribute {
            "Import" => {
                require_value!();
                return Some(PathBuf::from(value));
            }
            "GlobalEnvVar" => {
                require_value!();
                if !value.contains('=') {
                    self.problem(file, lineno, attribute, "expected KEY=VALUE");
                    return None;
                }
                self.store.env_add(None, value);
            }
            "DisableCAD" => {
                require_value!();
                match parse_bool(value) {
                    Some(flag) => self.settings.disable_cad = flag,
                    None => self.problem(file, lineno, attribute, "expected true or false"),
                }
            }
            "BlankLogOnBoot" => {
                require_value!();
                match parse_bool(value) {
                    Some(flag) => self.settings.blank_log_on_boot = flag,
                    None => self.problem(file, lineno, attribute, "expected true or false"),
                }
            }
            "EnableLogging" => {
                require_value!();
                match parse_bool(value) {
                    Some(flag) => self.settings.enable_logging = flag,
                    None => self.problem(file, lineno, attribute, "expected true or false"),
                }
            }
            "RunlevelInherits" => {
                require_value!();
                let mut parts = value.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(inheriter), Some(inherited), None) => {
                        self.store.add_inheritance(inheriter, inherited);
                    }
                    _ => self.problem(file, lineno, attribute, "expected two runlevel names"),
                }
            }
            "DefinePriority" => {
                if self.cur.is_some() {
                    self.problem(file, lineno, attribute, "must appear before any ObjectID");
                    return None;
                }
                require_value!();
                let mut parts = value.split_whitespace();
                let (Some(alias), Some(number), None) = (parts.next(), parts.next(), parts.next())
                else {
                    self.problem(file, lineno, attribute, "expected alias and number");
                    return None;
                };
                if !valid_identifier(alias) {
                    self.problem(file, lineno, attribute, "alias has illegal characters");
                    return None;
                }
                match number.parse::<u32>() {
                    Ok(target) => self.store.add_priority_alias(alias, target),
                    Err(_) => self.problem(file, lineno, attribute, "target is not a number"),
                }
            }
            "MountVirtual" => {
                require_value!();
                for word in value.split_whitespace() {
                    let ignore_errors = word.starts_with('~');
                    let word = word.trim_start_matches('~');
                    let mkdir = word.ends_with('+');
                    let word = word.trim_end_matches('+');
                    match VirtualFs::all().into_iter().find(|fs| fs.config_name() == word) {
                        Some(fs) => {
                            self.settings.mounts.push(MountRequest { fs, mkdir, ignore_errors })
                        }
                        None => self.problem(file, lineno, attribute, "unknown virtual filesystem"),
                    }
                }
            }
            "BootBannerText" => {
                require_value!();
                if value == "NONE" {
                    self.settings.banner_text = None;
                    self.settings.banner_color = None;
                } else {
                    self.settings.banner_text = Some(value.to_string());
                }
            }
            "BootBannerColor" => {
                require_value!();
                self.settings.banner_color = Some(value.to_string());
            }
            "DefaultRunlevel" => {
                require_value!();
                // An override from the environment or kernel cmdline wins.
                if self.store.current_runlevel.is_empty() {
                    self.store.current_runlevel = value.to_string();
                }
            }
            "LogFile" => {
                require_value!();
                self.settings.log_file = Some(value.to_string());
            }
            "Hostname" => {
                require_value!();
                match resolve_file_value(value, file) {
                    Some(name) if !name.contains([' ', '\t']) => {
                        self.settings.hostname = Some(name)
                    }
                    Some(_) => self.problem(file, lineno, attribute, "hostname has whitespace"),
                    None => self.problem(file, lineno, attribute, "cannot read FILE source"),
                }
            }
            "Domainname" => {
                require_value!();
                match resolve_file_value(value, file) {
                    Some(name) if !name.contains([' ', '\t']) => {
                        self.settings.domainname = Some(name)
                    }
                    Some(_) => self.problem(file, lineno, attribute, "domainname has whitespace"),
                    None => self.problem(file, lineno, attribute, "cannot read FILE source"),
                }
            }
            "StartingStatusFormat" => {
                require_value!();
                self.settings.starting_status_format = Some(value.to_string());
            }
            "FinishedStatusFormat" => {
                require_value!();
                self.settings.finished_status_format = Some(value.to_string());
            }
            "StatusNames" => {
                require_value!();
                self.settings.status_names = Some(value.to_string());
            }
            "ObjectID" => {
                require_value!();
                if !valid_identifier(value) {
                    self.problem(file, lineno, attribute, "id has illegal characters");
                    self.cur = None;
                    return None;
                }
                match self.store.add(Object::new(value, file)) {
                    Ok(()) => self.cur = Some(self.store.len() - 1),
                    Err(_) => {
                        self.problem(file, lineno, attribute, "duplicate object id");
                        self.cur = None;
                    }
                }
            }
            "ObjectWorkingDirectory" => {
                require_object!();
                require_value!();
                self.cur_obj().expect("checked").working_dir = Some(PathBuf::from(value));
            }
            "ObjectEnabled" => {
                require_object!();
                require_value!();
                match parse_bool(value) {
                    Some(flag) => self.cur_obj().expect("checked").enabled = Some(flag),
                    None => self.problem(file, lineno, attribute, "expected true or false"),
                }
            }
            "ObjectOptions" => {
                require_object!();
                require_value!();
                self.parse_options(file, lineno, value);
            }
            "ObjectDescription" => {
                require_object!();
                require_value!();
                self.cur_obj().expect("checked").description = value.to_string();
            }
            "ObjectStartCommand" => {
                require_object!();
                require_value!();
                self.cur_obj().expect("checked").start_cmd = Some(value.to_string());
            }
            "ObjectPrestartCommand" => {
                require_object!();
                require_value!();
                self.cur_obj().expect("checked").prestart_cmd = Some(value.to_string());
            }
            "ObjectReloadCommand" => {
                require_object!();
                require_value!();
                if let Some(signal_name) = value.strip_prefix("SIGNAL ") {
                    match parse_signal(signal_name.trim()) {
                        Some(signal) => {
                            self.cur_obj().expect("checked").reload_signal = signal;
                        }
                        None => self.problem(file, lineno, attribute, "unknown signal"),
                    }
                } else {
                    self.cur_obj().expect("checked").reload_cmd = Some(value.to_string());
                }
            }
            "ObjectStopCommand" => {
                require_object!();
                require_value!();
                let obj = self.cur_obj().expect("checked");
                match value {
                    "PID" => obj.stop_mode = StopMode::Pid,
                    "PIDFILE" => obj.stop_mode = StopMode::PidFile,
                    "NONE" => obj.stop_mode = StopMode::None,
                    command => {
                        obj.stop_mode = StopMode::Command;
                        obj.stop_cmd = Some(command.to_string());
                    }
                }
            }
            "ObjectStartPriority" | "ObjectStopPriority" => {
                require_object!();
                require_value!();
                let starting = attribute == "ObjectStartPriority";
                match self.parse_priority(value, starting) {
                    Some(priority) => {
                        let obj = self.cur_obj().expect("checked");
                        if starting {
                            obj.start_priority = priority;
                        } else {
                            obj.stop_priority = priority;
                        }
                    }
                    None => self.problem(file, lineno, attribute, "not a number or known alias"),
                }
            }
            "ObjectPIDFile" => {
                require_object!();
                require_value!();
                self.cur_obj().expect("checked").pidfile = Some(PathBuf::from(value));
            }
            "ObjectUser" => {
                require_object!();
                require_value!();
                match resolve_user(value) {
                    Some(uid) => self.cur_obj().expect("checked").user_id = uid,
                    None => self.problem(file, lineno, attribute, "unknown user"),
                }
            }
            "ObjectGroup" => {
                require_object!();
                require_value!();
                match resolve_group(value) {
                    Some(gid) => self.cur_obj().expect("checked").group_id = gid,
                    None => self.problem(file, lineno, attribute, "unknown group"),
                }
            }
            "ObjectStdout" | "ObjectStderr" => {
                require_object!();
                require_value!();
                let target = if value == "LOG" {
                    self.settings
                        .log_file
                        .clone()
                        .unwrap_or_else(|| crate::constants::DEFAULT_LOG_FILE.to_string())
                } else {
                    value.to_string()
                };
                let obj = self.cur_obj().expect("checked");
                if attribute == "ObjectStdout" {
                    obj.stdout_path = Some(PathBuf::from(target));
                } else {
                    obj.stderr_path = Some(PathBuf::from(target));
                }
            }
            "ObjectEnvVar" => {
                require_object!();
                require_value!();
                if !value.contains('=') {
                    self.problem(file, lineno, attribute, "expected KEY=VALUE");
                    return None;
                }
                self.cur_obj().expect("checked").env_vars.push(value.to_string());
            }
            "ObjectRunlevels" => {
                require_object!();
                require_value!();
                let already_has_line =
                    !self.cur_obj().expect("checked").runlevels.is_empty();
                if already_has_line {
                    // The editor rewrites one line per object, so a second
                    // one would be lost on the next enable/disable write.
                    self.problem(
                        file,
                        lineno,
                        attribute,
                        "second ObjectRunlevels line; put all runlevels on one line",
                    );
                }
                let obj = self.cur_obj().expect("checked");
                for runlevel in value.split_whitespace() {
                    if !obj.runlevels.iter().any(|rl| rl == runlevel) {
                        obj.runlevels.push(runlevel.to_string());
                    }
                }
            }
            _ => {
                self.problem(file, lineno, attribute, "unidentified attribute");
            }
        }
        None
    }

    /// Priority values are either a bare number or an alias (or another
    /// object's id) with an optional `+n`/`-n` adjustment.
    fn parse_priority(&self, value: &str, starting: bool) -> Option<u32> {
        if value.chars().all(|c| c.is_ascii_digit()) {
            return value.parse().ok().filter(|p| *p < 100_000_000);
        }
        let (name, delta) = match value.find(['+', '-']) {
            Some(pos) if value[pos + 1..].chars().all(|c| c.is_ascii_digit())
                && !value[pos + 1..].is_empty() =>
            {
                let delta: i64 = value[pos + 1..].parse().ok()?;
                let signed = if value.as_bytes()[pos] == b'+' { delta } else { -delta };
                (&value[..pos], signed)
            }
            _ => (value, 0),
        };
        let base = self.store.resolve_priority(name, starting)? as i64;
        u32::try_from(base + delta).ok()
    }

    fn parse_options(&mut self, file: &Path, lineno: usize, value: &str) {
        for word in value.split_whitespace() {
            let obj = self.cur_obj().expect("caller checked");
            match word {
                "HALTONLY" => {
                    // Halt-only objects are born "started" so the shutdown
                    // sweep picks them up, and are never stopped by runlevel
                    // switches.
                    obj.started = true;
                    obj.opts.persistent = true;
                    obj.opts.halt_only = true;
                }
                "PERSISTENT" => obj.opts.persistent = true,
                "RUNONCE" => obj.opts.run_once = true,
                "STARTFAILCRITICAL" => obj.opts.start_fail_critical = true,
                "STOPFAILCRITICAL" => obj.opts.stop_fail_critical = true,
                "INTERACTIVE" => obj.opts.interactive = true,
                "FORK" => obj.opts.fork = true,
                "FORKN" => {
                    obj.opts.fork = true;
                    obj.opts.fork_scan_once = true;
                }
                "EXEC" => obj.opts.exec = true,
                "PIVOT" => obj.opts.pivot_root = true,
                "RAWDESCRIPTION" => obj.opts.raw_description = true,
                "SERVICE" => obj.opts.is_service = true,
                "NOTRACK" => obj.opts.no_track = true,
                "FORCESHELL" => obj.opts.force_shell = true,
                "NOSTOPWAIT" => obj.opts.no_stop_wait = true,
                other if other.starts_with("AUTORESTART") => {
                    obj.opts.auto_restart = true;
                    if let Some(arg) = other.strip_prefix("AUTORESTART=") {
                        match arg.parse() {
                            Ok(floor) => obj.opts.restart_floor_secs = floor,
                            Err(_) => {
                                self.problem(file, lineno, "ObjectOptions", "bad AUTORESTART value")
                            }
                        }
                    }
                }
                other if other.starts_with("STOPTIMEOUT=") => {
                    let arg = other.trim_start_matches("STOPTIMEOUT=");
                    match arg.parse() {
                        Ok(secs) => obj.opts.stop_timeout = secs,
                        Err(_) => {
                            self.problem(file, lineno, "ObjectOptions", "bad STOPTIMEOUT value")
                        }
                    }
                }
                other if other.starts_with("TERMSIGNAL=") => {
                    let arg = other.trim_start_matches("TERMSIGNAL=");
                    match parse_signal(arg) {
                        Some(signal) => obj.term_signal = signal,
                        None => self.problem(file, lineno, "ObjectOptions", "bad TERMSIGNAL value"),
                    }
                }
                other if other.starts_with("MAPEXITSTATUS=") => {
                    let arg = other.trim_start_matches("MAPEXITSTATUS=");
                    let Some((status, meaning)) = arg.split_once(',') else {
                        self.problem(file, lineno, "ObjectOptions", "MAPEXITSTATUS needs code,VALUE");
                        continue;
                    };
                    let (Ok(status), Ok(meaning)) =
                        (status.parse::<u8>(), meaning.parse::<Outcome>())
                    else {
                        self.problem(file, lineno, "ObjectOptions", "bad MAPEXITSTATUS value");
                        continue;
                    };
                    if !obj.map_exit_status(status, meaning) {
                        self.problem(file, lineno, "ObjectOptions", "too many MAPEXITSTATUS entries");
                    }
                }
                other => {
                    self.problem(
                        file,
                        lineno,
                        "ObjectOptions",
                        &format!("unknown option '{other}'"),
                    );
                }
            }
        }
    }
}

/// Splits a config line into attribute name and value, accepting either an
/// `=` or a run of whitespace as the delimiter.
fn split_attribute(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c == '=' || c == ' ' || c == '\t')
        .unwrap_or(line.len());
    let attribute = &line[..end];
    let rest = &line[end..];
    let value = rest.trim_start_matches(['=', ' ', '\t']);
    (attribute, value.trim_end())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Handles the `FILE <path>` indirection for attribute values.
fn resolve_file_value(value: &str, config_file: &Path) -> Option<String> {
    let Some(path) = value.strip_prefix("FILE ") else {
        return Some(value.to_string());
    };
    let path = path.trim();
    let resolved = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        config_file.parent().unwrap_or(Path::new("/")).join(path)
    };
    let contents = fs::read_to_string(resolved).ok()?;
    contents.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string)
}

fn resolve_user(value: &str) -> Option<u32> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse().ok();
    }
    nix::unistd::User::from_name(value).ok().flatten().map(|u| u.uid.as_raw())
}

fn resolve_group(value: &str) -> Option<u32> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse().ok();
    }
    nix::unistd::Group::from_name(value).ok().flatten().map(|g| g.gid.as_raw())
}

/// Loads the configuration rooted at `main_file`. `runlevel_override`
/// pre-seeds the current runlevel (from the environment, kernel cmdline, or a
/// reload keeping its runlevel) and wins over `DefaultRunlevel`.
pub fn load(main_file: &Path, runlevel_override: Option<&str>) -> Result<Config, ConfigError> {
    let mut parser = Parser {
        store: Store::new(),
        settings: Settings::default(),
        files: Vec::new(),
        cur: None,
    };
    if let Some(runlevel) = runlevel_override {
        parser.store.current_runlevel = runlevel.to_string();
    }
    parser.parse_file(main_file)?;
    Ok(Config {
        store: parser.store,
        settings: parser.settings,
        main_file: main_file.to_path_buf(),
        files: parser.files,
    })
}

/// Reloads `config` from disk in place. The previous store is kept as a
/// backup: on a parse failure it is restored untouched, on success its
/// `started`/`pid`/`started_since` are carried into the rebuilt store by id.
/// `EnableLogging` and `DisableCAD` keep their running values either way.
pub fn reload(config: &mut Config) -> Outcome {
    logging::write_line("CONFIG: reloading configuration");
    let backup_store = config.store.clone();
    let backup_settings = config.settings.clone();

    let fresh = match load(&config.main_file, Some(&config.store.current_runlevel)) {
        Ok(fresh) => fresh,
        Err(err) => {
            logging::write_line(&format!("CONFIG: reload failed, keeping old configuration: {err}"));
            warn!("configuration reload failed: {err}");
            return Outcome::Failure;
        }
    };

    let mut candidate = fresh;
    let report = candidate.store.scan_integrity();
    if !report.outcome.ok() || report.runlevel_invalid {
        logging::write_line("CONFIG: reload failed integrity check, keeping old configuration");
        warn!("configuration reload failed the integrity scan");
        return Outcome::Failure;
    }

    candidate.store.adopt_runtime_state(&backup_store);
    candidate.settings.enable_logging = backup_settings.enable_logging;
    candidate.settings.disable_cad = backup_settings.disable_cad;
    *config = candidate;
    logging::write_line("CONFIG: configuration reload successful");
    report.outcome
}

// ----------------------------------------------------------------------
// The line-oriented editor
// ----------------------------------------------------------------------

/// Finds the span of lines belonging to `object_id`'s stanza: the index of
/// its `ObjectID` line and the index one past its last line.
fn stanza_bounds(lines: &[String], object_id: &str) -> Option<(usize, usize)> {
    let mut start = None;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let (attribute, value) = split_attribute(trimmed);
        if attribute == "ObjectID" {
            if start.is_some() {
                return start.map(|s| (s, idx));
            }
            if value == object_id {
                start = Some(idx);
            }
        }
    }
    start.map(|s| (s, lines.len()))
}

/// Rewrites (or with `value == None` deletes) the `attribute` line inside
/// `object_id`'s stanza, preserving the whitespace between the attribute name
/// and its value.
pub fn edit_value(
    file: &Path,
    object_id: &str,
    attribute: &str,
    value: Option<&str>,
) -> Result<(), ConfigError> {
    let contents = fs::read_to_string(file).map_err(|source| ConfigError::Io {
        path: file.display().to_string(),
        source,
    })?;
    let had_trailing_newline = contents.ends_with('\n');
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

    let (start, end) = stanza_bounds(&lines, object_id).ok_or_else(|| {
        ConfigError::EditTargetMissing {
            object: object_id.to_string(),
            attribute: attribute.to_string(),
            file: file.display().to_string(),
        }
    })?;

    let mut target = None;
    for idx in start + 1..end {
        let trimmed = lines[idx].trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        let (name, _) = split_attribute(trimmed);
        if name == attribute {
            target = Some(idx);
            break;
        }
    }
    let Some(idx) = target else {
        return Err(ConfigError::EditTargetMissing {
            object: object_id.to_string(),
            attribute: attribute.to_string(),
            file: file.display().to_string(),
        });
    };

    match value {
        None => {
            lines.remove(idx);
        }
        Some(value) => {
            let rewritten = {
                let line = &lines[idx];
                let indent_len = line.len() - line.trim_start().len();
                let indent = &line[..indent_len];
                let rest = &line[indent_len + attribute.len()..];
                let delim_len = rest
                    .char_indices()
                    .take_while(|(_, c)| *c == '=' || *c == ' ' || *c == '\t')
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                let delim = if delim_len == 0 { " " } else { &rest[..delim_len] };
                format!("{indent}{attribute}{delim}{value}")
            };
            lines[idx] = rewritten;
        }
    }

    let mut output = lines.join("\n");
    if had_trailing_newline && !output.is_empty() {
        output.push('\n');
    }
    fs::write(file, output).map_err(|source| ConfigError::Io {
        path: file.display().to_string(),
        source,
    })
}

/// Inserts a brand new attribute line immediately after the object's
/// `ObjectID` declaration, copying that line's indentation and delimiter
/// style.
pub fn add_attribute(
    file: &Path,
    object_id: &str,
    attribute: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let contents = fs::read_to_string(file).map_err(|source| ConfigError::Io {
        path: file.display().to_string(),
        source,
    })?;
    let had_trailing_newline = contents.ends_with('\n');
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

    let (start, _) = stanza_bounds(&lines, object_id).ok_or_else(|| {
        ConfigError::EditTargetMissing {
            object: object_id.to_string(),
            attribute: attribute.to_string(),
            file: file.display().to_string(),
        }
    })?;

    let id_line = &lines[start];
    let indent_len = id_line.len() - id_line.trim_start().len();
    let indent = &id_line[..indent_len];
    let rest = &id_line[indent_len + "ObjectID".len()..];
    let uses_equals = rest.trim_start().is_empty() || rest.starts_with('=');
    let new_line = if uses_equals {
        format!("{indent}{attribute}={value}")
    } else {
        let delim: String = rest.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        format!("{indent}{attribute}{delim}{value}")
    };
    lines.insert(start + 1, new_line);

    let mut output = lines.join("\n");
    if had_trailing_newline && !output.is_empty() {
        output.push('\n');
    }
    fs::write(file, output).map_err(|source| ConfigError::Io {
        path: file.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_accepts_both_delimiters() {
        assert_eq!(split_attribute("ObjectID=shell"), ("ObjectID", "shell"));
        assert_eq!(split_attribute("ObjectID shell"), ("ObjectID", "shell"));
        assert_eq!(split_attribute("ObjectID \t shell"), ("ObjectID", "shell"));
        assert_eq!(
            split_attribute("ObjectStartCommand /bin/sleep 60"),
            ("ObjectStartCommand", "/bin/sleep 60")
        );
    }

    #[test]
    fn signal_names_map_to_themselves() {
        assert_eq!(parse_signal("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("SIGHUP"), Some(libc::SIGHUP));
        assert_eq!(parse_signal("SIGUSR1"), Some(libc::SIGUSR1));
        assert_eq!(parse_signal("9"), Some(9));
        assert_eq!(parse_signal("SIGBOGUS"), None);
        assert_eq!(parse_signal("0"), None);
    }

    #[test]
    fn identifier_shape() {
        assert!(valid_identifier("sshd"));
        assert!(valid_identifier("net-lo_2"));
        assert!(!valid_identifier("bad id"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("semi;colon"));
    }
}

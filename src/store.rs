//! The in-memory catalog of supervised objects.
//!
//! Insertion order is load order and every sweep iterates it, so repeated
//! `by_priority` calls walk a priority band deterministically. The store also
//! owns the runlevel inheritance table, priority aliases, and global
//! environment variables, all of which come from configuration.

use tracing::{error, warn};

use crate::{
    error::Outcome,
    logging,
    object::{Object, StopMode},
};

/// How an object belongs to a runlevel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    No,
    Direct,
    Inherited,
}

impl Membership {
    /// Digit used in the `OBJRLS_CHECK` reply.
    pub fn wire_digit(self) -> char {
        match self {
            Membership::No => '0',
            Membership::Direct => '1',
            Membership::Inherited => '2',
        }
    }

    pub fn counts(self) -> bool {
        !matches!(self, Membership::No)
    }
}

/// Result of the post-load integrity scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub outcome: Outcome,
    /// The configured runlevel names nothing; the boot path prompts for a
    /// replacement on the TTY, a reload fails outright.
    pub runlevel_invalid: bool,
}

/// The object catalog plus config-scoped lookup tables.
#[derive(Debug, Default, Clone)]
pub struct Store {
    objects: Vec<Object>,
    /// `(inheriter, inherited)` pairs, in declaration order.
    inheritance: Vec<(String, String)>,
    /// Named integers usable as priorities.
    priority_aliases: Vec<(String, u32)>,
    /// `KEY=VALUE` pairs applied to every spawned child.
    pub global_env: Vec<String>,
    /// The runlevel the system is currently in (or booting to).
    pub current_runlevel: String,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    // ------------------------------------------------------------------
    // Catalog access
    // ------------------------------------------------------------------

    /// Adds an object, refusing duplicates by id.
    pub fn add(&mut self, object: Object) -> Result<(), crate::error::ConfigError> {
        if self.lookup(&object.id).is_some() {
            return Err(crate::error::ConfigError::DuplicateObject(object.id));
        }
        self.objects.push(object);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<&Object> {
        self.objects.iter().find(|obj| obj.id == id)
    }

    pub fn lookup_mut(&mut self, id: &str) -> Option<&mut Object> {
        self.objects.iter_mut().find(|obj| obj.id == id)
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [Object] {
        &mut self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Releases every object and lookup table.
    pub fn shutdown(&mut self) {
        self.objects.clear();
        self.inheritance.clear();
        self.priority_aliases.clear();
        self.global_env.clear();
    }

    // ------------------------------------------------------------------
    // Priority sweeps
    // ------------------------------------------------------------------

    /// Returns the index of the next object at `priority`, starting the scan
    /// at `cursor`. With a runlevel filter, direct and inherited membership
    /// both count, and halt-only objects are invisible to starting sweeps.
    pub fn by_priority(
        &self,
        runlevel: Option<&str>,
        cursor: usize,
        starting: bool,
        priority: u32,
    ) -> Option<usize> {
        self.objects
            .iter()
            .enumerate()
            .skip(cursor)
            .find(|(_, obj)| {
                let obj_priority = if starting { obj.start_priority } else { obj.stop_priority };
                if obj_priority != priority {
                    return false;
                }
                match runlevel {
                    None => true,
                    Some(rl) => {
                        if starting && obj.opts.halt_only {
                            return false;
                        }
                        self.belongs(rl, obj).counts()
                    }
                }
            })
            .map(|(idx, _)| idx)
    }

    /// The highest start (or stop) priority across the catalog; sweeps run
    /// from 1 to this value inclusive.
    pub fn highest_priority(&self, starting: bool) -> u32 {
        self.objects
            .iter()
            .map(|obj| if starting { obj.start_priority } else { obj.stop_priority })
            .max()
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Runlevels
    // ------------------------------------------------------------------

    /// Membership query including inheritance. Direct membership wins over
    /// inherited when both hold.
    pub fn belongs(&self, runlevel: &str, obj: &Object) -> Membership {
        if obj.runlevels.iter().any(|rl| rl == runlevel) {
            return Membership::Direct;
        }
        for rl in &obj.runlevels {
            if self.inherits(runlevel, rl) {
                return Membership::Inherited;
            }
        }
        Membership::No
    }

    /// Does `inheriter` inherit `inherited`?
    pub fn inherits(&self, inheriter: &str, inherited: &str) -> bool {
        self.inheritance
            .iter()
            .any(|(er, ed)| er == inheriter && ed == inherited)
    }

    pub fn add_inheritance(&mut self, inheriter: &str, inherited: &str) {
        self.inheritance.push((inheriter.to_string(), inherited.to_string()));
    }

    /// A runlevel is valid when at least one non-halt-only object belongs to
    /// it, directly or by inheritance.
    pub fn valid_runlevel(&self, runlevel: &str) -> bool {
        self.objects
            .iter()
            .any(|obj| !obj.opts.halt_only && self.belongs(runlevel, obj).counts())
    }

    pub fn runlevel_add(&mut self, id: &str, runlevel: &str) -> bool {
        let Some(direct) = self.lookup(id).map(|obj| obj.runlevels.iter().any(|rl| rl == runlevel))
        else {
            return false;
        };
        if direct {
            return false;
        }
        let obj = self.lookup_mut(id).expect("looked up above");
        obj.runlevels.push(runlevel.to_string());
        true
    }

    pub fn runlevel_del(&mut self, id: &str, runlevel: &str) -> bool {
        let Some(obj) = self.lookup_mut(id) else {
            return false;
        };
        let before = obj.runlevels.len();
        obj.runlevels.retain(|rl| rl != runlevel);
        obj.runlevels.len() != before
    }

    // ------------------------------------------------------------------
    // Priority aliases
    // ------------------------------------------------------------------

    pub fn add_priority_alias(&mut self, alias: &str, target: u32) {
        if self.priority_aliases.iter().any(|(name, _)| name == alias) {
            return;
        }
        self.priority_aliases.push((alias.to_string(), target));
    }

    /// Resolves a priority alias, falling back to the named object's own
    /// priority so one object can sort itself relative to another.
    pub fn resolve_priority(&self, name: &str, starting: bool) -> Option<u32> {
        if let Some((_, target)) = self.priority_aliases.iter().find(|(alias, _)| alias == name) {
            return Some(*target);
        }
        self.lookup(name).map(|obj| {
            if starting { obj.start_priority } else { obj.stop_priority }
        }).filter(|p| *p != 0)
    }

    // ------------------------------------------------------------------
    // Environment variables
    // ------------------------------------------------------------------

    /// Appends a `KEY=VALUE` pair to the object's list, or the global list
    /// when no object is named.
    pub fn env_add(&mut self, id: Option<&str>, var: &str) -> bool {
        match id {
            None => {
                self.global_env.push(var.to_string());
                true
            }
            Some(id) => match self.lookup_mut(id) {
                Some(obj) => {
                    obj.env_vars.push(var.to_string());
                    true
                }
                None => false,
            },
        }
    }

    /// Removes a `KEY=VALUE` pair by exact match.
    pub fn env_del(&mut self, id: Option<&str>, var: &str) -> bool {
        let list = match id {
            None => &mut self.global_env,
            Some(id) => match self.lookup_mut(id) {
                Some(obj) => &mut obj.env_vars,
                None => return false,
            },
        };
        let before = list.len();
        list.retain(|entry| entry != var);
        list.len() != before
    }

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------

    /// Checks the §3 invariants once after load, downgrading or disabling
    /// offenders and reporting each to the log. `Failure` aborts the boot.
    pub fn scan_integrity(&mut self) -> IntegrityReport {
        let mut outcome = Outcome::Success;
        let problem = |text: String, severity: Outcome| {
            match severity {
                Outcome::Failure => error!("{text}"),
                _ => warn!("{text}"),
            }
            logging::write_line(&text);
        };

        if self.objects.is_empty() {
            problem("no objects found in configuration".to_string(), Outcome::Failure);
            return IntegrityReport { outcome: Outcome::Failure, runlevel_invalid: false };
        }

        let runlevel_invalid =
            self.current_runlevel.is_empty() || !self.valid_runlevel(&self.current_runlevel);
        if runlevel_invalid {
            if self.current_runlevel.is_empty() {
                problem("no default runlevel specified".to_string(), Outcome::Failure);
            } else {
                problem(
                    format!("the runlevel \"{}\" does not exist", self.current_runlevel),
                    Outcome::Failure,
                );
            }
        }

        // Duplicate ids are a loader bug or a hand-edited store; fatal.
        for idx in 0..self.objects.len() {
            for other in idx + 1..self.objects.len() {
                if self.objects[idx].id == self.objects[other].id {
                    problem(
                        format!("two objects in configuration with id \"{}\"", self.objects[idx].id),
                        Outcome::Failure,
                    );
                    outcome = Outcome::Failure;
                }
            }
        }

        for obj in &mut self.objects {
            if obj.start_cmd.is_none()
                && obj.stop_cmd.is_none()
                && obj.stop_mode == StopMode::Command
            {
                problem(
                    format!("object {} has neither a start nor a stop command", obj.id),
                    Outcome::Failure,
                );
                outcome = Outcome::Failure;
            }

            if !obj.opts.halt_only && obj.start_cmd.is_none() {
                problem(
                    format!(
                        "object {} has no start command and is not HALTONLY; disabling",
                        obj.id
                    ),
                    Outcome::Warning,
                );
                obj.opts.exec = false;
                obj.opts.pivot_root = false;
                obj.enabled = Some(false);
                obj.started = false;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.pidfile.is_some() && obj.stop_mode == StopMode::Pid {
                problem(
                    format!(
                        "object {} stops via tracked PID but has a pidfile; switching to PIDFILE",
                        obj.id
                    ),
                    Outcome::Warning,
                );
                obj.stop_mode = StopMode::PidFile;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.pidfile.is_none() && obj.stop_mode == StopMode::PidFile {
                problem(
                    format!(
                        "object {} stops via pidfile but none is configured; switching to PID",
                        obj.id
                    ),
                    Outcome::Warning,
                );
                obj.stop_mode = StopMode::Pid;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.opts.pivot_root && obj.opts.exec {
                problem(
                    format!("object {} has both EXEC and PIVOT set; disabling", obj.id),
                    Outcome::Warning,
                );
                obj.enabled = Some(false);
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.enabled.is_none() {
                problem(
                    format!("object {} never set ObjectEnabled", obj.id),
                    Outcome::Failure,
                );
                outcome = Outcome::Failure;
            }

            if obj.opts.halt_only && obj.stop_mode != StopMode::Command {
                problem(
                    format!(
                        "object {} is HALTONLY but does not stop via a command; disabling",
                        obj.id
                    ),
                    Outcome::Warning,
                );
                obj.enabled = Some(false);
                obj.started = false;
                obj.stop_mode = StopMode::None;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.opts.halt_only && (obj.opts.pivot_root || obj.opts.exec) {
                problem(
                    format!("object {} mixes HALTONLY with PIVOT or EXEC; disabling", obj.id),
                    Outcome::Warning,
                );
                obj.opts.pivot_root = false;
                obj.opts.exec = false;
                obj.enabled = Some(false);
                obj.started = false;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.opts.no_stop_wait && obj.opts.stop_timeout != crate::constants::STOP_TIMEOUT_SECS
            {
                problem(
                    format!("object {} sets both NOSTOPWAIT and STOPTIMEOUT", obj.id),
                    Outcome::Warning,
                );
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if (obj.opts.pivot_root || obj.opts.exec) && obj.stop_mode != StopMode::None {
                problem(
                    format!(
                        "object {} replaces init but has a stop method; forcing NONE",
                        obj.id
                    ),
                    Outcome::Warning,
                );
                obj.stop_mode = StopMode::None;
                obj.stop_priority = 0;
                obj.stop_cmd = None;
                outcome = outcome.worst_of(Outcome::Warning);
            }

            if obj.opts.pivot_root && obj.pidfile.is_some() {
                problem(
                    format!("object {} has PIVOT set and a pidfile; dropping the pidfile", obj.id),
                    Outcome::Warning,
                );
                obj.pidfile = None;
                outcome = outcome.worst_of(Outcome::Warning);
            }
        }

        if runlevel_invalid && outcome != Outcome::Failure {
            // Report it, but leave the decision (prompt vs. restore backup)
            // to the caller.
            outcome = outcome.worst_of(Outcome::Warning);
        }

        IntegrityReport { outcome, runlevel_invalid }
    }

    /// Carries `started`/`pid`/`started_since` forward from a previous store
    /// into this one, matching objects by id. Used by config reload and by
    /// the re-exec recovery handshake.
    pub fn adopt_runtime_state(&mut self, previous: &Store) {
        for old in previous.objects() {
            if let Some(current) = self.lookup_mut(&old.id) {
                current.started = old.started;
                current.pid = old.pid;
                current.started_since = old.started_since;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn obj(id: &str, start_priority: u32, runlevels: &[&str]) -> Object {
        let mut obj = Object::new(id, Path::new("/tmp/epoch.conf"));
        obj.start_cmd = Some(format!("/bin/true {id}"));
        obj.start_priority = start_priority;
        obj.stop_priority = start_priority;
        obj.stop_mode = StopMode::None;
        obj.enabled = Some(true);
        obj.runlevels = runlevels.iter().map(|s| s.to_string()).collect();
        obj
    }

    fn store_with(objects: Vec<Object>) -> Store {
        let mut store = Store::new();
        store.current_runlevel = "default".to_string();
        for object in objects {
            store.add(object).expect("unique ids");
        }
        store
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut store = store_with(vec![obj("a", 1, &["default"])]);
        let err = store.add(obj("a", 2, &["default"])).unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::DuplicateObject(_)));
    }

    #[test]
    fn by_priority_walks_in_insertion_order() {
        let store = store_with(vec![
            obj("first", 2, &["default"]),
            obj("second", 2, &["default"]),
            obj("third", 1, &["default"]),
        ]);
        let a = store.by_priority(Some("default"), 0, true, 2).expect("first hit");
        assert_eq!(store.objects()[a].id, "first");
        let b = store.by_priority(Some("default"), a + 1, true, 2).expect("second hit");
        assert_eq!(store.objects()[b].id, "second");
        assert_eq!(store.by_priority(Some("default"), b + 1, true, 2), None);
    }

    #[test]
    fn starting_sweeps_skip_halt_only() {
        let mut halting = obj("umount", 1, &["default"]);
        halting.opts.halt_only = true;
        halting.stop_mode = StopMode::Command;
        halting.stop_cmd = Some("/bin/umount -a".to_string());
        let store = store_with(vec![halting, obj("svc", 1, &["default"])]);

        let idx = store.by_priority(Some("default"), 0, true, 1).expect("match");
        assert_eq!(store.objects()[idx].id, "svc");
        // Stop sweeps still see it.
        let idx = store.by_priority(Some("default"), 0, false, 1).expect("match");
        assert_eq!(store.objects()[idx].id, "umount");
    }

    #[test]
    fn inherited_membership_counts() {
        let mut store = store_with(vec![obj("svc", 1, &["base"])]);
        store.add_inheritance("graphical", "base");

        let svc = store.lookup("svc").expect("svc").clone();
        assert_eq!(store.belongs("base", &svc), Membership::Direct);
        assert_eq!(store.belongs("graphical", &svc), Membership::Inherited);
        assert_eq!(store.belongs("maint", &svc), Membership::No);
        assert!(store.valid_runlevel("graphical"));
        assert!(!store.valid_runlevel("maint"));
    }

    #[test]
    fn highest_priority_scans_both_directions() {
        let mut stopper = obj("late", 9, &["default"]);
        stopper.stop_priority = 40;
        let store = store_with(vec![obj("early", 3, &["default"]), stopper]);
        assert_eq!(store.highest_priority(true), 9);
        assert_eq!(store.highest_priority(false), 40);
    }

    #[test]
    fn priority_alias_falls_back_to_object_priority() {
        let mut store = store_with(vec![obj("network", 7, &["default"])]);
        store.add_priority_alias("services", 20);
        assert_eq!(store.resolve_priority("services", true), Some(20));
        assert_eq!(store.resolve_priority("network", true), Some(7));
        assert_eq!(store.resolve_priority("missing", true), None);
    }

    #[test]
    fn integrity_downgrades_pidfile_mismatch() {
        let mut with_pidfile = obj("a", 1, &["default"]);
        with_pidfile.stop_mode = StopMode::Pid;
        with_pidfile.pidfile = Some("/run/a.pid".into());
        let mut without_pidfile = obj("b", 1, &["default"]);
        without_pidfile.stop_mode = StopMode::PidFile;
        let mut store = store_with(vec![with_pidfile, without_pidfile]);

        let report = store.scan_integrity();
        assert_eq!(report.outcome, Outcome::Warning);
        assert!(!report.runlevel_invalid);
        assert_eq!(store.lookup("a").unwrap().stop_mode, StopMode::PidFile);
        assert_eq!(store.lookup("b").unwrap().stop_mode, StopMode::Pid);
    }

    #[test]
    fn integrity_disables_exec_pivot_conflict() {
        let mut confused = obj("c", 1, &["default"]);
        confused.opts.exec = true;
        confused.opts.pivot_root = true;
        confused.stop_mode = StopMode::None;
        let mut store = store_with(vec![confused, obj("ok", 1, &["default"])]);

        let report = store.scan_integrity();
        assert_eq!(report.outcome, Outcome::Warning);
        assert_eq!(store.lookup("c").unwrap().enabled, Some(false));
    }

    #[test]
    fn integrity_fails_on_unset_enabled() {
        let mut unset = obj("u", 1, &["default"]);
        unset.enabled = None;
        let mut store = store_with(vec![unset]);
        let report = store.scan_integrity();
        assert_eq!(report.outcome, Outcome::Failure);
    }

    #[test]
    fn integrity_flags_unknown_runlevel() {
        let mut store = store_with(vec![obj("svc", 1, &["default"])]);
        store.current_runlevel = "nosuch".to_string();
        let report = store.scan_integrity();
        assert!(report.runlevel_invalid);
    }

    #[test]
    fn adopt_runtime_state_matches_by_id() {
        let mut old = store_with(vec![obj("svc", 1, &["default"])]);
        {
            let svc = old.lookup_mut("svc").unwrap();
            svc.started = true;
            svc.pid = 4242;
            svc.started_since = 1000;
        }
        let mut new = store_with(vec![obj("svc", 1, &["default"]), obj("fresh", 2, &["default"])]);
        new.adopt_runtime_state(&old);
        let svc = new.lookup("svc").unwrap();
        assert!(svc.started);
        assert_eq!(svc.pid, 4242);
        assert_eq!(svc.started_since, 1000);
        assert!(!new.lookup("fresh").unwrap().started);
    }

    #[test]
    fn env_add_del_round_trip() {
        let mut store = store_with(vec![obj("svc", 1, &["default"])]);
        assert!(store.env_add(None, "PATH=/bin"));
        assert!(store.env_add(Some("svc"), "MODE=fast"));
        assert!(!store.env_add(Some("ghost"), "X=1"));
        assert!(store.env_del(Some("svc"), "MODE=fast"));
        assert!(!store.env_del(Some("svc"), "MODE=fast"));
        assert!(store.env_del(None, "PATH=/bin"));
    }

    #[test]
    fn runlevel_membership_mutation() {
        let mut store = store_with(vec![obj("svc", 1, &["default"])]);
        assert!(store.runlevel_add("svc", "maint"));
        assert!(!store.runlevel_add("svc", "maint"));
        assert!(store.runlevel_del("svc", "maint"));
        assert!(!store.runlevel_del("svc", "maint"));
        assert!(!store.runlevel_add("ghost", "maint"));
    }
}

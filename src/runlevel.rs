//! The runlevel engine: priority-ordered start/stop sweeps.

use tracing::{error, info};

use crate::{
    error::Outcome,
    executor, logging,
    signals::{self, BootMode},
    store::Store,
};

/// Starts (or stops) every eligible object, priority band by priority band.
/// Used for boot and shutdown. Starting sweeps are filtered to the current
/// runlevel and skip halt-only objects; stopping sweeps cover everything,
/// including disabled objects, but skip disabled halt-only ones.
pub fn run_all_objects(store: &mut Store, starting: bool) -> Outcome {
    let max_priority = store.highest_priority(starting);
    if max_priority == 0 && starting {
        error!("all objects have a start priority of zero");
        return Outcome::Failure;
    }

    signals::set_boot_mode(if starting { BootMode::Bootup } else { BootMode::Shutdown });

    let global_env = store.global_env.clone();
    let runlevel = starting.then(|| store.current_runlevel.clone());

    for priority in 1..=max_priority {
        let mut cursor = 0;
        while let Some(idx) = store.by_priority(runlevel.as_deref(), cursor, starting, priority) {
            cursor = idx + 1;
            let obj = &store.objects()[idx];

            if !obj.is_enabled() && (starting || obj.opts.halt_only) {
                continue;
            }
            if starting && obj.opts.halt_only {
                continue;
            }
            if starting == obj.started {
                continue;
            }

            let obj = &mut store.objects_mut()[idx];
            executor::process_object(obj, &global_env, starting, true);
        }
    }

    signals::set_boot_mode(BootMode::Neutral);
    Outcome::Success
}

/// Switches to `target`: stops what doesn't belong there (minus persistent
/// and halt-only objects), then starts what does.
pub fn switch_runlevel(store: &mut Store, target: &str) -> Outcome {
    let members = store
        .objects()
        .iter()
        .filter(|obj| {
            !obj.opts.halt_only
                && store.belongs(target, obj).counts()
                && obj.is_enabled()
                && obj.start_priority > 0
        })
        .count();
    if members == 0 {
        return Outcome::Failure;
    }

    let global_env = store.global_env.clone();
    let leaving = store.current_runlevel.clone();

    // Stop phase: everything in the old runlevel that the new one doesn't
    // claim, unless it insists on surviving transitions.
    let max_stop = store.highest_priority(false);
    for priority in 1..=max_stop {
        let mut cursor = 0;
        while let Some(idx) = store.by_priority(Some(&leaving), cursor, false, priority) {
            cursor = idx + 1;
            let obj = &store.objects()[idx];
            if obj.started
                && !obj.opts.persistent
                && !obj.opts.halt_only
                && !store.belongs(target, obj).counts()
            {
                let obj = &mut store.objects_mut()[idx];
                executor::process_object(obj, &global_env, false, true);
            }
        }
    }

    store.current_runlevel = target.to_string();

    // Start phase: everything enabled in the new runlevel that isn't
    // already up.
    let max_start = store.highest_priority(true);
    for priority in 1..=max_start {
        let mut cursor = 0;
        while let Some(idx) = store.by_priority(Some(target), cursor, true, priority) {
            cursor = idx + 1;
            let obj = &store.objects()[idx];
            if obj.is_enabled() && !obj.started {
                let obj = &mut store.objects_mut()[idx];
                executor::process_object(obj, &global_env, true, true);
            }
        }
    }

    info!("switched to runlevel \"{target}\"");
    logging::write_line(&format!("switched to runlevel \"{target}\""));
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, StopMode};
    use std::path::Path;

    fn quick_obj(id: &str, runlevels: &[&str]) -> Object {
        let mut obj = Object::new(id, Path::new("/tmp/epoch-test.conf"));
        obj.start_cmd = Some(format!("/bin/true {id}"));
        obj.start_priority = 1;
        obj.stop_priority = 1;
        obj.stop_mode = StopMode::None;
        obj.enabled = Some(true);
        obj.opts.no_track = true;
        obj.runlevels = runlevels.iter().map(|s| s.to_string()).collect();
        obj
    }

    fn test_store(objects: Vec<Object>) -> Store {
        let mut store = Store::new();
        store.current_runlevel = "default".to_string();
        for obj in objects {
            store.add(obj).expect("unique");
        }
        store
    }

    #[test]
    fn switch_fails_on_empty_runlevel() {
        let _guard = crate::test_utils::env_lock();
        let mut store = test_store(vec![quick_obj("a", &["default"])]);
        assert_eq!(switch_runlevel(&mut store, "ghost"), Outcome::Failure);
        assert_eq!(store.current_runlevel, "default");
    }

    #[test]
    fn switch_respects_persistence() {
        let _guard = crate::test_utils::env_lock();
        let mut persistent = quick_obj("keeper", &["default"]);
        persistent.opts.persistent = true;
        let mut store = test_store(vec![
            quick_obj("a", &["default"]),
            persistent,
            quick_obj("c", &["maint"]),
        ]);

        assert_eq!(run_all_objects(&mut store, true), Outcome::Success);
        assert!(store.lookup("a").unwrap().started);
        assert!(store.lookup("keeper").unwrap().started);
        assert!(!store.lookup("c").unwrap().started);

        assert_eq!(switch_runlevel(&mut store, "maint"), Outcome::Success);
        assert!(!store.lookup("a").unwrap().started);
        assert!(store.lookup("keeper").unwrap().started);
        assert!(store.lookup("c").unwrap().started);
        assert_eq!(store.current_runlevel, "maint");
    }

    #[test]
    fn boot_skips_disabled_objects() {
        let _guard = crate::test_utils::env_lock();
        let mut disabled = quick_obj("off", &["default"]);
        disabled.enabled = Some(false);
        let mut store = test_store(vec![disabled, quick_obj("on", &["default"])]);

        assert_eq!(run_all_objects(&mut store, true), Outcome::Success);
        assert!(!store.lookup("off").unwrap().started);
        assert!(store.lookup("on").unwrap().started);
    }

    #[test]
    fn all_zero_start_priorities_fail_boot() {
        let _guard = crate::test_utils::env_lock();
        let mut zeroed = quick_obj("z", &["default"]);
        zeroed.start_priority = 0;
        let mut store = test_store(vec![zeroed]);
        assert_eq!(run_all_objects(&mut store, true), Outcome::Failure);
    }

    #[test]
    fn shutdown_stops_disabled_but_not_disabled_haltonly() {
        let _guard = crate::test_utils::env_lock();
        let mut disabled = quick_obj("d", &["default"]);
        disabled.enabled = Some(false);
        disabled.started = true;

        let mut halt_only = quick_obj("h", &["default"]);
        halt_only.opts.halt_only = true;
        halt_only.enabled = Some(false);
        halt_only.started = true;
        halt_only.stop_mode = StopMode::Command;
        halt_only.stop_cmd = Some("/bin/true".to_string());

        let mut store = test_store(vec![disabled, halt_only]);
        assert_eq!(run_all_objects(&mut store, false), Outcome::Success);
        assert!(!store.lookup("d").unwrap().started);
        // Disabled halt-only objects keep their state; they were skipped.
        assert!(store.lookup("h").unwrap().started);
    }
}

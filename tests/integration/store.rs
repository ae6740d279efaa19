//! Object store invariants after a load and integrity scan.

mod common;

use epoch::{config, object::StopMode};

const MESSY_CONFIG: &str = "\
DefaultRunlevel default

# Stops via PID but declares a pidfile: must be upgraded to PIDFILE.
ObjectID web
ObjectEnabled true
ObjectStartCommand /bin/true web
ObjectStopCommand PID
ObjectPIDFile /run/web.pid
ObjectStartPriority 1
ObjectRunlevels default

# Claims PIDFILE with no path: must be downgraded to PID.
ObjectID cache
ObjectEnabled true
ObjectStartCommand /bin/true cache
ObjectStopCommand PIDFILE
ObjectStartPriority 2
ObjectRunlevels default

# EXEC and PIVOT together make no sense: must be disabled.
ObjectID confused
ObjectEnabled true
ObjectStartCommand /newroot /oldroot
ObjectStopCommand NONE
ObjectStartPriority 3
ObjectOptions EXEC PIVOT
ObjectRunlevels default

# Halt-only without a stop command style stop mode: disabled.
ObjectID broken-halt
ObjectEnabled true
ObjectStopCommand PID
ObjectStartPriority 4
ObjectOptions HALTONLY
ObjectRunlevels default

ObjectID fine
ObjectEnabled true
ObjectStartCommand /bin/true fine
ObjectStopCommand /bin/true stop-fine
ObjectStartPriority 9
ObjectStopPriority 40
ObjectRunlevels default
";

#[test]
fn integrity_invariants_hold_after_scan() {
    let (_dir, path) = common::write_config(MESSY_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    let report = config.store.scan_integrity();

    // Everything was repairable, nothing fatal.
    assert!(report.outcome.ok());

    for obj in config.store.objects() {
        // halt_only implies stop_mode == COMMAND (or the object is disabled).
        if obj.opts.halt_only && obj.is_enabled() {
            assert_eq!(obj.stop_mode, StopMode::Command, "object {}", obj.id);
        }
        // pidfile set iff stop_mode == PIDFILE.
        assert_eq!(
            obj.pidfile.is_some(),
            obj.stop_mode == StopMode::PidFile,
            "object {}",
            obj.id
        );
        // pivot_root and exec never survive together.
        assert!(!(obj.opts.pivot_root && obj.opts.exec) || !obj.is_enabled());
        // enabled is explicit after the scan.
        assert!(obj.enabled.is_some(), "object {}", obj.id);
    }

    assert_eq!(config.store.lookup("web").unwrap().stop_mode, StopMode::PidFile);
    assert_eq!(config.store.lookup("cache").unwrap().stop_mode, StopMode::Pid);
    assert_eq!(config.store.lookup("confused").unwrap().enabled, Some(false));
    assert_eq!(config.store.lookup("broken-halt").unwrap().enabled, Some(false));
}

#[test]
fn ids_are_unique() {
    let (_dir, path) = common::write_config(MESSY_CONFIG);
    let config = config::load(&path, None).expect("load");
    for (idx, a) in config.store.objects().iter().enumerate() {
        for b in &config.store.objects()[idx + 1..] {
            assert_ne!(a.id, b.id);
        }
    }
}

#[test]
fn highest_priority_matches_maxima() {
    let (_dir, path) = common::write_config(MESSY_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();

    let max_start =
        config.store.objects().iter().map(|o| o.start_priority).max().unwrap_or(0);
    let max_stop =
        config.store.objects().iter().map(|o| o.stop_priority).max().unwrap_or(0);
    assert_eq!(config.store.highest_priority(true), max_start);
    assert_eq!(config.store.highest_priority(false), max_stop);
    assert_eq!(config.store.highest_priority(true), 9);
    assert_eq!(config.store.highest_priority(false), 40);
}

#[test]
fn store_shutdown_releases_everything() {
    let (_dir, path) = common::write_config(MESSY_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    assert!(!config.store.is_empty());
    config.store.shutdown();
    assert!(config.store.is_empty());
    assert!(config.store.global_env.is_empty());
}

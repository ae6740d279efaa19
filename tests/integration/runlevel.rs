//! Runlevel transitions over a real (if tiny) object set.

mod common;

use epoch::{config, error::Outcome, runlevel};

const RUNLEVEL_CONFIG: &str = "\
DefaultRunlevel default
RunlevelInherits everything default
RunlevelInherits everything maint

ObjectID alpha
ObjectEnabled true
ObjectStartCommand /bin/true alpha
ObjectStopCommand NONE
ObjectStartPriority 1
ObjectStopPriority 1
ObjectRunlevels default

ObjectID keeper
ObjectEnabled true
ObjectStartCommand /bin/true keeper
ObjectStopCommand NONE
ObjectStartPriority 2
ObjectStopPriority 2
ObjectOptions PERSISTENT
ObjectRunlevels default

ObjectID repair
ObjectEnabled true
ObjectStartCommand /bin/true repair
ObjectStopCommand NONE
ObjectStartPriority 1
ObjectStopPriority 1
ObjectRunlevels maint
";

#[test]
fn boot_then_switch_with_persistence() {
    let _guard = common::serial_lock();
    let (_dir, path) = common::write_config(RUNLEVEL_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    assert!(config.store.scan_integrity().outcome.ok());

    assert_eq!(runlevel::run_all_objects(&mut config.store, true), Outcome::Success);
    assert!(config.store.lookup("alpha").unwrap().started);
    assert!(config.store.lookup("keeper").unwrap().started);
    assert!(!config.store.lookup("repair").unwrap().started);

    assert_eq!(runlevel::switch_runlevel(&mut config.store, "maint"), Outcome::Success);
    assert_eq!(config.store.current_runlevel, "maint");
    assert!(!config.store.lookup("alpha").unwrap().started);
    assert!(config.store.lookup("keeper").unwrap().started, "persistent survives");
    assert!(config.store.lookup("repair").unwrap().started);
}

#[test]
fn switching_to_an_inheriting_runlevel_keeps_everyone() {
    let _guard = common::serial_lock();
    let (_dir, path) = common::write_config(RUNLEVEL_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();

    assert_eq!(runlevel::run_all_objects(&mut config.store, true), Outcome::Success);

    // "everything" inherits both runlevels, so nothing stops and the
    // maint member starts too.
    assert_eq!(
        runlevel::switch_runlevel(&mut config.store, "everything"),
        Outcome::Success
    );
    assert!(config.store.lookup("alpha").unwrap().started);
    assert!(config.store.lookup("keeper").unwrap().started);
    assert!(config.store.lookup("repair").unwrap().started);
}

#[test]
fn invalid_target_is_rejected_without_changes() {
    let _guard = common::serial_lock();
    let (_dir, path) = common::write_config(RUNLEVEL_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();

    assert_eq!(runlevel::run_all_objects(&mut config.store, true), Outcome::Success);
    assert_eq!(runlevel::switch_runlevel(&mut config.store, "nosuch"), Outcome::Failure);
    assert_eq!(config.store.current_runlevel, "default");
    assert!(config.store.lookup("alpha").unwrap().started);
}

#[test]
fn shutdown_sweep_stops_everything() {
    let _guard = common::serial_lock();
    let (_dir, path) = common::write_config(RUNLEVEL_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();

    assert_eq!(runlevel::run_all_objects(&mut config.store, true), Outcome::Success);
    assert_eq!(runlevel::run_all_objects(&mut config.store, false), Outcome::Success);
    for obj in config.store.objects() {
        assert!(!obj.started, "object {} should be down", obj.id);
    }
}

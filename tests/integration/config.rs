//! Configuration loader coverage: attributes, options, aliases,
//! inheritance, imports, and comments.

mod common;

use epoch::{
    config,
    error::Outcome,
    object::StopMode,
    store::Membership,
};

const BASE_CONFIG: &str = "\
# Global settings
DefaultRunlevel default
EnableLogging true
BlankLogOnBoot false
DisableCAD true
GlobalEnvVar TERM=linux
RunlevelInherits graphical default
DefinePriority services 20
MountVirtual procfs ~devshm+

ObjectID sshd
\tObjectDescription Secure shell daemon
\tObjectEnabled true
\tObjectStartCommand /usr/sbin/sshd -D
\tObjectStopCommand PID
\tObjectStartPriority services+2
\tObjectStopPriority 5
\tObjectOptions SERVICE AUTORESTART=15 TERMSIGNAL=SIGHUP MAPEXITSTATUS=3,WARNING
\tObjectEnvVar SSHD_OPTS=-4
\tObjectRunlevels default

ObjectID hwclock
\tObjectEnabled true
\tObjectStartCommand /sbin/hwclock --hctosys
\tObjectStopCommand NONE
\tObjectStartPriority 1
\tObjectOptions RUNONCE RAWDESCRIPTION
\tObjectRunlevels default rescue

>!> This whole stanza is commented out.
ObjectID ghost
ObjectEnabled true
<!<
ObjectID umount-all
\tObjectDescription Unmounting filesystems
\tObjectEnabled true
\tObjectStopCommand /bin/umount -a
\tObjectStopPriority 90
\tObjectOptions HALTONLY
\tObjectRunlevels default
";

#[test]
fn full_config_parses() {
    let (_dir, path) = common::write_config(BASE_CONFIG);
    let config = config::load(&path, None).expect("load");

    assert_eq!(config.store.current_runlevel, "default");
    assert!(config.settings.enable_logging);
    assert!(!config.settings.blank_log_on_boot);
    assert!(config.settings.disable_cad);
    assert_eq!(config.store.global_env, vec!["TERM=linux".to_string()]);
    assert_eq!(config.settings.mounts.len(), 2);
    assert!(config.settings.mounts[1].ignore_errors);
    assert!(config.settings.mounts[1].mkdir);

    assert_eq!(config.store.len(), 3);
    assert!(config.store.lookup("ghost").is_none());

    let sshd = config.store.lookup("sshd").expect("sshd");
    assert_eq!(sshd.description, "Secure shell daemon");
    assert_eq!(sshd.start_cmd.as_deref(), Some("/usr/sbin/sshd -D"));
    assert_eq!(sshd.stop_mode, StopMode::Pid);
    assert_eq!(sshd.start_priority, 22); // services alias + 2
    assert_eq!(sshd.stop_priority, 5);
    assert!(sshd.opts.is_service);
    assert!(sshd.opts.auto_restart);
    assert_eq!(sshd.opts.restart_floor_secs, 15);
    assert_eq!(sshd.term_signal, libc::SIGHUP);
    assert_eq!(sshd.env_vars, vec!["SSHD_OPTS=-4".to_string()]);
    assert_eq!(sshd.exit_map.len(), 1);
    assert_eq!(sshd.exit_map[0].exit_status, 3);
    assert_eq!(sshd.exit_map[0].value, Outcome::Warning);
    assert_eq!(sshd.runlevels, vec!["default".to_string()]);

    let hwclock = config.store.lookup("hwclock").expect("hwclock");
    assert_eq!(hwclock.stop_mode, StopMode::None);
    assert!(hwclock.opts.run_once);
    assert!(hwclock.opts.raw_description);
    assert_eq!(hwclock.runlevels, vec!["default".to_string(), "rescue".to_string()]);
    // Description defaults to the id.
    assert_eq!(hwclock.description, "hwclock");

    let umount = config.store.lookup("umount-all").expect("umount-all");
    assert!(umount.opts.halt_only);
    assert!(umount.opts.persistent);
    assert!(umount.started); // born started so the shutdown sweep runs it
    assert_eq!(umount.stop_mode, StopMode::Command);
}

#[test]
fn inheritance_and_integrity() {
    let (_dir, path) = common::write_config(BASE_CONFIG);
    let mut config = config::load(&path, None).expect("load");

    let report = config.store.scan_integrity();
    assert!(report.outcome.ok());
    assert!(!report.runlevel_invalid);

    let sshd = config.store.lookup("sshd").expect("sshd").clone();
    assert_eq!(config.store.belongs("default", &sshd), Membership::Direct);
    assert_eq!(config.store.belongs("graphical", &sshd), Membership::Inherited);
    assert!(config.store.valid_runlevel("graphical"));
}

#[test]
fn runlevel_override_beats_default() {
    let (_dir, path) = common::write_config(BASE_CONFIG);
    let config = config::load(&path, Some("rescue")).expect("load");
    assert_eq!(config.store.current_runlevel, "rescue");
}

#[test]
fn imports_pull_objects_from_other_files() {
    let (dir, path) = common::write_config(
        "DefaultRunlevel default\nImport extra.conf\n\
         ObjectID main-one\n\
         ObjectEnabled true\n\
         ObjectStartCommand /bin/true\n\
         ObjectStartPriority 1\n\
         ObjectRunlevels default\n",
    );
    std::fs::write(
        dir.path().join("extra.conf"),
        "ObjectID imported-one\n\
         ObjectEnabled true\n\
         ObjectStartCommand /bin/true\n\
         ObjectStartPriority 2\n\
         ObjectRunlevels default\n",
    )
    .expect("write import");

    let config = config::load(&path, None).expect("load");
    assert_eq!(config.store.len(), 2);
    let imported = config.store.lookup("imported-one").expect("imported");
    assert!(imported.config_file.ends_with("extra.conf"));
    assert_eq!(config.files.len(), 2);
}

#[test]
fn hostname_file_indirection() {
    let (dir, path) = common::write_config(
        "DefaultRunlevel default\nHostname FILE host.txt\n\
         ObjectID x\nObjectEnabled true\nObjectStartCommand /bin/true\n\
         ObjectStartPriority 1\nObjectRunlevels default\n",
    );
    std::fs::write(dir.path().join("host.txt"), "\nepoch-box\n").expect("write hostname");

    let config = config::load(&path, None).expect("load");
    assert_eq!(config.settings.hostname.as_deref(), Some("epoch-box"));
}

#[test]
fn duplicate_object_ids_keep_first() {
    let (_dir, path) = common::write_config(
        "DefaultRunlevel default\n\
         ObjectID twin\nObjectEnabled true\nObjectStartCommand /bin/true first\n\
         ObjectStartPriority 1\nObjectRunlevels default\n\
         ObjectID twin\nObjectEnabled false\nObjectStartCommand /bin/true second\n",
    );
    let config = config::load(&path, None).expect("load");
    assert_eq!(config.store.len(), 1);
    let twin = config.store.lookup("twin").expect("twin");
    assert_eq!(twin.start_cmd.as_deref(), Some("/bin/true first"));
}

#[test]
fn reload_preserves_runtime_state_and_picks_up_new_objects() {
    let (_dir, path) = common::write_config(BASE_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();

    {
        let sshd = config.store.lookup_mut("sshd").expect("sshd");
        sshd.started = true;
        sshd.pid = 31337;
        sshd.started_since = 1000;
    }

    // Append a new object to the file, then reload in place.
    let mut contents = std::fs::read_to_string(&path).expect("read");
    contents.push_str(
        "\nObjectID newcomer\n\
         \tObjectEnabled true\n\
         \tObjectStartCommand /bin/true\n\
         \tObjectStartPriority 3\n\
         \tObjectRunlevels default\n",
    );
    std::fs::write(&path, contents).expect("rewrite");

    assert!(config::reload(&mut config).ok());

    let sshd = config.store.lookup("sshd").expect("sshd survives");
    assert!(sshd.started);
    assert_eq!(sshd.pid, 31337);
    assert_eq!(sshd.started_since, 1000);

    let newcomer = config.store.lookup("newcomer").expect("picked up");
    assert!(!newcomer.started);
}

#[test]
fn broken_reload_restores_previous_config() {
    let (_dir, path) = common::write_config(BASE_CONFIG);
    let mut config = config::load(&path, None).expect("load");
    config.store.scan_integrity();
    let objects_before = config.store.len();

    // An object with no ObjectEnabled fails the integrity scan.
    std::fs::write(
        &path,
        "DefaultRunlevel default\nObjectID broken\nObjectStartCommand /bin/true\n\
         ObjectStartPriority 1\nObjectRunlevels default\n",
    )
    .expect("rewrite");

    assert_eq!(config::reload(&mut config), Outcome::Failure);
    assert_eq!(config.store.len(), objects_before);
    assert!(config.store.lookup("sshd").is_some());
}

//! Config editor round trips: the file is the source of truth, and edits
//! must preserve the whitespace discipline of the lines they touch.

mod common;

use epoch::config;

const EDITABLE: &str = "\
DefaultRunlevel default

ObjectID alpha
\tObjectDescription\tFirst object
\tObjectEnabled\ttrue
\tObjectStartCommand\t/bin/true alpha
\tObjectStartPriority\t1
\tObjectRunlevels\tdefault

ObjectID beta
ObjectEnabled=false
ObjectStartCommand=/bin/true beta
ObjectStartPriority=2
ObjectRunlevels=default
";

#[test]
fn edit_then_reload_round_trips() {
    let (_dir, path) = common::write_config(EDITABLE);

    config::edit_value(&path, "alpha", "ObjectEnabled", Some("false")).expect("edit");

    let reloaded = config::load(&path, None).expect("load");
    assert_eq!(reloaded.store.lookup("alpha").unwrap().enabled, Some(false));
    // The sibling object with the same attribute name is untouched.
    assert_eq!(reloaded.store.lookup("beta").unwrap().enabled, Some(false));

    config::edit_value(&path, "beta", "ObjectEnabled", Some("true")).expect("edit");
    let reloaded = config::load(&path, None).expect("load");
    assert_eq!(reloaded.store.lookup("beta").unwrap().enabled, Some(true));
    assert_eq!(reloaded.store.lookup("alpha").unwrap().enabled, Some(false));
}

#[test]
fn edit_preserves_delimiter_style() {
    let (_dir, path) = common::write_config(EDITABLE);

    config::edit_value(&path, "alpha", "ObjectStartPriority", Some("7")).expect("edit tab");
    config::edit_value(&path, "beta", "ObjectStartPriority", Some("9")).expect("edit equals");

    let text = std::fs::read_to_string(&path).expect("read");
    assert!(text.contains("\tObjectStartPriority\t7"), "tab style kept: {text}");
    assert!(text.contains("ObjectStartPriority=9"), "equals style kept: {text}");
}

#[test]
fn null_value_deletes_the_line() {
    let (_dir, path) = common::write_config(EDITABLE);

    config::edit_value(&path, "alpha", "ObjectRunlevels", None).expect("delete");

    let text = std::fs::read_to_string(&path).expect("read");
    assert!(!text.contains("ObjectRunlevels\tdefault"));
    // beta's equals-style line survives.
    assert!(text.contains("ObjectRunlevels=default"));

    let reloaded = config::load(&path, None).expect("load");
    assert!(reloaded.store.lookup("alpha").unwrap().runlevels.is_empty());
}

#[test]
fn add_attribute_lands_after_the_id_line() {
    let (_dir, path) = common::write_config(EDITABLE);

    config::add_attribute(&path, "alpha", "ObjectStopPriority", "42").expect("add");

    let text = std::fs::read_to_string(&path).expect("read");
    let id_pos = text.find("ObjectID alpha").expect("id line");
    let new_pos = text.find("ObjectStopPriority").expect("new line");
    let desc_pos = text.find("ObjectDescription").expect("next line");
    assert!(id_pos < new_pos && new_pos < desc_pos, "inserted inside the stanza: {text}");

    let reloaded = config::load(&path, None).expect("load");
    assert_eq!(reloaded.store.lookup("alpha").unwrap().stop_priority, 42);
}

#[test]
fn missing_targets_are_reported() {
    let (_dir, path) = common::write_config(EDITABLE);

    assert!(config::edit_value(&path, "ghost", "ObjectEnabled", Some("true")).is_err());
    assert!(config::edit_value(&path, "alpha", "ObjectPIDFile", Some("/run/a.pid")).is_err());
}

#[test]
fn edits_do_not_disturb_unrelated_lines() {
    let (_dir, path) = common::write_config(EDITABLE);
    let before = std::fs::read_to_string(&path).expect("read");

    config::edit_value(&path, "alpha", "ObjectStartCommand", Some("/bin/true alpha"))
        .expect("no-op edit");

    let after = std::fs::read_to_string(&path).expect("read");
    assert_eq!(before, after);
}

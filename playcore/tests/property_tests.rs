//! Property access and change notification behavior

use std::time::Duration;

use playcore::property::{self, PropertyAction};
use playcore::{Core, CoreConfig, MediaInfo, Node};
use proptest::prelude::*;

fn core() -> Core {
    let core = Core::new(CoreConfig::default()).unwrap();
    core.register_media("song.flac", MediaInfo::new().with_duration(240.0).with_tag("title", "Song"));
    core
}

fn property_names(core: &Core) -> Vec<String> {
    core.with_session(|s| s.properties().names())
}

/// Names of every notification delivered so far
fn drain(core: &Core) -> Vec<String> {
    core.changes()
        .timeout_iter(Duration::from_millis(20))
        .map(|c| c.name)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_type_available_whenever_value_is(index in any::<prop::sample::Index>(), loaded in any::<bool>()) {
        let core = core();
        if loaded {
            core.command_blocking("loadfile song.flac").unwrap();
        }
        let names = property_names(&core);
        let name = index.get(&names).clone();

        core.with_session(|s| {
            if property::property_get(s, &name).is_ok() {
                prop_assert!(property::property_get_type(s, &name).is_ok(), "no type for {}", name);
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_option_properties_round_trip_through_text(index in any::<prop::sample::Index>()) {
        let core = core();
        let names: Vec<String> = core.with_session(|s| {
            s.options
                .options()
                .filter(|opt| !opt.no_property())
                .map(|opt| opt.name().to_string())
                .collect()
        });
        let name = index.get(&names).clone();

        core.with_session(|s| {
            let before = property::property_get(s, &name).unwrap();
            let text = property::property_get_string(s, &name).unwrap();
            prop_assert!(property::property_set_string(s, &name, &text).is_ok(), "cannot set {} to {:?}", name, text);
            prop_assert_eq!(property::property_get(s, &name).unwrap(), before);
            Ok(())
        })?;
    }

    #[test]
    fn prop_volume_round_trips(volume in 0u32..=130) {
        let core = core();
        core.set_property("volume", Node::Int(i64::from(volume))).unwrap();
        prop_assert_eq!(core.get_property("volume").unwrap(), Node::Double(f64::from(volume)));
        prop_assert_eq!(core.print_property("volume").unwrap(), format!("{}.00", volume));
    }

    #[test]
    fn prop_flags_round_trip_through_strings(value in any::<bool>()) {
        let core = core();
        let text = if value { "yes" } else { "no" };
        core.set_property_string("mute", text).unwrap();
        prop_assert_eq!(core.get_property("mute").unwrap(), Node::Flag(value));
    }
}

#[test]
fn test_volume_above_maximum_is_rejected() {
    let core = core();
    assert!(core.set_property("volume", Node::Double(131.0)).is_err());
    core.set_option("volume-max", Node::Double(200.0)).unwrap();
    core.set_property("volume", Node::Double(150.0)).unwrap();
}

#[test]
fn test_set_pause_notifies_once() {
    let core = core();
    core.observe("pause");
    core.command_blocking("set pause yes").unwrap();

    assert_eq!(drain(&core), vec!["pause".to_string()]);
}

#[test]
fn test_writes_before_flush_are_coalesced() {
    let core = core();
    core.observe("volume");
    core.with_session(|s| {
        property::property_set(s, "volume", Node::Double(10.0)).unwrap();
        property::property_set(s, "volume", Node::Double(20.0)).unwrap();
        property::property_set(s, "volume", Node::Double(30.0)).unwrap();
    });
    assert_eq!(drain(&core), vec!["volume".to_string()]);
}

#[test]
fn test_silent_writes_do_not_notify() {
    let core = core();
    core.observe("mute");

    core.with_session(|s| {
        property::property_do_silent(s, "mute", PropertyAction::Set(Node::Flag(true))).unwrap();
    });
    assert!(drain(&core).is_empty());
    assert_eq!(core.get_property("mute").unwrap(), Node::Flag(true));

    core.with_session(|s| {
        property::property_do(s, "mute", PropertyAction::Set(Node::Flag(false))).unwrap();
    });
    assert_eq!(drain(&core), vec!["mute".to_string()]);
}

#[test]
fn test_sub_property_observer_sees_parent_write() {
    let core = core();
    core.observe("options/volume");
    core.command_blocking("set volume 25").unwrap();
    assert_eq!(drain(&core), vec!["options/volume".to_string()]);
}

#[test]
fn test_event_driven_properties_notify_on_load() {
    let core = core();
    core.observe("filename");
    core.observe("idle-active");
    core.command_blocking("loadfile song.flac").unwrap();

    let names = drain(&core);
    assert!(names.contains(&"filename".to_string()));
    assert!(names.contains(&"idle-active".to_string()));
    assert_eq!(core.get_property("metadata/title").unwrap(), Node::from("Song"));
}

#[test]
fn test_unobserved_names_are_quiet() {
    let core = core();
    core.observe("mute");
    core.unobserve("mute");
    core.command_blocking("set mute yes").unwrap();
    assert!(drain(&core).is_empty());
}

//! Option bridge
//!
//! Keeps the option layer and the property layer consistent in both
//! directions:
//!
//! - configuration-side writes (startup, profiles, `options/NAME`,
//!   `change-list`) enter through `on_set_option`; if a hand-written property
//!   exists for the option it is reused through the silent path so its side
//!   effects run, otherwise the option is written directly
//! - property-side writes of plain options use `write_option`
//!
//! `on_set_option` emits exactly one change notification under the option
//! name on either branch. Every direct write hands the option's update flags
//! to `on_option_changed`.

use option_store::{Node, SetFlags, SetOutcome, UpdateFlags};
use tracing::{debug, warn};

use crate::error::{PropertyError, PropertyResult};
use crate::logging;
use crate::notify::PlayerEvent;
use crate::property::{self, PropertyAction};
use crate::session::Session;

/// Entry point for every option write coming from the configuration side
pub fn on_set_option(session: &mut Session, name: &str, value: Node, flags: SetFlags) -> PropertyResult<()> {
    let resolved = session.options.resolve(name)?;
    if let Some(alias) = &resolved.deprecated_alias {
        session.warn_deprecated_once(alias, &resolved.name);
    }
    let canonical = resolved.name;

    if session.properties().is_manual(&canonical) {
        // Scope markers first, so a file-local backup keeps the old value
        let markers = session.options.mark_set(&canonical, flags)?;
        let result = match property::property_do_silent(session, &canonical, PropertyAction::Set(value.clone())) {
            Err(PropertyError::Unknown) => write_option(session, &canonical, value, flags).map(|_| ()),
            r => r.map(|_| ()),
        };
        if let Err(e) = result {
            // The value never changed, so neither do its markers
            session.options.restore_markers(&canonical, markers)?;
            return Err(e);
        }
    } else {
        write_option(session, &canonical, value, flags)?;
    }

    session.notify_property(&canonical);
    Ok(())
}

/// Parse text through the option's type, then `on_set_option`
pub fn on_set_option_string(session: &mut Session, name: &str, text: &str, flags: SetFlags) -> PropertyResult<()> {
    let value = {
        let opt = session.options.get(name).ok_or(PropertyError::Unknown)?;
        opt.option_type()
            .parse(opt.name(), text)
            .map_err(|e| PropertyError::InvalidValue(e.to_string()))?
    };
    on_set_option(session, name, value, flags)
}

/// Store a value in the option layer and run its update reactions
///
/// Does not notify observers; callers do.
pub fn write_option(session: &mut Session, name: &str, value: Node, flags: SetFlags) -> PropertyResult<SetOutcome> {
    let outcome = session.options.set_raw_direct(name, value, flags)?;
    if outcome.changed {
        on_option_changed(session, &outcome);
    }
    Ok(outcome)
}

/// Cross-cutting reactions to option changes
pub fn on_option_changed(session: &mut Session, outcome: &SetOutcome) {
    let flags = outcome.update;
    if flags.is_empty() {
        return;
    }
    debug!("Option '{}' changed, update flags {:?}", outcome.name, flags);

    if flags.contains(UpdateFlags::TERM) {
        let level = session
            .options
            .value("msg-level")
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        if let Err(e) = logging::apply_msg_level(&level) {
            warn!("Could not apply msg-level '{}': {}", level, e);
        }
    }

    if flags.contains(UpdateFlags::VOLUME) {
        session.audio_update();
    }

    if flags.contains(UpdateFlags::SPEED) {
        if let Some(speed) = session.options.value("speed").ok().and_then(|v| v.as_f64()) {
            session.playback.speed = speed;
        }
        session.notify_property("audio-speed-correction");
        session.notify_property("video-speed-correction");
    }

    if flags.contains(UpdateFlags::WINDOW) {
        session.event(PlayerEvent::WinState);
    }
}

/// Apply every assignment of a profile through the bridge
///
/// Continues past failing assignments and reports the first error.
pub fn apply_profile(session: &mut Session, name: &str) -> PropertyResult<()> {
    let assignments = session.options.profile_assignments(name)?;
    debug!("Applying profile '{}' ({} options)", name, assignments.len());
    let mut first_error = None;
    for (key, value) in assignments {
        let flags = SetFlags::RUNTIME | SetFlags::FROM_PROFILE;
        if let Err(e) = on_set_option_string(session, &key, &value, flags) {
            warn!("Profile '{}': cannot set '{}' to '{}': {}", name, key, value, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Restore file-local option values when a file ends
pub fn restore_file_local(session: &mut Session) {
    for name in session.options.restore_backups() {
        let update = session
            .options
            .get(&name)
            .map(|opt| opt.update_flags())
            .unwrap_or_default();
        let outcome = SetOutcome {
            name: name.clone(),
            changed: true,
            update,
        };
        on_option_changed(session, &outcome);
        session.notify_property(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::control::Core;

    #[test]
    fn test_direct_branch_notifies_once() {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.observe("osd-level");
        core.with_session(|s| {
            on_set_option(s, "osd-level", Node::Int(2), SetFlags::RUNTIME).unwrap();
            s.flush_notifications();
        });

        let changes: Vec<_> = core.changes().try_iter().collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(core.get_property("osd-level").unwrap(), Node::Int(2));
    }

    #[test]
    fn test_manual_branch_reuses_property() {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.with_session(|s| {
            on_set_option(s, "volume", Node::Double(200.0), SetFlags::RUNTIME).unwrap_err();
            on_set_option(s, "volume", Node::Double(50.0), SetFlags::RUNTIME).unwrap();
            assert_eq!(s.playback.effective_volume, 50.0);
        });
    }

    #[test]
    fn test_rejected_manual_write_leaves_no_markers() {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.with_session(|s| {
            let flags = SetFlags::RUNTIME | SetFlags::BACKUP;
            on_set_option(s, "volume", Node::Double(200.0), flags).unwrap_err();
            let opt = s.options.get("volume").unwrap();
            assert!(!opt.set_locally());
            assert!(!opt.runtime_changed());
            assert!(s.options.restore_backups().is_empty());

            on_set_option(s, "volume", Node::Double(40.0), flags).unwrap();
            assert!(s.options.get("volume").unwrap().set_locally());
            assert_eq!(s.options.restore_backups(), vec!["volume".to_string()]);
            assert_eq!(s.options.value("volume").unwrap(), Node::Double(100.0));
        });
    }

    #[test]
    fn test_deprecated_option_alias() {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.with_session(|s| {
            on_set_option_string(s, "softvol-max", "150", SetFlags::RUNTIME).unwrap();
            assert_eq!(s.options.value("volume-max").unwrap(), Node::Double(150.0));
            assert!(s.was_deprecation_warned("softvol-max"));
        });
    }

    #[test]
    fn test_restore_file_local_notifies() {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.observe("mute");
        core.with_session(|s| {
            on_set_option(s, "mute", Node::Flag(true), SetFlags::RUNTIME | SetFlags::BACKUP).unwrap();
            s.flush_notifications();
        });
        assert_eq!(core.changes().try_iter().count(), 1);

        core.with_session(|s| {
            restore_file_local(s);
            s.flush_notifications();
            assert_eq!(s.options.value("mute").unwrap(), Node::Flag(false));
        });
        assert_eq!(core.changes().try_iter().count(), 1);
    }
}

//! Hand-written properties
//!
//! Properties that compute their value from player state, or that need side
//! effects on write beyond storing an option. Option-backed entries here
//! (`pause`, `speed`, `volume`, `mute`) take precedence over the properties
//! synthesized for the same options.

use option_store::{Node, OptionType, SetFlags};

use super::generic::AliasProperty;
use super::{print_node, KeyAction, PropertyAccessor, PropertyReply, PropertyTable};
use crate::bridge;
use crate::error::{PropertyError, PropertyResult};
use crate::player;
use crate::session::Session;

/// Register every hand-written property
pub(crate) fn register_all(table: &mut PropertyTable) {
    // Options with side effects
    table.register("pause", Pause);
    table.register("speed", Speed);
    table.register("volume", Volume);
    table.register("mute", Mute);

    // Current file
    table.register("path", Path);
    table.register("filename", Filename);
    table.register("media-title", MediaTitle);
    table.register("metadata", Metadata { filtered: false });
    table.register("filtered-metadata", Metadata { filtered: true });

    // Playback state
    table.register("duration", Duration);
    table.register("time-pos", TimePos);
    table.register("time-remaining", TimeRemaining);
    table.register("percent-pos", PercentPos);
    table.register("idle-active", IdleActive);
    table.register("core-idle", CoreIdle);
    table.register("eof-reached", EofReached);
    table.register("seeking", Seeking);
    table.register("playback-abort", PlaybackAbort);
    table.register("audio-speed-correction", SpeedCorrection { kind: MediaKind::Audio });
    table.register("video-speed-correction", SpeedCorrection { kind: MediaKind::Video });
    table.register("decoder-frame-drop-count", FrameDrops);
    table.register("drop-frame-count", AliasProperty::deprecated("decoder-frame-drop-count"));

    // Playlist
    table.register("playlist", Playlist);
    table.register("playlist-pos", PlaylistPos);
    table.register("playlist-count", AliasProperty::new("playlist/count"));

    // Introspection
    table.register("options", Options { local: false });
    table.register("file-local-options", Options { local: true });
    table.register("option-info", OptionInfo);
    table.register("property-list", PropertyList);
    table.register("command-list", CommandList);
    table.register("profile-list", ProfileList);
}

// ============================================================================
// Helpers
// ============================================================================

fn option_value(session: &Session, name: &str) -> PropertyResult<Node> {
    Ok(session.options.value(name)?)
}

fn option_type(session: &Session, name: &str) -> PropertyResult<OptionType> {
    session
        .options
        .get(name)
        .map(|opt| opt.option_type().clone())
        .ok_or(PropertyError::Unknown)
}

fn require_playing(session: &Session) -> PropertyResult<()> {
    if session.playback.is_playing() {
        Ok(())
    } else {
        Err(PropertyError::Unavailable)
    }
}

fn number(value: &Node) -> PropertyResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| PropertyError::InvalidValue(format!("expected a number, got {}", value.format_name())))
}

// ============================================================================
// Options with side effects
// ============================================================================

/// Pausing raises pause/unpause events while a file is loaded
struct Pause;

impl PropertyAccessor for Pause {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        option_value(session, "pause")
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        option_type(session, "pause")
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        let pause = value
            .as_bool()
            .ok_or_else(|| PropertyError::InvalidValue(format!("expected a flag, got {}", value.format_name())))?;
        player::set_pause_state(session, pause)
    }
}

/// Speed changes also update the speed correction properties
struct Speed;

impl PropertyAccessor for Speed {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        option_value(session, "speed")
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        option_type(session, "speed")
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        bridge::write_option(session, "speed", value, SetFlags::RUNTIME).map(|_| ())
    }
}

/// Volume is bounded by the `volume-max` option
struct Volume;

impl Volume {
    fn max(session: &Session) -> f64 {
        session
            .options
            .value("volume-max")
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(100.0)
    }
}

impl PropertyAccessor for Volume {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        option_value(session, "volume")
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        let max = Self::max(session);
        Ok(OptionType::double().with_range(0.0, max))
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        let volume = number(&value)?;
        let max = Self::max(session);
        if volume > max {
            return Err(PropertyError::InvalidValue(format!(
                "volume {} is above volume-max {}",
                volume, max
            )));
        }
        bridge::write_option(session, "volume", value, SetFlags::RUNTIME).map(|_| ())
    }
}

struct Mute;

impl PropertyAccessor for Mute {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        option_value(session, "mute")
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        option_type(session, "mute")
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        bridge::write_option(session, "mute", value, SetFlags::RUNTIME).map(|_| ())
    }
}

// ============================================================================
// Current file
// ============================================================================

fn current_path(session: &Session) -> PropertyResult<&str> {
    session
        .playback
        .file
        .as_ref()
        .map(|f| f.path.as_str())
        .ok_or(PropertyError::Unavailable)
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

struct Path;

impl PropertyAccessor for Path {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        current_path(session).map(Node::from)
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::string())
    }
}

/// File name without directory; key `no-ext` also drops the extension
struct Filename;

impl PropertyAccessor for Filename {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        current_path(session).map(|p| Node::from(basename(p)))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::string())
    }

    fn key_action(&self, session: &mut Session, key: &str, action: KeyAction) -> PropertyResult<PropertyReply> {
        if key != "no-ext" {
            return Err(PropertyError::Unknown);
        }
        let name = strip_extension(basename(current_path(session)?)).to_string();
        match action {
            KeyAction::Get => Ok(PropertyReply::Value(Node::String(name))),
            KeyAction::GetType => Ok(PropertyReply::Type(OptionType::string())),
            KeyAction::Print => Ok(PropertyReply::Text(name)),
            KeyAction::Set(_) => Err(PropertyError::NotSupported),
        }
    }
}

/// `title` option, then the `title` tag, then the file name
struct MediaTitle;

impl PropertyAccessor for MediaTitle {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        if let Ok(Node::String(title)) = session.options.value("title") {
            if !title.is_empty() {
                return Ok(Node::String(title));
            }
        }
        let file = session.playback.file.as_ref().ok_or(PropertyError::Unavailable)?;
        match file.tag("title") {
            Some(title) if !title.is_empty() => Ok(Node::from(title)),
            _ => Ok(Node::from(basename(&file.path))),
        }
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::string())
    }
}

/// Tags of the current file, optionally filtered through `display-tags`
struct Metadata {
    filtered: bool,
}

impl Metadata {
    fn tags(&self, session: &Session) -> PropertyResult<Vec<(String, String)>> {
        let file = session.playback.file.as_ref().ok_or(PropertyError::Unavailable)?;
        if !self.filtered {
            return Ok(file.tags.clone());
        }
        let patterns = session
            .options
            .value("display-tags")
            .ok()
            .and_then(|v| v.to_string_list())
            .unwrap_or_default();
        Ok(file
            .tags
            .iter()
            .filter(|(key, _)| patterns.iter().any(|p| tag_matches(p, key)))
            .cloned()
            .collect())
    }
}

/// Case-insensitive tag filter; a trailing `*` matches any suffix
fn tag_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.len() >= prefix.len() && key[..prefix.len()].eq_ignore_ascii_case(prefix),
        None => pattern.eq_ignore_ascii_case(key),
    }
}

fn tag_entry(key: &str, value: &str) -> Node {
    Node::map([("key", Node::from(key)), ("value", Node::from(value))])
}

impl PropertyAccessor for Metadata {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        let tags = self.tags(session)?;
        Ok(Node::map(tags.into_iter().map(|(k, v)| (k, Node::String(v)))))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::node())
    }

    fn print(&self, session: &mut Session) -> PropertyResult<String> {
        let tags = self.tags(session)?;
        if tags.is_empty() {
            return Ok("(empty)".to_string());
        }
        Ok(tags.iter().map(|(k, v)| format!("{}: {}\n", k, v)).collect())
    }

    fn key_action(&self, session: &mut Session, key: &str, action: KeyAction) -> PropertyResult<PropertyReply> {
        let tags = self.tags(session)?;
        let value = if key == "list" {
            Node::Array(tags.iter().map(|(k, v)| tag_entry(k, v)).collect())
        } else if key == "list/count" {
            Node::Int(tags.len() as i64)
        } else if let Some(rest) = key.strip_prefix("list/") {
            let (index, field) = rest.split_once('/').unwrap_or((rest, ""));
            let index = index.parse::<usize>().map_err(|_| PropertyError::Unknown)?;
            let (k, v) = tags.get(index).ok_or(PropertyError::Unknown)?;
            match field {
                "key" => Node::from(k.as_str()),
                "value" => Node::from(v.as_str()),
                "" => tag_entry(k, v),
                _ => return Err(PropertyError::Unknown),
            }
        } else {
            let name = key.strip_prefix("by-key/").unwrap_or(key);
            tags.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| Node::from(v.as_str()))
                .ok_or(PropertyError::Unknown)?
        };

        match action {
            KeyAction::Get => Ok(PropertyReply::Value(value)),
            KeyAction::GetType => Ok(PropertyReply::Type(super::type_of_node(&value))),
            KeyAction::Print => Ok(PropertyReply::Text(print_node(&value))),
            KeyAction::Set(_) => Err(PropertyError::NotSupported),
        }
    }
}

// ============================================================================
// Playback state
// ============================================================================

struct Duration;

impl PropertyAccessor for Duration {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        session
            .playback
            .duration()
            .map(Node::Double)
            .ok_or(PropertyError::Unavailable)
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::time())
    }
}

/// Setting the position seeks
struct TimePos;

impl PropertyAccessor for TimePos {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        require_playing(session)?;
        Ok(Node::Double(session.playback.time_pos))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::time())
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        let target = number(&value)?;
        player::seek(session, target)
    }
}

struct TimeRemaining;

impl PropertyAccessor for TimeRemaining {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        session
            .playback
            .time_remaining()
            .map(Node::Double)
            .ok_or(PropertyError::Unavailable)
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::time())
    }
}

struct PercentPos;

impl PropertyAccessor for PercentPos {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        session
            .playback
            .percent_pos()
            .map(Node::Double)
            .ok_or(PropertyError::Unavailable)
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::double().with_range(0.0, 100.0))
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        let percent = number(&value)?.clamp(0.0, 100.0);
        let duration = session.playback.duration().ok_or(PropertyError::Unavailable)?;
        player::seek(session, duration * percent / 100.0)
    }
}

struct IdleActive;

impl PropertyAccessor for IdleActive {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(Node::Flag(session.playback.is_idle()))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::flag())
    }
}

/// Paused, or nothing playing
struct CoreIdle;

impl PropertyAccessor for CoreIdle {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(Node::Flag(player::is_paused(session) || !session.playback.is_playing()))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::flag())
    }
}

struct EofReached;

impl PropertyAccessor for EofReached {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        require_playing(session)?;
        Ok(Node::Flag(session.playback.eof_reached))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::flag())
    }
}

struct Seeking;

impl PropertyAccessor for Seeking {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        require_playing(session)?;
        Ok(Node::Flag(session.playback.seeking))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::flag())
    }
}

/// Nothing is playing, or the current file is being stopped
struct PlaybackAbort;

impl PropertyAccessor for PlaybackAbort {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(Node::Flag(player::playback_aborted(session)))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::flag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Audio,
    Video,
}

/// Speed correction applied by one output; registered once per media kind
struct SpeedCorrection {
    kind: MediaKind,
}

impl PropertyAccessor for SpeedCorrection {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        require_playing(session)?;
        let value = match self.kind {
            MediaKind::Audio => session.playback.audio_speed_correction,
            MediaKind::Video => session.playback.video_speed_correction,
        };
        Ok(Node::Double(value))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::double())
    }
}

struct FrameDrops;

impl PropertyAccessor for FrameDrops {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        require_playing(session)?;
        Ok(Node::Int(session.playback.decoder_frame_drops))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::int())
    }
}

// ============================================================================
// Playlist
// ============================================================================

/// Playlist entries; keys `count`, `N/filename`, `N/current`, `N/id`
struct Playlist;

impl PropertyAccessor for Playlist {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        let pb = &session.playback;
        let entries = pb
            .playlist
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let mut node = Node::map([("filename", Node::from(entry.filename.as_str()))]);
                if pb.current == Some(index) {
                    node.insert("current", Node::Flag(true));
                    if pb.is_playing() {
                        node.insert("playing", Node::Flag(true));
                    }
                }
                node.insert("id", Node::Int(entry.id as i64));
                node
            })
            .collect();
        Ok(Node::Array(entries))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::node())
    }

    fn print(&self, session: &mut Session) -> PropertyResult<String> {
        let pb = &session.playback;
        Ok(pb
            .playlist
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let marker = if pb.current == Some(index) { "> " } else { "  " };
                format!("{}{}\n", marker, entry.filename)
            })
            .collect())
    }
}

/// Index of the current entry, -1 if none; setting it starts that entry
struct PlaylistPos;

impl PropertyAccessor for PlaylistPos {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(Node::Int(session.playback.current.map_or(-1, |i| i as i64)))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::int())
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        let pos = value
            .as_i64()
            .ok_or_else(|| PropertyError::InvalidValue(format!("expected an index, got {}", value.format_name())))?;
        if pos < 0 {
            player::end_playback(session);
            return Ok(());
        }
        let index = pos as usize;
        if index >= session.playback.playlist.len() {
            return Err(PropertyError::InvalidValue(format!("no playlist entry {}", pos)));
        }
        if session.playback.current != Some(index) {
            player::start_file(session, index, None);
        }
        Ok(())
    }
}

// ============================================================================
// Option access
// ============================================================================

/// `options/NAME` and `file-local-options/NAME`
///
/// Writes go through the option bridge. File-local writes are undone when
/// the file ends and are unavailable while idle.
struct Options {
    local: bool,
}

impl PropertyAccessor for Options {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        let names: Vec<&str> = session.options.options().map(|opt| opt.name()).collect();
        Ok(Node::string_list(names.as_slice()))
    }

    fn key_action(&self, session: &mut Session, key: &str, action: KeyAction) -> PropertyResult<PropertyReply> {
        if self.local && session.playback.is_idle() {
            return Err(PropertyError::Unavailable);
        }
        let opt = session.options.get(key).ok_or(PropertyError::Unknown)?;
        match action {
            KeyAction::Get => Ok(PropertyReply::Value(opt.value().clone())),
            KeyAction::GetType => Ok(PropertyReply::Type(opt.option_type().clone())),
            KeyAction::Print => Err(PropertyError::NotSupported),
            KeyAction::Set(value) => {
                let mut flags = SetFlags::RUNTIME;
                if self.local {
                    flags = flags | SetFlags::BACKUP;
                }
                bridge::on_set_option(session, key, value, flags)?;
                Ok(PropertyReply::Done)
            }
        }
    }
}

/// `option-info/NAME[/FIELD]`
struct OptionInfo;

impl PropertyAccessor for OptionInfo {
    fn key_action(&self, session: &mut Session, key: &str, action: KeyAction) -> PropertyResult<PropertyReply> {
        let (name, field) = match key.split_once('/') {
            Some((name, field)) => (name, Some(field)),
            None => (key, None),
        };
        let opt = session.options.get(name).ok_or(PropertyError::Unknown)?;
        let ty = opt.option_type();

        let range = |bound: Option<f64>| -> PropertyResult<Node> {
            match bound {
                Some(v) if ty.has_range() => Ok(Node::Double(v)),
                _ => Err(PropertyError::Unavailable),
            }
        };
        let choices = || -> PropertyResult<Node> {
            ty.choices()
                .map(Node::string_list)
                .ok_or(PropertyError::Unavailable)
        };

        let value = match field {
            None => {
                let mut node = Node::map([
                    ("name", Node::from(opt.name())),
                    ("type", Node::from(ty.type_name())),
                    ("set-from-commandline", Node::Flag(opt.set_from_cmdline())),
                    ("set-locally", Node::Flag(opt.set_locally())),
                    ("default-value", opt.default_value().clone()),
                ]);
                if let Ok(min) = range(ty.min) {
                    node.insert("min", min);
                }
                if let Ok(max) = range(ty.max) {
                    node.insert("max", max);
                }
                if let Ok(names) = choices() {
                    node.insert("choices", names);
                }
                node
            }
            Some("name") => Node::from(opt.name()),
            Some("type") => Node::from(ty.type_name()),
            Some("set-from-commandline") => Node::Flag(opt.set_from_cmdline()),
            Some("set-locally") => Node::Flag(opt.set_locally()),
            Some("default-value") => opt.default_value().clone(),
            Some("min") => range(ty.min)?,
            Some("max") => range(ty.max)?,
            Some("choices") => choices()?,
            Some(_) => return Err(PropertyError::Unknown),
        };

        match action {
            KeyAction::Get => Ok(PropertyReply::Value(value)),
            KeyAction::Set(_) => Err(PropertyError::NotSupported),
            // Type and text derive from the value
            KeyAction::GetType | KeyAction::Print => Err(PropertyError::NotSupported),
        }
    }
}

struct PropertyList;

impl PropertyAccessor for PropertyList {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(Node::string_list(session.properties().names().as_slice()))
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Ok(OptionType::string_list())
    }
}

struct CommandList;

impl PropertyAccessor for CommandList {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        let commands = session.commands();
        let entries = commands
            .names()
            .into_iter()
            .filter_map(|name| commands.get(name))
            .map(|def| {
                let args = def
                    .args
                    .iter()
                    .map(|a| {
                        Node::map([
                            ("name", Node::from(a.name)),
                            ("optional", Node::Flag(!a.is_required())),
                        ])
                    })
                    .collect();
                Node::map([
                    ("name", Node::from(def.name)),
                    ("args", Node::Array(args)),
                    ("vararg", Node::Flag(def.vararg)),
                ])
            })
            .collect();
        Ok(Node::Array(entries))
    }
}

struct ProfileList;

impl PropertyAccessor for ProfileList {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(session.options.profiles_node())
    }
}

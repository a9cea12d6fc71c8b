//! Typed option storage
//!
//! This module provides the configuration side of the control plane:
//! - `OptionDef`: declaration of one option (type, default, update flags)
//! - `OptionStore`: the set of declared options with their current values,
//!   aliases, profiles and per-file backups
//!
//! Writes go through `set_raw_direct`, which validates the value, records
//! scope markers and reports whether the stored value actually changed.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use tracing::debug;

use crate::error::{OptionError, Result};
use crate::node::Node;
use crate::option_type::OptionType;

/// Maximum nesting of profiles that include other profiles
const MAX_PROFILE_DEPTH: usize = 20;

/// Maximum length of an alias chain
const MAX_ALIAS_DEPTH: usize = 8;

// ============================================================================
// Flags
// ============================================================================

macro_rules! flag_set {
    ($name:ident { $($(#[$doc:meta])* $flag:ident = $bit:expr,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $($(#[$doc])* pub const $flag: Self = Self($bit);)*

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(UpdateFlags {
    /// Logging configuration must be re-read
    TERM = 1 << 0,
    /// Audio volume/mute must be re-applied
    VOLUME = 1 << 1,
    /// Playback speed changed
    SPEED = 1 << 2,
    /// Window state changed
    WINDOW = 1 << 3,
});

flag_set!(SetFlags {
    /// Write made while the player is running
    RUNTIME = 1 << 0,
    /// Save the previous value so it can be restored when the file ends
    BACKUP = 1 << 1,
    /// Write originates from the command line
    FROM_CMDLINE = 1 << 2,
    /// Write originates from a profile
    FROM_PROFILE = 1 << 3,
});

// ============================================================================
// Option declarations
// ============================================================================

/// Declaration of one option
#[derive(Debug, Clone)]
pub struct OptionDef {
    pub name: String,
    pub ty: OptionType,
    pub default: Node,
    pub update: UpdateFlags,
    /// Do not expose this option as a property
    pub no_property: bool,
}

impl OptionDef {
    pub fn new(name: impl Into<String>, ty: OptionType, default: impl Into<Node>) -> Self {
        Self {
            name: name.into(),
            ty,
            default: default.into(),
            update: UpdateFlags::NONE,
            no_property: false,
        }
    }

    pub fn update(mut self, flags: UpdateFlags) -> Self {
        self.update = flags;
        self
    }

    pub fn no_property(mut self) -> Self {
        self.no_property = true;
        self
    }
}

/// A declared option and its runtime state
#[derive(Debug, Clone)]
pub struct ConfigOption {
    def: OptionDef,
    value: Node,
    set_from_cmdline: bool,
    set_locally: bool,
    runtime_changed: bool,
    backup: Option<Node>,
}

impl ConfigOption {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn option_type(&self) -> &OptionType {
        &self.def.ty
    }

    pub fn value(&self) -> &Node {
        &self.value
    }

    pub fn default_value(&self) -> &Node {
        &self.def.default
    }

    pub fn update_flags(&self) -> UpdateFlags {
        self.def.update
    }

    pub fn no_property(&self) -> bool {
        self.def.no_property
    }

    pub fn set_from_cmdline(&self) -> bool {
        self.set_from_cmdline
    }

    /// Whether a file-local value is currently in effect
    pub fn set_locally(&self) -> bool {
        self.set_locally
    }

    /// Whether the value was changed at runtime
    pub fn runtime_changed(&self) -> bool {
        self.runtime_changed
    }

    fn markers(&self) -> Markers {
        Markers {
            set_from_cmdline: self.set_from_cmdline,
            set_locally: self.set_locally,
            runtime_changed: self.runtime_changed,
            backup: self.backup.clone(),
        }
    }

    fn mark(&mut self, flags: SetFlags) {
        if flags.contains(SetFlags::FROM_CMDLINE) {
            self.set_from_cmdline = true;
        }
        if flags.contains(SetFlags::RUNTIME) {
            self.runtime_changed = true;
        }
        if flags.contains(SetFlags::BACKUP) {
            if self.backup.is_none() {
                self.backup = Some(self.value.clone());
            }
            self.set_locally = true;
        }
    }
}

/// Scope markers of one option, saved by `mark_set` so a failed write can
/// be undone with `restore_markers`
#[derive(Debug, Clone, PartialEq)]
pub struct Markers {
    set_from_cmdline: bool,
    set_locally: bool,
    runtime_changed: bool,
    backup: Option<Node>,
}

#[derive(Debug, Clone)]
enum Entry {
    Option(ConfigOption),
    Alias {
        target: String,
        deprecated: bool,
    },
}

/// Result of looking up an option name through its alias chain
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Canonical option name
    pub name: String,
    /// Set if the looked-up name is a deprecated alias
    pub deprecated_alias: Option<String>,
}

/// Result of a successful option write
#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    /// Canonical option name
    pub name: String,
    pub changed: bool,
    /// Reactions the write requires
    pub update: UpdateFlags,
}

// ============================================================================
// Profiles
// ============================================================================

/// A named group of option assignments
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub description: Option<String>,
    /// Assignments in application order; the key `profile` includes others
    pub entries: Vec<(String, String)>,
}

// ============================================================================
// OptionStore
// ============================================================================

/// The set of declared options
///
/// # Example
///
/// ```rust
/// use option_store::{Node, OptionStore, SetFlags};
///
/// let mut store = OptionStore::with_defaults();
/// let outcome = store.set_raw_direct("volume", Node::Double(50.0), SetFlags::RUNTIME).unwrap();
/// assert!(outcome.changed);
/// assert_eq!(store.value("volume").unwrap(), Node::Double(50.0));
/// ```
#[derive(Default)]
pub struct OptionStore {
    entries: BTreeMap<String, Entry>,
    profiles: Vec<Profile>,
}

impl OptionStore {
    /// Create a store with no options declared
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an option; the default must be valid for its type
    pub fn declare(&mut self, def: OptionDef) -> Result<()> {
        let default = def.ty.validate(&def.name, def.default.clone())?;
        let def = OptionDef { default: default.clone(), ..def };
        self.entries.insert(
            def.name.clone(),
            Entry::Option(ConfigOption {
                def,
                value: default,
                set_from_cmdline: false,
                set_locally: false,
                runtime_changed: false,
                backup: None,
            }),
        );
        Ok(())
    }

    /// Declare `name` as another name for `target`
    pub fn declare_alias(&mut self, name: impl Into<String>, target: impl Into<String>, deprecated: bool) {
        self.entries.insert(
            name.into(),
            Entry::Alias {
                target: target.into(),
                deprecated,
            },
        );
    }

    /// Follow the alias chain to the canonical option
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        let mut current = name;
        let mut deprecated_alias = None;
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.entries.get(current) {
                Some(Entry::Option(_)) => {
                    return Ok(Resolved {
                        name: current.to_string(),
                        deprecated_alias,
                    })
                }
                Some(Entry::Alias { target, deprecated }) => {
                    if *deprecated && deprecated_alias.is_none() {
                        deprecated_alias = Some(current.to_string());
                    }
                    current = target;
                }
                None => break,
            }
        }
        Err(OptionError::Unknown(name.to_string()))
    }

    /// Alias target of `name`, if `name` is an alias
    pub fn alias_target(&self, name: &str) -> Option<(&str, bool)> {
        match self.entries.get(name) {
            Some(Entry::Alias { target, deprecated }) => Some((target.as_str(), *deprecated)),
            _ => None,
        }
    }

    /// Look up an option, following aliases
    pub fn get(&self, name: &str) -> Option<&ConfigOption> {
        let resolved = self.resolve(name).ok()?;
        match self.entries.get(&resolved.name) {
            Some(Entry::Option(opt)) => Some(opt),
            _ => None,
        }
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ConfigOption> {
        let resolved = self.resolve(name)?;
        match self.entries.get_mut(&resolved.name) {
            Some(Entry::Option(opt)) => Ok(opt),
            _ => Err(OptionError::Unknown(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All declared names, aliases included, in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All real options in name order
    pub fn options(&self) -> impl Iterator<Item = &ConfigOption> {
        self.entries.values().filter_map(|e| match e {
            Entry::Option(opt) => Some(opt),
            Entry::Alias { .. } => None,
        })
    }

    /// Current value of an option
    pub fn value(&self, name: &str) -> Result<Node> {
        self.get(name)
            .map(|opt| opt.value.clone())
            .ok_or_else(|| OptionError::Unknown(name.to_string()))
    }

    /// Validate and store a value
    pub fn set_raw_direct(&mut self, name: &str, value: Node, flags: SetFlags) -> Result<SetOutcome> {
        let opt = self.get_mut(name)?;
        let value = opt.def.ty.validate(&opt.def.name, value)?;
        opt.mark(flags);
        let changed = opt.value != value;
        if changed {
            debug!("Option {} = {}", opt.def.name, value);
            opt.value = value;
        }
        Ok(SetOutcome {
            name: opt.def.name.clone(),
            changed,
            update: opt.def.update,
        })
    }

    /// Parse text for an option and store it
    pub fn set_parsed(&mut self, name: &str, text: &str, flags: SetFlags) -> Result<SetOutcome> {
        let value = {
            let opt = self.get(name).ok_or_else(|| OptionError::Unknown(name.to_string()))?;
            opt.def.ty.parse(opt.name(), text)?
        };
        self.set_raw_direct(name, value, flags)
    }

    /// Record scope markers without writing a value
    /// Record scope markers for a write about to happen elsewhere
    ///
    /// Returns the markers as they were before.
    pub fn mark_set(&mut self, name: &str, flags: SetFlags) -> Result<Markers> {
        let opt = self.get_mut(name)?;
        let before = opt.markers();
        opt.mark(flags);
        Ok(before)
    }

    /// Put back markers returned by `mark_set`
    pub fn restore_markers(&mut self, name: &str, markers: Markers) -> Result<()> {
        let opt = self.get_mut(name)?;
        opt.set_from_cmdline = markers.set_from_cmdline;
        opt.set_locally = markers.set_locally;
        opt.runtime_changed = markers.runtime_changed;
        opt.backup = markers.backup;
        Ok(())
    }

    /// Restore every value saved by a `BACKUP` write
    ///
    /// Returns the names of options whose value changed.
    pub fn restore_backups(&mut self) -> Vec<String> {
        let mut restored = Vec::new();
        for entry in self.entries.values_mut() {
            let Entry::Option(opt) = entry else {
                continue;
            };
            opt.set_locally = false;
            if let Some(old) = opt.backup.take() {
                if old != opt.value {
                    opt.value = old;
                    restored.push(opt.def.name.clone());
                }
            }
        }
        if !restored.is_empty() {
            debug!("Restored file-local options: {:?}", restored);
        }
        restored
    }

    /// Printed values of every option changed at runtime
    pub fn runtime_changed(&self) -> Vec<(String, String)> {
        self.options()
            .filter(|opt| opt.runtime_changed)
            .filter_map(|opt| Some((opt.def.name.clone(), opt.def.ty.print(&opt.value)?)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------------

    pub fn define_profile(&mut self, profile: Profile) {
        self.profiles.retain(|p| p.name != profile.name);
        self.profiles.push(profile);
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Flatten a profile into option assignments, expanding included profiles
    pub fn profile_assignments(&self, name: &str) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        self.collect_profile(name, 0, &mut out)?;
        Ok(out)
    }

    fn collect_profile(&self, name: &str, depth: usize, out: &mut Vec<(String, String)>) -> Result<()> {
        if depth >= MAX_PROFILE_DEPTH {
            return Err(OptionError::ProfileRecursion(name.to_string()));
        }
        let profile = self
            .profile(name)
            .ok_or_else(|| OptionError::UnknownProfile(name.to_string()))?;
        for (key, value) in &profile.entries {
            if key == "profile" {
                for nested in value.split(',').filter(|s| !s.is_empty()) {
                    self.collect_profile(nested, depth + 1, out)?;
                }
            } else {
                out.push((key.clone(), value.clone()));
            }
        }
        Ok(())
    }

    /// Profiles as a node list, as shown by `profile-list`
    pub fn profiles_node(&self) -> Node {
        Node::Array(
            self.profiles
                .iter()
                .map(|p| {
                    let mut node = Node::map([("name", Node::from(p.name.as_str()))]);
                    if let Some(desc) = &p.description {
                        node.insert("profile-desc", Node::from(desc.as_str()));
                    }
                    let options = p
                        .entries
                        .iter()
                        .map(|(k, v)| Node::map([("key", Node::from(k.as_str())), ("value", Node::from(v.as_str()))]))
                        .collect();
                    node.insert("options", Node::Array(options));
                    node
                })
                .collect(),
        )
    }

    // ------------------------------------------------------------------------
    // Built-in option set
    // ------------------------------------------------------------------------

    /// Store with the player's built-in options declared
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        for def in builtin_options() {
            if let Err(e) = store.declare(def) {
                tracing::error!("Invalid built-in option: {}", e);
            }
        }
        store.declare_alias("loop", "loop-file", false);
        store.declare_alias("softvol-max", "volume-max", true);
        store
    }
}

/// Tags shown by `filtered-metadata` unless configured otherwise
const DISPLAY_TAGS: &[&str] = &[
    "Artist",
    "Album",
    "Album_Artist",
    "Comment",
    "Composer",
    "Date",
    "Description",
    "Genre",
    "Performer",
    "Rating",
    "Series",
    "Title",
    "Track",
    "icy-title",
    "service_name",
];

fn builtin_options() -> Vec<OptionDef> {
    vec![
        OptionDef::new("pause", OptionType::flag(), false),
        OptionDef::new("speed", OptionType::double().with_range(0.01, 100.0), 1.0).update(UpdateFlags::SPEED),
        OptionDef::new("volume", OptionType::double().with_range(0.0, 1000.0), 100.0).update(UpdateFlags::VOLUME),
        OptionDef::new("volume-max", OptionType::double().with_range(100.0, 1000.0), 130.0)
            .update(UpdateFlags::VOLUME),
        OptionDef::new("mute", OptionType::flag(), false).update(UpdateFlags::VOLUME),
        OptionDef::new("loop-file", OptionType::choice(&["no", "inf"]), "no"),
        OptionDef::new("loop-playlist", OptionType::choice(&["no", "inf", "force"]), "no"),
        OptionDef::new("framedrop", OptionType::choice(&["no", "vo", "decoder", "decoder+vo"]), "vo"),
        OptionDef::new("keep-open", OptionType::choice(&["no", "yes", "always"]), "no"),
        OptionDef::new("idle", OptionType::choice(&["no", "yes", "once"]), "no"),
        OptionDef::new("osd-level", OptionType::int().with_range(0.0, 3.0), 1i64),
        OptionDef::new("osd-duration", OptionType::int().with_range(0.0, 3_600_000.0), 1000i64),
        OptionDef::new("osd-status-msg", OptionType::string(), ""),
        OptionDef::new("fullscreen", OptionType::flag(), false).update(UpdateFlags::WINDOW),
        OptionDef::new("audio-delay", OptionType::time().with_range(-100.0, 100.0), 0.0),
        OptionDef::new("title", OptionType::string(), ""),
        OptionDef::new("msg-level", OptionType::string(), "").update(UpdateFlags::TERM),
        OptionDef::new("script-opts", OptionType::string_list(), Node::Array(Vec::new())),
        OptionDef::new("display-tags", OptionType::string_list(), Node::string_list(DISPLAY_TAGS)),
        OptionDef::new("user-data", OptionType::node(), Node::Map(Vec::new())),
        OptionDef::new("config-dir", OptionType::string(), "").no_property(),
    ]
}

impl fmt::Debug for OptionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionStore")
            .field("entry_count", &self.entries.len())
            .field("profile_count", &self.profiles.len())
            .finish()
    }
}

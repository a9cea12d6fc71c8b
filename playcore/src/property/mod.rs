//! Property registry and dispatch
//!
//! Every piece of player state controllers can read or write is a named
//! property. A property is a `PropertyAccessor` implementation registered in
//! the `PropertyTable`; the dispatcher in this module adds the generic
//! behaviour every property gets for free:
//!
//! - `set_string`: parse through the property's type, then `set`
//! - `switch`: get, step through the type (wrap or clamp), set
//! - `multiply`: numeric get, scale, clamp, set
//! - `print`: get, then format through the type
//! - sub-keys (`name/key/...`) on map/array values: read-only node lookup
//!
//! Names split on the first `/`: `metadata/by-key/title` is property
//! `metadata` with key `by-key/title`.
//!
//! Every successful set-class action raises a change notification for the
//! name used, except through `property_do_silent`, which the option bridge
//! uses when it emits the notification itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use playcore::property::{self, PropertyAction};
//!
//! property::property_set_string(&mut session, "pause", "yes")?;
//! let text = property::property_print(&mut session, "volume")?;
//! property::property_do(&mut session, "osd-level", PropertyAction::Switch { inc: 1.0, wrap: true })?;
//! ```

pub mod builtin;
pub mod expand;
pub mod generic;

use std::collections::HashMap;
use std::sync::Arc;

use option_store::{Node, OptionStore, OptionType};
use tracing::debug;

use crate::error::{PropertyError, PropertyResult};
use crate::session::Session;

/// Maximum length of a chain of alias properties
const MAX_ALIAS_DEPTH: usize = 8;

// ============================================================================
// Actions
// ============================================================================

/// Operation requested on a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAction {
    Get,
    GetType,
    /// Human-oriented text
    Print,
    /// Canonical text that parses back to the same value
    GetString,
    Set(Node),
    SetString(String),
    Switch { inc: f64, wrap: bool },
    Multiply(f64),
}

impl PropertyAction {
    /// Whether the action writes the property
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            PropertyAction::Set(_)
                | PropertyAction::SetString(_)
                | PropertyAction::Switch { .. }
                | PropertyAction::Multiply(_)
        )
    }
}

/// Primitive operations passed to `PropertyAccessor::key_action`
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    Get,
    GetType,
    Print,
    Set(Node),
}

/// Result of a property action
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyReply {
    Value(Node),
    Type(OptionType),
    Text(String),
    Done,
}

impl PropertyReply {
    fn into_value(self) -> PropertyResult<Node> {
        match self {
            PropertyReply::Value(v) => Ok(v),
            other => Err(PropertyError::Failed(format!("unexpected reply {:?}", other))),
        }
    }

    fn into_type(self) -> PropertyResult<OptionType> {
        match self {
            PropertyReply::Type(t) => Ok(t),
            other => Err(PropertyError::Failed(format!("unexpected reply {:?}", other))),
        }
    }

    fn into_text(self) -> PropertyResult<String> {
        match self {
            PropertyReply::Text(t) => Ok(t),
            other => Err(PropertyError::Failed(format!("unexpected reply {:?}", other))),
        }
    }
}

// ============================================================================
// Accessor trait
// ============================================================================

/// Implementation of one property
///
/// Every method defaults to `NotSupported`. For `get_type`, `print`,
/// `switch`, `multiply` and `key_action` that default makes the dispatcher
/// fall back to the generic behaviour.
pub trait PropertyAccessor: Send + Sync {
    fn get(&self, _session: &mut Session) -> PropertyResult<Node> {
        Err(PropertyError::NotSupported)
    }

    fn set(&self, _session: &mut Session, _value: Node) -> PropertyResult<()> {
        Err(PropertyError::NotSupported)
    }

    fn get_type(&self, _session: &mut Session) -> PropertyResult<OptionType> {
        Err(PropertyError::NotSupported)
    }

    fn print(&self, _session: &mut Session) -> PropertyResult<String> {
        Err(PropertyError::NotSupported)
    }

    fn switch(&self, _session: &mut Session, _inc: f64, _wrap: bool) -> PropertyResult<()> {
        Err(PropertyError::NotSupported)
    }

    fn multiply(&self, _session: &mut Session, _factor: f64) -> PropertyResult<()> {
        Err(PropertyError::NotSupported)
    }

    /// Handle `name/key`; `key` may itself contain `/`
    fn key_action(&self, _session: &mut Session, _key: &str, _action: KeyAction) -> PropertyResult<PropertyReply> {
        Err(PropertyError::NotSupported)
    }

    /// Target property name and deprecation state, for alias properties
    fn alias(&self) -> Option<(&str, bool)> {
        None
    }
}

// ============================================================================
// Property table
// ============================================================================

struct PropertyEntry {
    accessor: Box<dyn PropertyAccessor>,
    /// Synthesized from an option rather than written by hand
    is_option: bool,
}

/// Name → accessor map, built once per session
#[derive(Default)]
pub struct PropertyTable {
    entries: HashMap<String, PropertyEntry>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hand-written property, replacing any previous entry
    pub fn register(&mut self, name: &str, accessor: impl PropertyAccessor + 'static) {
        self.entries.insert(
            name.to_string(),
            PropertyEntry {
                accessor: Box::new(accessor),
                is_option: false,
            },
        );
    }

    /// Register a property synthesized from an option unless one exists
    pub fn register_option(&mut self, name: &str, accessor: impl PropertyAccessor + 'static) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| PropertyEntry {
                accessor: Box::new(accessor),
                is_option: true,
            });
    }

    /// The built-in properties merged with one property per exposed option
    pub fn build(options: &OptionStore) -> Self {
        let mut table = Self::new();
        builtin::register_all(&mut table);
        generic::register_options(&mut table, options);
        debug!("Property table built with {} entries", table.len());
        table
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether a hand-written property with this name exists
    pub fn is_manual(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| !e.is_option)
    }

    /// All property names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accessor(&self, name: &str) -> Option<&dyn PropertyAccessor> {
        self.entries.get(name).map(|e| e.accessor.as_ref())
    }
}

impl std::fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

// ============================================================================
// Node helpers
// ============================================================================

/// Type describing a node value, for properties without a declared type
pub fn type_of_node(node: &Node) -> OptionType {
    match node {
        Node::Flag(_) => OptionType::flag(),
        Node::Int(_) => OptionType::int(),
        Node::Double(_) => OptionType::double(),
        Node::String(_) => OptionType::string(),
        Node::None | Node::Array(_) | Node::Map(_) => OptionType::node(),
    }
}

/// Format a node without a declared type
pub fn print_node(node: &Node) -> String {
    match node {
        Node::String(s) => s.clone(),
        other => type_of_node(other).print(other).unwrap_or_else(|| other.to_string()),
    }
}

/// Follow a `/`-separated path into a node; arrays also answer `count`
pub fn lookup_path(node: &Node, path: &str) -> Option<Node> {
    let mut current = node.clone();
    for segment in path.split('/') {
        current = match &current {
            Node::Map(_) => current.get(segment)?.clone(),
            Node::Array(items) if segment == "count" => Node::Int(items.len() as i64),
            Node::Array(items) => items.get(segment.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('/') {
        Some((base, key)) => (base, Some(key)),
        None => (name, None),
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// A property, or a key below it
struct Target<'a> {
    name: &'a str,
    accessor: &'a dyn PropertyAccessor,
    key: Option<&'a str>,
}

impl Target<'_> {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        let Some(key) = self.key else {
            return self.accessor.get(session);
        };
        match self.accessor.key_action(session, key, KeyAction::Get) {
            Err(PropertyError::NotSupported) => {
                let value = self.accessor.get(session)?;
                lookup_path(&value, key).ok_or(PropertyError::Unknown)
            }
            r => r?.into_value(),
        }
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        let declared = match self.key {
            None => self.accessor.get_type(session),
            Some(key) => self
                .accessor
                .key_action(session, key, KeyAction::GetType)
                .and_then(PropertyReply::into_type),
        };
        match declared {
            Err(PropertyError::NotSupported) => Ok(type_of_node(&self.get(session)?)),
            r => r,
        }
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        match self.key {
            None => self.accessor.set(session, value),
            Some(key) => self
                .accessor
                .key_action(session, key, KeyAction::Set(value))
                .map(|_| ()),
        }
    }

    fn print(&self, session: &mut Session) -> PropertyResult<String> {
        let direct = match self.key {
            None => self.accessor.print(session),
            Some(key) => self
                .accessor
                .key_action(session, key, KeyAction::Print)
                .and_then(PropertyReply::into_text),
        };
        match direct {
            Err(PropertyError::NotSupported) => {
                let ty = self.get_type(session)?;
                let value = self.get(session)?;
                ty.pretty_print(&value)
                    .ok_or_else(|| PropertyError::Failed(format!("cannot print '{}'", self.name)))
            }
            r => r,
        }
    }

    fn get_string(&self, session: &mut Session) -> PropertyResult<String> {
        let ty = self.get_type(session)?;
        let value = self.get(session)?;
        ty.print(&value)
            .ok_or_else(|| PropertyError::Failed(format!("cannot print '{}'", self.name)))
    }

    fn set_string(&self, session: &mut Session, text: &str) -> PropertyResult<()> {
        let ty = self.get_type(session)?;
        let value = ty
            .parse(self.name, text)
            .map_err(|e| PropertyError::InvalidValue(e.to_string()))?;
        self.set(session, value)
    }

    fn switch(&self, session: &mut Session, inc: f64, wrap: bool) -> PropertyResult<()> {
        if self.key.is_none() {
            match self.accessor.switch(session, inc, wrap) {
                Err(PropertyError::NotSupported) => {}
                r => return r,
            }
        }
        let ty = self.get_type(session)?;
        let value = self.get(session)?;
        let next = ty.add(self.name, &value, inc, wrap)?;
        self.set(session, next)
    }

    fn multiply(&self, session: &mut Session, factor: f64) -> PropertyResult<()> {
        if self.key.is_none() {
            match self.accessor.multiply(session, factor) {
                Err(PropertyError::NotSupported) => {}
                r => return r,
            }
        }
        let ty = self.get_type(session)?;
        let value = self.get(session)?;
        let next = ty.multiply(&value, factor)?;
        self.set(session, next)
    }

    fn run(&self, session: &mut Session, action: PropertyAction) -> PropertyResult<PropertyReply> {
        match action {
            PropertyAction::Get => self.get(session).map(PropertyReply::Value),
            PropertyAction::GetType => self.get_type(session).map(PropertyReply::Type),
            PropertyAction::Print => self.print(session).map(PropertyReply::Text),
            PropertyAction::GetString => self.get_string(session).map(PropertyReply::Text),
            PropertyAction::Set(value) => self.set(session, value).map(|_| PropertyReply::Done),
            PropertyAction::SetString(text) => self.set_string(session, &text).map(|_| PropertyReply::Done),
            PropertyAction::Switch { inc, wrap } => self.switch(session, inc, wrap).map(|_| PropertyReply::Done),
            PropertyAction::Multiply(factor) => self.multiply(session, factor).map(|_| PropertyReply::Done),
        }
    }
}

fn dispatch(session: &mut Session, name: &str, action: PropertyAction, depth: usize) -> PropertyResult<PropertyReply> {
    if depth > MAX_ALIAS_DEPTH {
        return Err(PropertyError::Unknown);
    }
    let (base, key) = split_name(name);
    let table = Arc::clone(session.properties());
    let accessor = table.accessor(base).ok_or(PropertyError::Unknown)?;

    if let Some((target, deprecated)) = accessor.alias() {
        if deprecated {
            session.warn_deprecated_once(base, target);
        }
        let target_name = match key {
            Some(key) => format!("{}/{}", target, key),
            None => target.to_string(),
        };
        return dispatch(session, &target_name, action, depth + 1);
    }

    Target {
        name,
        accessor,
        key,
    }
    .run(session, action)
}

/// Run an action and notify observers if it wrote the property
pub fn property_do(session: &mut Session, name: &str, action: PropertyAction) -> PropertyResult<PropertyReply> {
    let is_set = action.is_set();
    if is_set && !session.is_silent() {
        debug!("Set property: {} ({:?})", name, action);
    }
    let reply = dispatch(session, name, action, 0)?;
    if is_set && !session.is_silent() {
        session.notify_property(name);
    }
    Ok(reply)
}

/// Run an action without notification, deprecation warnings or logging
pub fn property_do_silent(session: &mut Session, name: &str, action: PropertyAction) -> PropertyResult<PropertyReply> {
    session.enter_silent();
    let reply = dispatch(session, name, action, 0);
    session.leave_silent();
    reply
}

pub fn property_get(session: &mut Session, name: &str) -> PropertyResult<Node> {
    property_do(session, name, PropertyAction::Get)?.into_value()
}

pub fn property_get_type(session: &mut Session, name: &str) -> PropertyResult<OptionType> {
    property_do(session, name, PropertyAction::GetType)?.into_type()
}

/// Human-oriented text of a property
pub fn property_print(session: &mut Session, name: &str) -> PropertyResult<String> {
    property_do(session, name, PropertyAction::Print)?.into_text()
}

/// Canonical text of a property
pub fn property_get_string(session: &mut Session, name: &str) -> PropertyResult<String> {
    property_do(session, name, PropertyAction::GetString)?.into_text()
}

pub fn property_set(session: &mut Session, name: &str, value: Node) -> PropertyResult<()> {
    property_do(session, name, PropertyAction::Set(value)).map(|_| ())
}

pub fn property_set_string(session: &mut Session, name: &str, text: &str) -> PropertyResult<()> {
    property_do(session, name, PropertyAction::SetString(text.to_string())).map(|_| ())
}

pub fn property_switch(session: &mut Session, name: &str, inc: f64, wrap: bool) -> PropertyResult<()> {
    property_do(session, name, PropertyAction::Switch { inc, wrap }).map(|_| ())
}

pub fn property_multiply(session: &mut Session, name: &str, factor: f64) -> PropertyResult<()> {
    property_do(session, name, PropertyAction::Multiply(factor)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_path() {
        let node = Node::Array(vec![
            Node::map([("filename", Node::from("a.mkv"))]),
            Node::map([("filename", Node::from("b.mkv")), ("current", Node::Flag(true))]),
        ]);
        assert_eq!(lookup_path(&node, "count"), Some(Node::Int(2)));
        assert_eq!(lookup_path(&node, "1/filename"), Some(Node::from("b.mkv")));
        assert_eq!(lookup_path(&node, "0/current"), None);
        assert_eq!(lookup_path(&node, "7/filename"), None);
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("metadata/by-key/title"), ("metadata", Some("by-key/title")));
        assert_eq!(split_name("pause"), ("pause", None));
    }

    #[test]
    fn test_print_node() {
        assert_eq!(print_node(&Node::Flag(true)), "yes");
        assert_eq!(print_node(&Node::from("x")), "x");
        assert_eq!(print_node(&Node::Int(4)), "4");
    }

    #[test]
    fn test_set_class_actions() {
        assert!(PropertyAction::Set(Node::Int(1)).is_set());
        assert!(PropertyAction::Switch { inc: 1.0, wrap: true }.is_set());
        assert!(!PropertyAction::Print.is_set());
    }
}

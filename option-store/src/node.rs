//! Dynamically typed values exchanged between options, properties and commands
//!
//! A `Node` is the common currency of the control plane: option storage,
//! property get/set, command arguments and command results all use it.
//! Maps keep insertion order, since tag lists and result maps are shown to
//! users in the order they were produced.

use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    /// No value
    #[default]
    None,
    Flag(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Node>),
    /// Ordered key/value map
    Map(Vec<(String, Node)>),
}

impl Node {
    /// Build a map node from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the node format, used in error messages
    pub fn format_name(&self) -> &'static str {
        match self {
            Node::None => "none",
            Node::Flag(_) => "flag",
            Node::Int(_) => "int64",
            Node::Double(_) => "double",
            Node::String(_) => "string",
            Node::Array(_) => "node-array",
            Node::Map(_) => "node-map",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Node::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers are widened
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Double(d) => Some(*d),
            Node::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match self {
            Node::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key in a map node
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Append or replace a key in a map node; no-op for other formats
    pub fn insert(&mut self, key: impl Into<String>, value: Node) {
        if let Node::Map(entries) = self {
            let key = key.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => entries.push((key, value)),
            }
        }
    }

    /// Collect a list of strings from an array of string nodes
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        let items = self.as_array()?;
        items
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect()
    }

    /// Build an array node of strings
    pub fn string_list<S: AsRef<str>>(items: &[S]) -> Self {
        Node::Array(items.iter().map(|s| Node::String(s.as_ref().to_string())).collect())
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Flag(v)
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Node::Int(v)
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Node::Double(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::String(v.to_string())
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Node::String(v)
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Node::None,
            Value::Bool(b) => Node::Flag(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Int(i),
                None => Node::Double(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Array(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect()),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::None => serializer.serialize_unit(),
            Node::Flag(b) => serializer.serialize_bool(*b),
            Node::Int(i) => serializer.serialize_i64(*i),
            Node::Double(d) => serializer.serialize_f64(*d),
            Node::String(s) => serializer.serialize_str(s),
            Node::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// JSON rendering, used by the `node` option type and for display
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_insert_replaces_existing_key() {
        let mut node = Node::map([("title", Node::from("a"))]);
        node.insert("title", Node::from("b"));
        node.insert("artist", Node::from("c"));

        assert_eq!(node.get("title"), Some(&Node::from("b")));
        assert_eq!(node.get("artist"), Some(&Node::from("c")));
        assert_eq!(node.get("album"), None);
    }

    #[test]
    fn test_display_is_json_with_key_order() {
        let node = Node::map([("b", Node::Int(1)), ("a", Node::Flag(true))]);
        assert_eq!(node.to_string(), r#"{"b":1,"a":true}"#);
    }

    #[test]
    fn test_from_json_value() {
        let value: serde_json::Value = serde_json::from_str(r#"["set", "pause", true, 1.5]"#).unwrap();
        let node = Node::from(value);
        assert_eq!(
            node,
            Node::Array(vec![
                Node::from("set"),
                Node::from("pause"),
                Node::Flag(true),
                Node::Double(1.5),
            ])
        );
    }

    #[test]
    fn test_string_list_round_trip() {
        let node = Node::string_list(&["a", "b"]);
        assert_eq!(node.to_string_list(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(Node::Int(3).to_string_list(), None);
    }
}

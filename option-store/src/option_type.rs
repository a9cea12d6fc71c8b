//! Option/property type descriptors
//!
//! An `OptionType` describes how a value is parsed from text, printed back,
//! range-checked and stepped. Properties report their type through the same
//! descriptor, so commands like `cycle` and `cycle-values` can work on any
//! property without knowing what backs it.

use crate::error::{OptionError, Result};
use crate::node::Node;

/// Value kind of an option or property
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    Flag,
    Int,
    Double,
    /// Seconds, printed as a timestamp for display
    Time,
    /// One of a fixed set of names
    Choice(Vec<String>),
    String,
    StringList,
    /// Arbitrary structured value
    Node,
}

/// Type descriptor with optional numeric bounds
#[derive(Debug, Clone, PartialEq)]
pub struct OptionType {
    pub kind: OptionKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// List edit operations accepted by `list_action`
pub const LIST_ACTIONS: &[&str] = &["set", "append", "add", "pre", "clr", "remove", "toggle"];

impl OptionType {
    fn new(kind: OptionKind) -> Self {
        Self {
            kind,
            min: None,
            max: None,
        }
    }

    pub fn flag() -> Self {
        Self::new(OptionKind::Flag)
    }

    pub fn int() -> Self {
        Self::new(OptionKind::Int)
    }

    pub fn double() -> Self {
        Self::new(OptionKind::Double)
    }

    pub fn time() -> Self {
        Self::new(OptionKind::Time)
    }

    pub fn string() -> Self {
        Self::new(OptionKind::String)
    }

    pub fn string_list() -> Self {
        Self::new(OptionKind::StringList)
    }

    pub fn node() -> Self {
        Self::new(OptionKind::Node)
    }

    pub fn choice(names: &[&str]) -> Self {
        Self::new(OptionKind::Choice(names.iter().map(|s| s.to_string()).collect()))
    }

    /// Restrict a numeric type to `[min, max]`
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Name shown by `option-info/NAME/type`
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            OptionKind::Flag => "Flag",
            OptionKind::Int => "Integer64",
            OptionKind::Double => "Double",
            OptionKind::Time => "Time",
            OptionKind::Choice(_) => "Choice",
            OptionKind::String => "String",
            OptionKind::StringList => "String list",
            OptionKind::Node => "Complex",
        }
    }

    /// Whether this type has meaningful min/max bounds
    pub fn has_range(&self) -> bool {
        matches!(self.kind, OptionKind::Int | OptionKind::Double | OptionKind::Time)
            && (self.min.is_some() || self.max.is_some())
    }

    /// Types stepped through discrete states, where key auto-repeat makes
    /// the value flicker
    pub fn is_discrete(&self) -> bool {
        matches!(self.kind, OptionKind::Flag | OptionKind::Choice(_))
    }

    /// Types backed by a floating-point number, which benefit from a
    /// continuous input scale factor
    pub fn is_scalable(&self) -> bool {
        matches!(self.kind, OptionKind::Double | OptionKind::Time)
    }

    pub fn choices(&self) -> Option<&[String]> {
        match &self.kind {
            OptionKind::Choice(names) => Some(names),
            _ => None,
        }
    }

    /// List operations supported by this type
    pub fn list_actions(&self) -> &'static [&'static str] {
        match self.kind {
            OptionKind::StringList => LIST_ACTIONS,
            _ => &[],
        }
    }

    fn parse_error(&self, name: &str, text: &str) -> OptionError {
        OptionError::Parse {
            name: name.to_string(),
            value: text.to_string(),
            type_name: self.type_name(),
        }
    }

    /// Parse a textual value
    pub fn parse(&self, name: &str, text: &str) -> Result<Node> {
        let node = match &self.kind {
            OptionKind::Flag => match text {
                "yes" | "true" | "" => Node::Flag(true),
                "no" | "false" => Node::Flag(false),
                _ => return Err(self.parse_error(name, text)),
            },
            OptionKind::Int => text
                .trim()
                .parse::<i64>()
                .map(Node::Int)
                .map_err(|_| self.parse_error(name, text))?,
            OptionKind::Double => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .map(Node::Double)
                .ok_or_else(|| self.parse_error(name, text))?,
            OptionKind::Time => parse_time(text)
                .map(Node::Double)
                .ok_or_else(|| self.parse_error(name, text))?,
            OptionKind::Choice(names) => {
                if names.iter().any(|n| n == text) {
                    Node::String(text.to_string())
                } else {
                    return Err(self.parse_error(name, text));
                }
            }
            OptionKind::String => Node::String(text.to_string()),
            OptionKind::StringList => Node::string_list(&split_list(text)),
            OptionKind::Node => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) => Node::from(value),
                Err(_) => Node::String(text.to_string()),
            },
        };
        self.validate(name, node)
    }

    /// Check format and range of a node, normalizing numeric formats
    pub fn validate(&self, name: &str, value: Node) -> Result<Node> {
        let wrong = |expected: &'static str, got: &Node| OptionError::WrongFormat {
            name: name.to_string(),
            expected,
            got: got.format_name(),
        };
        let value = match (&self.kind, value) {
            (OptionKind::Flag, v @ Node::Flag(_)) => v,
            (OptionKind::Int, v @ Node::Int(_)) => v,
            (OptionKind::Int, Node::Double(d)) if d.fract() == 0.0 => Node::Int(d as i64),
            (OptionKind::Double | OptionKind::Time, Node::Int(i)) => Node::Double(i as f64),
            (OptionKind::Double | OptionKind::Time, v @ Node::Double(_)) => v,
            (OptionKind::Choice(names), Node::String(s)) => {
                if !names.contains(&s) {
                    return Err(self.parse_error(name, &s));
                }
                Node::String(s)
            }
            (OptionKind::String, v @ Node::String(_)) => v,
            (OptionKind::StringList, v @ Node::Array(_)) => {
                if v.to_string_list().is_none() {
                    return Err(wrong("string list", &v));
                }
                v
            }
            (OptionKind::Node, v) => v,
            (kind, v) => {
                let expected = match kind {
                    OptionKind::Flag => "flag",
                    OptionKind::Int => "int64",
                    OptionKind::Double | OptionKind::Time => "double",
                    OptionKind::Choice(_) | OptionKind::String => "string",
                    OptionKind::StringList => "string list",
                    OptionKind::Node => "node",
                };
                return Err(wrong(expected, &v));
            }
        };
        self.check_range(name, &value)?;
        Ok(value)
    }

    fn check_range(&self, name: &str, value: &Node) -> Result<()> {
        let Some(v) = value.as_f64() else {
            return Ok(());
        };
        let below = self.min.is_some_and(|min| v < min);
        let above = self.max.is_some_and(|max| v > max);
        if below || above {
            return Err(OptionError::OutOfRange {
                name: name.to_string(),
                value: self.print(value).unwrap_or_default(),
                min: self.min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".into()),
                max: self.max.map(|m| m.to_string()).unwrap_or_else(|| "inf".into()),
            });
        }
        Ok(())
    }

    fn clamp(&self, v: f64) -> f64 {
        let v = self.min.map_or(v, |min| v.max(min));
        self.max.map_or(v, |max| v.min(max))
    }

    fn wrap_or_clamp(&self, v: f64, wrap: bool) -> f64 {
        if wrap {
            match (self.min, self.max) {
                (Some(min), Some(max)) if v > max => return min,
                (Some(min), Some(max)) if v < min => return max,
                _ => {}
            }
        }
        self.clamp(v)
    }

    /// Canonical textual form; parsing it yields an equal value
    pub fn print(&self, value: &Node) -> Option<String> {
        Some(match (&self.kind, value) {
            (OptionKind::Flag, Node::Flag(b)) => if *b { "yes" } else { "no" }.to_string(),
            (OptionKind::Int, Node::Int(i)) => i.to_string(),
            (OptionKind::Double | OptionKind::Time, v) => format!("{:.6}", v.as_f64()?),
            (OptionKind::Choice(_) | OptionKind::String, Node::String(s)) => s.clone(),
            (OptionKind::StringList, v) => v.to_string_list()?.join(","),
            (OptionKind::Node, v) => v.to_string(),
            _ => return None,
        })
    }

    /// Human-oriented form used for OSD text and `${NAME}` expansion
    pub fn pretty_print(&self, value: &Node) -> Option<String> {
        match (&self.kind, value) {
            (OptionKind::Double, v) => Some(format!("{:.2}", v.as_f64()?)),
            (OptionKind::Time, v) => Some(format_timestamp(v.as_f64()?)),
            (OptionKind::StringList, v) => Some(v.to_string_list()?.join(", ")),
            _ => self.print(value),
        }
    }

    /// Step a value by `inc`, wrapping around at the bounds or clamping
    pub fn add(&self, name: &str, value: &Node, inc: f64, wrap: bool) -> Result<Node> {
        let next = match (&self.kind, value) {
            (OptionKind::Flag, Node::Flag(b)) => {
                if inc.abs() < 0.5 {
                    Node::Flag(*b)
                } else if wrap {
                    Node::Flag(!*b)
                } else {
                    Node::Flag(inc > 0.0)
                }
            }
            (OptionKind::Int, Node::Int(i)) => {
                let v = (*i as f64 + inc.round()).round();
                Node::Int(self.wrap_or_clamp(v, wrap) as i64)
            }
            (OptionKind::Double | OptionKind::Time, v) => {
                let current = v.as_f64().ok_or_else(|| self.parse_error(name, &v.to_string()))?;
                Node::Double(self.wrap_or_clamp(current + inc, wrap))
            }
            (OptionKind::Choice(names), Node::String(s)) => {
                let len = names.len() as i64;
                if len == 0 {
                    return Err(self.parse_error(name, s));
                }
                let index = names.iter().position(|n| n == s).unwrap_or(0) as i64;
                // Saturating cast; NaN steps nowhere
                let mut steps = inc.round() as i64;
                if steps == 0 && inc != 0.0 && !inc.is_nan() {
                    steps = inc.signum() as i64;
                }
                let next = if wrap {
                    (index + steps.rem_euclid(len)).rem_euclid(len)
                } else {
                    (index + steps.clamp(-len, len)).clamp(0, len - 1)
                };
                Node::String(names[next as usize].clone())
            }
            _ => {
                return Err(OptionError::Unsupported {
                    type_name: self.type_name(),
                    operation: "add",
                })
            }
        };
        Ok(next)
    }

    /// Multiply a numeric value, clamping to the bounds
    pub fn multiply(&self, value: &Node, factor: f64) -> Result<Node> {
        match (&self.kind, value) {
            (OptionKind::Int, Node::Int(i)) => {
                Ok(Node::Int(self.clamp((*i as f64 * factor).round()) as i64))
            }
            (OptionKind::Double | OptionKind::Time, v) if v.as_f64().is_some() => {
                Ok(Node::Double(self.clamp(v.as_f64().unwrap_or_default() * factor)))
            }
            _ => Err(OptionError::Unsupported {
                type_name: self.type_name(),
                operation: "multiply",
            }),
        }
    }

    /// Compare two values through their canonical printed form
    pub fn values_equal(&self, a: &Node, b: &Node) -> bool {
        self.print(a).unwrap_or_default() == self.print(b).unwrap_or_default()
    }

    /// Apply a list edit such as `append` or `remove`
    pub fn list_action(&self, name: &str, current: &Node, action: &str, text: &str) -> Result<Node> {
        if !self.list_actions().contains(&action) {
            return Err(OptionError::UnknownAction(action.to_string()));
        }
        let mut items = current.to_string_list().unwrap_or_default();
        match action {
            "set" => items = split_list(text),
            "append" => items.push(text.to_string()),
            "add" => items.extend(split_list(text)),
            "pre" => {
                let mut front = split_list(text);
                front.extend(items);
                items = front;
            }
            "clr" => items.clear(),
            "remove" => items.retain(|item| item != text),
            "toggle" => {
                if items.iter().any(|item| item == text) {
                    items.retain(|item| item != text);
                } else {
                    items.push(text.to_string());
                }
            }
            _ => return Err(OptionError::UnknownAction(action.to_string())),
        }
        self.validate(name, Node::string_list(&items))
    }
}

fn split_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(str::to_string).collect()
}

/// Parse `[-][[hh:]mm:]ss[.frac]` into seconds
pub fn parse_time(text: &str) -> Option<f64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let parts: Vec<&str> = body.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let (last, leading) = parts.split_last()?;
    let mut seconds = last.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)?;
    let mut unit = 60.0;
    for part in leading.iter().rev() {
        seconds += part.parse::<u64>().ok()? as f64 * unit;
        unit *= 60.0;
    }
    Some(if negative { -seconds } else { seconds })
}

/// Format seconds as `HH:MM:SS`
pub fn format_timestamp(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total = seconds.abs().floor() as u64;
    format!("{}{:02}:{:02}:{:02}", sign, total / 3600, (total / 60) % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1:30", 90.0)]
    #[case("01:00:05.5", 3605.5)]
    #[case("-10", -10.0)]
    #[case("12.25", 12.25)]
    fn test_parse_time(#[case] text: &str, #[case] expected: f64) {
        assert_eq!(parse_time(text), Some(expected));
    }

    #[rstest]
    #[case("1:2:3:4")]
    #[case("abc")]
    #[case("1:-5")]
    fn test_parse_time_rejects(#[case] text: &str) {
        assert_eq!(parse_time(text), None);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(3725.9), "01:02:05");
        assert_eq!(format_timestamp(-5.0), "-00:00:05");
    }

    #[test]
    fn test_flag_parse_and_print() {
        let ty = OptionType::flag();
        assert_eq!(ty.parse("pause", "yes").unwrap(), Node::Flag(true));
        assert_eq!(ty.parse("pause", "no").unwrap(), Node::Flag(false));
        assert!(ty.parse("pause", "maybe").is_err());
        assert_eq!(ty.print(&Node::Flag(true)).as_deref(), Some("yes"));
    }

    #[test]
    fn test_int_range_is_enforced() {
        let ty = OptionType::int().with_range(0.0, 3.0);
        assert_eq!(ty.parse("osd-level", "2").unwrap(), Node::Int(2));
        assert!(matches!(
            ty.parse("osd-level", "4"),
            Err(OptionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_double_accepts_int_nodes() {
        let ty = OptionType::double();
        assert_eq!(ty.validate("speed", Node::Int(2)).unwrap(), Node::Double(2.0));
    }

    #[test]
    fn test_choice_cycle_wraps_from_last_to_first() {
        let ty = OptionType::choice(&["no", "inf", "force"]);
        let next = ty.add("loop", &Node::from("force"), 1.0, true).unwrap();
        assert_eq!(next, Node::from("no"));

        let prev = ty.add("loop", &Node::from("no"), -1.0, true).unwrap();
        assert_eq!(prev, Node::from("force"));
    }

    #[test]
    fn test_choice_add_clamps_without_wrap() {
        let ty = OptionType::choice(&["no", "inf", "force"]);
        let next = ty.add("loop", &Node::from("force"), 1.0, false).unwrap();
        assert_eq!(next, Node::from("force"));
    }

    #[rstest]
    #[case(1e19, true, "force")]
    #[case(-1e19, true, "force")]
    #[case(f64::INFINITY, false, "force")]
    #[case(f64::NEG_INFINITY, false, "no")]
    #[case(f64::NAN, true, "inf")]
    #[case(f64::NAN, false, "inf")]
    #[case(0.2, false, "force")]
    fn test_choice_add_extreme_increments(#[case] inc: f64, #[case] wrap: bool, #[case] expected: &str) {
        let ty = OptionType::choice(&["no", "inf", "force"]);
        let next = ty.add("loop-playlist", &Node::from("inf"), inc, wrap).unwrap();
        assert_eq!(next, Node::from(expected));
    }

    #[test]
    fn test_int_wrap_at_bounds() {
        let ty = OptionType::int().with_range(0.0, 3.0);
        assert_eq!(ty.add("osd-level", &Node::Int(3), 1.0, true).unwrap(), Node::Int(0));
        assert_eq!(ty.add("osd-level", &Node::Int(0), -1.0, true).unwrap(), Node::Int(3));
        assert_eq!(ty.add("osd-level", &Node::Int(3), 1.0, false).unwrap(), Node::Int(3));
    }

    #[test]
    fn test_flag_add() {
        let ty = OptionType::flag();
        assert_eq!(ty.add("mute", &Node::Flag(false), 1.0, true).unwrap(), Node::Flag(true));
        assert_eq!(ty.add("mute", &Node::Flag(true), 1.0, true).unwrap(), Node::Flag(false));
        assert_eq!(ty.add("mute", &Node::Flag(true), 1.0, false).unwrap(), Node::Flag(true));
        assert_eq!(ty.add("mute", &Node::Flag(true), -1.0, false).unwrap(), Node::Flag(false));
    }

    #[test]
    fn test_multiply_clamps() {
        let ty = OptionType::double().with_range(0.0, 100.0);
        assert_eq!(ty.multiply(&Node::Double(80.0), 2.0).unwrap(), Node::Double(100.0));
        assert!(OptionType::string().multiply(&Node::from("x"), 2.0).is_err());
    }

    #[test]
    fn test_values_equal_normalizes_representation() {
        let ty = OptionType::double();
        let a = ty.parse("speed", "1").unwrap();
        let b = ty.parse("speed", "1.000").unwrap();
        assert!(ty.values_equal(&a, &b));
    }

    #[rstest]
    #[case("append", "c", &["a", "b", "c"])]
    #[case("add", "c,d", &["a", "b", "c", "d"])]
    #[case("pre", "z", &["z", "a", "b"])]
    #[case("remove", "a", &["b"])]
    #[case("toggle", "b", &["a"])]
    #[case("toggle", "x", &["a", "b", "x"])]
    #[case("clr", "", &[])]
    #[case("set", "q", &["q"])]
    fn test_list_actions(#[case] action: &str, #[case] text: &str, #[case] expected: &[&str]) {
        let ty = OptionType::string_list();
        let current = Node::string_list(&["a", "b"]);
        let next = ty.list_action("list", &current, action, text).unwrap();
        assert_eq!(next, Node::string_list(expected));
    }

    #[test]
    fn test_list_action_unknown() {
        let ty = OptionType::string_list();
        assert_eq!(
            ty.list_action("list", &Node::Array(vec![]), "explode", ""),
            Err(OptionError::UnknownAction("explode".into()))
        );
    }
}

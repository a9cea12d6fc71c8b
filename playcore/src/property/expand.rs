//! Property expansion in user-facing strings
//!
//! | Syntax                   | Result                                          |
//! |--------------------------|-------------------------------------------------|
//! | `${NAME}`                | printed value, `(error)` or `(unavailable)`     |
//! | `${NAME:TEXT}`           | printed value, or `TEXT` if it has none         |
//! | `${=NAME}`               | canonical (raw) value                           |
//! | `${?NAME:TEXT}`          | `TEXT` if the property has a value              |
//! | `${!NAME:TEXT}`          | `TEXT` if the property has no value             |
//! | `${?NAME==VALUE:TEXT}`   | `TEXT` if the printed value equals `VALUE`      |
//! | `${!NAME==VALUE:TEXT}`   | `TEXT` if the printed value differs from `VALUE`|
//! | `$$`, `$}`               | literal `$`, `}`                                |
//! | `$>`                     | rest of the string is copied verbatim           |
//!
//! `TEXT` may itself contain expansions.

use crate::command::parse::push_char;
use crate::error::{ExpandError, PropertyError};
use crate::session::Session;

use super::{property_get_string, property_print};

/// Expand every `${...}` expression in `input`
pub fn expand_string(session: &mut Session, input: &str) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut level = 0usize;
    let mut skip = false;
    let mut skip_level = 0usize;

    while !rest.is_empty() {
        if level > 0 && rest.starts_with('}') {
            rest = &rest[1..];
            if skip && level <= skip_level {
                skip = false;
            }
            level -= 1;
        } else if let Some(after) = rest.strip_prefix("${") {
            if !after.contains('}') {
                return Err(ExpandError::Unterminated(input.to_string()));
            }
            level += 1;
            // ':' and '}' never appear in property names
            let term = after.find([':', '}']).unwrap_or(after.len());
            let name = &after[..term];
            rest = &after[term..];
            let has_fallback = match rest.strip_prefix(':') {
                Some(tail) => {
                    rest = tail;
                    true
                }
                None => false,
            };
            if !skip {
                skip = expand_property(session, &mut out, name, has_fallback)?;
                if skip {
                    skip_level = level;
                }
            }
        } else if level == 0 && rest.starts_with("$>") {
            out.push_str(&rest[2..]);
            break;
        } else {
            let (c, len) = if rest.starts_with("$$") {
                ('$', 2)
            } else if rest.starts_with("$}") {
                ('}', 2)
            } else {
                let Some(c) = rest.chars().next() else {
                    break;
                };
                (c, c.len_utf8())
            };
            rest = &rest[len..];
            if !skip {
                out.push(c);
            }
        }
    }

    if level > 0 {
        return Err(ExpandError::Unterminated(input.to_string()));
    }
    Ok(out)
}

/// Expand one `${...}` head; returns whether the text that follows is skipped
fn expand_property(session: &mut Session, out: &mut String, expr: &str, has_fallback: bool) -> Result<bool, ExpandError> {
    let (cond_yes, cond_no, mut prop) = if let Some(p) = expr.strip_prefix('?') {
        (true, false, p)
    } else if let Some(p) = expr.strip_prefix('!') {
        (false, true, p)
    } else {
        (false, false, expr)
    };
    let test = cond_yes || cond_no;

    let mut raw = match prop.strip_prefix('=') {
        Some(p) => {
            prop = p;
            true
        }
        None => false,
    };

    let mut compare_with = None;
    if test {
        match prop.split_once("==") {
            Some((name, value)) => {
                prop = name;
                compare_with = Some(value);
            }
            None => raw = true,
        }
    }

    if prop.is_empty() {
        return Err(ExpandError::EmptyName(expr.to_string()));
    }

    let value = if raw {
        property_get_string(session, prop)
    } else {
        property_print(session, prop)
    };

    let skip = match (compare_with, &value) {
        (Some(expected), Ok(text)) => (text == expected) != cond_yes,
        (Some(_), Err(_)) => !cond_yes,
        (None, _) if test => value.is_ok() != cond_yes,
        (None, Ok(text)) => {
            out.push_str(text);
            true
        }
        (None, Err(e)) => {
            if !has_fallback && !raw {
                out.push_str(match e {
                    PropertyError::Unavailable => "(unavailable)",
                    _ => "(error)",
                });
            }
            false
        }
    };
    Ok(skip)
}

/// Parse C-style escapes, then expand properties
///
/// A string with invalid escapes expands to `(broken escape sequences)`.
pub fn expand_escaped_string(session: &mut Session, input: &str) -> Result<String, ExpandError> {
    match unescape(input) {
        Some(text) => expand_string(session, &text),
        None => Ok("(broken escape sequences)".to_string()),
    }
}

fn unescape(input: &str) -> Option<String> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(&mut out, c);
            continue;
        }
        let plain = match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'e' => '\x1b',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(u8::from_str_radix(&hex, 16).ok()?);
                continue;
            }
            _ => return None,
        };
        push_char(&mut out, plain);
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::control::Core;
    use crate::playback::MediaInfo;
    use rstest::rstest;

    fn core() -> Core {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.register_media("song.flac", MediaInfo::new().with_duration(65.0).with_tag("Title", "Song"));
        core
    }

    #[rstest]
    #[case("pause: ${pause}", "pause: no")]
    #[case("${=volume}", "100.000000")]
    #[case("${volume}", "100.00")]
    #[case("${nonexistent}", "(error)")]
    #[case("${path}", "(unavailable)")]
    #[case("${path:none}", "none")]
    #[case("${?pause:P}", "P")]
    #[case("${!pause:P}", "")]
    #[case("${?pause==no:not paused}", "not paused")]
    #[case("${!pause==no:not paused}", "")]
    #[case("${?path:has path}", "")]
    #[case("${!path:no file}", "no file")]
    #[case("$$5 and $}", "$5 and }")]
    #[case("a$>${pause}", "a${pause}")]
    #[case("${?pause==no:vol ${volume}}", "vol 100.00")]
    fn test_expand_idle(#[case] input: &str, #[case] expected: &str) {
        let core = core();
        core.with_session(|s| {
            assert_eq!(expand_string(s, input).unwrap(), expected);
        });
    }

    #[test]
    fn test_expand_with_file() {
        let core = core();
        core.command_blocking("loadfile song.flac").unwrap();
        core.with_session(|s| {
            assert_eq!(expand_string(s, "${media-title} ${duration}").unwrap(), "Song 00:01:05");
            assert_eq!(expand_string(s, "${?path:playing ${filename/no-ext}}").unwrap(), "playing song");
        });
    }

    #[rstest]
    #[case("${pause")]
    #[case("${?pause:abc")]
    fn test_unterminated(#[case] input: &str) {
        let core = core();
        core.with_session(|s| {
            assert!(matches!(expand_string(s, input), Err(ExpandError::Unterminated(_))));
        });
    }

    #[test]
    fn test_escaped() {
        let core = core();
        core.with_session(|s| {
            assert_eq!(expand_escaped_string(s, r"a\n${pause}").unwrap(), "a\nno");
            assert_eq!(expand_escaped_string(s, r"bad \q").unwrap(), "(broken escape sequences)");
            assert_eq!(expand_escaped_string(s, r"caf\xc3\xa9").unwrap(), "café");
            assert_eq!(expand_escaped_string(s, r"\xff").unwrap(), "(broken escape sequences)");
        });
    }
}

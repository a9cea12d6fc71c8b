//! Command text and node parsing
//!
//! Syntax of a command string:
//!
//! - arguments separated by whitespace
//! - `"..."` with C-style escapes, or `'...'` taken literally
//! - `#` starts a comment that runs to the end of the line
//! - `;` separates the entries of a command list
//! - prefixes before the command name: `async`, `sync`,
//!   `expand-properties`, `raw`, `repeatable`

use std::sync::Arc;

use option_store::Node;

use super::{ArgSpec, Command, CommandDef, CommandTable, ExecMode};
use crate::client::ClientId;
use crate::error::CommandError;

/// Name of the internal command that runs a sequence of commands
pub const LIST_COMMAND: &str = "list";

/// Parse a command string into a validated command
///
/// A string with several `;`-separated entries yields a `list` command.
pub fn parse_command(table: &CommandTable, text: &str, sender: Option<ClientId>) -> Result<Command, CommandError> {
    let mut commands = Vec::new();
    for entry in split_entries(text)? {
        if entry.tokens.is_empty() {
            continue;
        }
        commands.push(build_command(table, entry)?);
    }

    let cmd = match commands.len() {
        0 => return Err(CommandError::Syntax("empty command".into())),
        1 => commands.remove(0),
        _ => {
            let mut list = Command::new(list_def(table)?, Vec::new());
            list.sub_commands = commands;
            list.original = text.trim().to_string();
            list
        }
    };
    Ok(cmd.with_sender(sender))
}

/// Build a command from a node
///
/// An array holds the name followed by positional arguments. A map holds
/// `name` plus arguments keyed by their schema names.
pub fn parse_command_node(table: &CommandTable, node: &Node, sender: Option<ClientId>) -> Result<Command, CommandError> {
    let cmd = match node {
        Node::Array(items) => {
            let (name, args) = items
                .split_first()
                .ok_or_else(|| CommandError::Syntax("empty command array".into()))?;
            let name = name
                .as_str()
                .ok_or_else(|| CommandError::Syntax("command name must be a string".into()))?;
            let def = lookup(table, name)?;
            let args = validate_nodes(&def, args.to_vec())?;
            Command::new(def, args)
        }
        Node::Map(entries) => {
            let name = node
                .get("name")
                .and_then(Node::as_str)
                .ok_or_else(|| CommandError::Syntax("command map needs a string 'name'".into()))?;
            let def = lookup(table, name)?;
            let args = validate_named(&def, entries)?;
            Command::new(def, args)
        }
        other => {
            return Err(CommandError::Syntax(format!(
                "cannot build a command from {}",
                other.format_name()
            )))
        }
    };
    Ok(cmd.with_sender(sender))
}

fn list_def(table: &CommandTable) -> Result<Arc<CommandDef>, CommandError> {
    lookup(table, LIST_COMMAND)
}

fn lookup(table: &CommandTable, name: &str) -> Result<Arc<CommandDef>, CommandError> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct Entry {
    tokens: Vec<String>,
    text: String,
}

fn split_entries(text: &str) -> Result<Vec<Entry>, CommandError> {
    let mut entries = Vec::new();
    let mut current = Entry::default();
    let mut chars = text.char_indices().peekable();
    let mut start = 0;
    let mut end = text.len();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                end = pos;
                break;
            }
            ';' => {
                chars.next();
                current.text = text[start..pos].trim().to_string();
                entries.push(std::mem::take(&mut current));
                start = pos + 1;
            }
            '"' => {
                chars.next();
                current.tokens.push(read_quoted(&mut chars)?);
            }
            '\'' => {
                chars.next();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, c)) => token.push(c),
                        None => return Err(CommandError::Syntax("unterminated quotes".into())),
                    }
                }
                current.tokens.push(token);
            }
            _ => {
                let mut token = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == ';' || c == '#' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                current.tokens.push(token);
            }
        }
    }

    current.text = text[start..end.max(start)].trim().to_string();
    entries.push(current);
    Ok(entries)
}

pub(crate) fn push_char(bytes: &mut Vec<u8>, c: char) {
    bytes.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes());
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Result<String, CommandError> {
    // Bytes, since `\x` escapes may spell out multi-byte UTF-8 sequences
    let mut token = Vec::new();
    loop {
        match chars.next() {
            Some((_, '"')) => {
                return String::from_utf8(token)
                    .map_err(|_| CommandError::Syntax("escapes do not form valid UTF-8".into()))
            }
            Some((_, '\\')) => {
                let (_, esc) = chars
                    .next()
                    .ok_or_else(|| CommandError::Syntax("unterminated escape".into()))?;
                match esc {
                    'n' => push_char(&mut token, '\n'),
                    't' => push_char(&mut token, '\t'),
                    'r' => push_char(&mut token, '\r'),
                    '"' => push_char(&mut token, '"'),
                    '\\' => push_char(&mut token, '\\'),
                    '\'' => push_char(&mut token, '\''),
                    'x' => {
                        let hex: String = (0..2).filter_map(|_| chars.next().map(|(_, c)| c)).collect();
                        let byte = u8::from_str_radix(&hex, 16)
                            .map_err(|_| CommandError::Syntax(format!("invalid escape '\\x{}'", hex)))?;
                        token.push(byte);
                    }
                    other => return Err(CommandError::Syntax(format!("unknown escape '\\{}'", other))),
                }
            }
            Some((_, c)) => push_char(&mut token, c),
            None => return Err(CommandError::Syntax("unterminated quotes".into())),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn build_command(table: &CommandTable, entry: Entry) -> Result<Command, CommandError> {
    let mut exec = ExecMode::Default;
    let mut expand = None;
    let mut repeatable = false;

    let mut tokens = entry.tokens.into_iter().peekable();
    while let Some(token) = tokens.peek() {
        match token.as_str() {
            "async" => exec = ExecMode::Async,
            "sync" => exec = ExecMode::Sync,
            "expand-properties" => expand = Some(true),
            "raw" => expand = Some(false),
            "repeatable" => repeatable = true,
            _ => break,
        }
        tokens.next();
    }

    let name = tokens
        .next()
        .ok_or_else(|| CommandError::Syntax("command name missing after prefixes".into()))?;
    let def = lookup(table, &name)?;
    let args = validate_text(&def, tokens.collect())?;

    let mut cmd = Command::new(def, args);
    cmd.exec = exec;
    cmd.repeatable = repeatable;
    if let Some(expand) = expand {
        cmd.expand_properties = expand;
    }
    cmd.original = entry.text;
    Ok(cmd)
}

fn spec_for<'a>(def: &'a CommandDef, index: usize) -> Result<&'a ArgSpec, CommandError> {
    def.arg_spec(index).ok_or_else(|| CommandError::TooManyArguments {
        command: def.name.to_string(),
        max: def.args.len(),
    })
}

fn fill_defaults(def: &CommandDef, mut args: Vec<Node>) -> Result<Vec<Node>, CommandError> {
    for spec in def.args.iter().skip(args.len()) {
        match &spec.default {
            Some(default) => args.push(default.clone()),
            None => {
                return Err(CommandError::MissingArgument {
                    command: def.name.to_string(),
                    arg: spec.name.to_string(),
                })
            }
        }
    }
    Ok(args)
}

fn invalid(def: &CommandDef, spec: &ArgSpec, reason: String) -> CommandError {
    CommandError::InvalidArgument {
        command: def.name.to_string(),
        arg: spec.name.to_string(),
        reason,
    }
}

/// Parse textual arguments against a schema
pub(crate) fn validate_text(def: &CommandDef, tokens: Vec<String>) -> Result<Vec<Node>, CommandError> {
    let mut args = Vec::with_capacity(tokens.len());
    for (index, token) in tokens.iter().enumerate() {
        let spec = spec_for(def, index)?;
        let value = spec.ty.parse(spec.name, token).map_err(|e| invalid(def, spec, e))?;
        args.push(value);
    }
    fill_defaults(def, args)
}

/// Check structured arguments against a schema
pub(crate) fn validate_nodes(def: &CommandDef, values: Vec<Node>) -> Result<Vec<Node>, CommandError> {
    let mut args = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let spec = spec_for(def, index)?;
        let value = spec.ty.validate(spec.name, value).map_err(|e| invalid(def, spec, e))?;
        args.push(value);
    }
    fill_defaults(def, args)
}

/// Check arguments keyed by their schema names
///
/// Omitted optional arguments take their default; keys outside the schema
/// are rejected.
fn validate_named(def: &CommandDef, entries: &[(String, Node)]) -> Result<Vec<Node>, CommandError> {
    if def.vararg {
        return Err(CommandError::Syntax(format!(
            "command '{}' takes positional arguments only",
            def.name
        )));
    }
    if let Some((key, _)) = entries
        .iter()
        .find(|(key, _)| key != "name" && !def.args.iter().any(|spec| spec.name == key))
    {
        return Err(CommandError::InvalidArgument {
            command: def.name.to_string(),
            arg: key.clone(),
            reason: "no such argument".into(),
        });
    }

    let mut args = Vec::with_capacity(def.args.len());
    for spec in &def.args {
        let value = match entries.iter().find(|(key, _)| key == spec.name) {
            Some((_, value)) => spec
                .ty
                .validate(spec.name, value.clone())
                .map_err(|e| invalid(def, spec, e))?,
            None => spec.default.clone().ok_or_else(|| CommandError::MissingArgument {
                command: def.name.to_string(),
                arg: spec.name.to_string(),
            })?,
        };
        args.push(value);
    }
    Ok(args)
}

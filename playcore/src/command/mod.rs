//! Command schema, parsing and execution
//!
//! Commands are named actions with a typed argument schema. A command
//! string (or a `Node`) is parsed against its `CommandDef` into a
//! validated `Command`, wrapped in a `CommandCtx` and run by the pipeline.
//!
//! # Architecture
//!
//! ```text
//! "cycle pause; add volume 5"
//!        │ parse_command (tokenize, prefixes, validate args)
//!        ▼
//! Command { def: "list", sub_commands: [cycle, add] }
//!        │ run_command (abort entry, property expansion)
//!        ▼
//! ┌──────────────┬──────────────────┬────────────────────────────┐
//! │ Sync         │ Async            │ Worker                     │
//! │ handler, then│ handler owns ctx,│ queued on the worker pool, │
//! │ complete     │ completes later  │ re-locks the core, complete│
//! └──────────────┴──────────────────┴────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use playcore::command::{parse_command, run_command};
//!
//! let cmd = parse_command(session.commands(), "set pause yes", None)?;
//! run_command(&mut session, cmd, None);
//! ```

pub mod context;
pub mod handlers;
pub mod parse;
pub mod pipeline;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use option_store::{Node, OptionKind, OptionType};
use parking_lot::MutexGuard;

use crate::client::ClientId;
use crate::session::Session;

pub use crate::error::CommandError;
pub use context::{CommandCtx, CommandOutcome, Completion};
pub use parse::{parse_command, parse_command_node};
pub use pipeline::run_command;

// ============================================================================
// Schema
// ============================================================================

/// Handler run on the core thread; the pipeline completes the command after
pub type SyncHandler = fn(&mut CommandCtx, &mut Session);

/// Handler that takes ownership of the context and completes it itself
pub type AsyncHandler = fn(CommandCtx, &mut Session);

/// Handler run on a worker thread with the core locked
///
/// It may release the lock around blocking work with
/// `MutexGuard::unlocked`. The pipeline completes the command after.
pub type WorkerHandler = fn(&mut CommandCtx, &mut MutexGuard<'_, Session>);

/// Execution strategy of a command
#[derive(Clone, Copy)]
pub enum CommandHandler {
    Sync(SyncHandler),
    Async(AsyncHandler),
    Worker(WorkerHandler),
}

impl CommandHandler {
    fn kind(&self) -> &'static str {
        match self {
            CommandHandler::Sync(_) => "sync",
            CommandHandler::Async(_) => "async",
            CommandHandler::Worker(_) => "worker",
        }
    }
}

/// How a textual argument is turned into a value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgType {
    /// Parsed through an option type
    Typed(OptionType),
    /// `up`, `down` or a number; yields a double step
    CycleDir,
    /// `current` or a playlist index; `current` yields -1
    IndexOrCurrent,
}

impl ArgType {
    pub fn string() -> Self {
        ArgType::Typed(OptionType::string())
    }

    pub fn double() -> Self {
        ArgType::Typed(OptionType::double())
    }

    pub fn int() -> Self {
        ArgType::Typed(OptionType::int())
    }

    pub fn flag() -> Self {
        ArgType::Typed(OptionType::flag())
    }

    pub fn choice(names: &[&str]) -> Self {
        ArgType::Typed(OptionType::choice(names))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ArgType::Typed(t) if t.kind == OptionKind::String)
    }

    /// Parse a textual argument
    pub fn parse(&self, name: &str, text: &str) -> Result<Node, String> {
        match self {
            ArgType::Typed(ty) => ty.parse(name, text).map_err(|e| e.to_string()),
            ArgType::CycleDir => match text {
                "up" => Ok(Node::Double(1.0)),
                "down" => Ok(Node::Double(-1.0)),
                other => other
                    .parse::<f64>()
                    .map(Node::Double)
                    .map_err(|_| format!("'{}' is not up, down or a number", other)),
            },
            ArgType::IndexOrCurrent => match text {
                "current" => Ok(Node::Int(-1)),
                other => other
                    .parse::<i64>()
                    .ok()
                    .filter(|i| *i >= 0)
                    .map(Node::Int)
                    .ok_or_else(|| format!("'{}' is not an index or 'current'", other)),
            },
        }
    }

    /// Check a structured argument, parsing strings as text
    pub fn validate(&self, name: &str, value: Node) -> Result<Node, String> {
        if let Node::String(text) = &value {
            if !self.is_string() {
                return self.parse(name, text);
            }
        }
        match self {
            ArgType::Typed(ty) => ty.validate(name, value).map_err(|e| e.to_string()),
            ArgType::CycleDir => value
                .as_f64()
                .map(Node::Double)
                .ok_or_else(|| format!("expected a number, got {}", value.format_name())),
            ArgType::IndexOrCurrent => value
                .as_i64()
                .map(Node::Int)
                .ok_or_else(|| format!("expected an index, got {}", value.format_name())),
        }
    }
}

/// One argument of a command schema
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    /// Value used when an optional argument is omitted
    pub default: Option<Node>,
}

impl ArgSpec {
    pub fn required(name: &'static str, ty: ArgType) -> Self {
        Self { name, ty, default: None }
    }

    pub fn optional(name: &'static str, ty: ArgType, default: impl Into<Node>) -> Self {
        Self {
            name,
            ty,
            default: Some(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Static description of a command
#[derive(Clone)]
pub struct CommandDef {
    pub name: &'static str,
    pub handler: CommandHandler,
    pub args: Vec<ArgSpec>,
    /// The last argument may repeat
    pub vararg: bool,
    /// Runs when triggered by key auto-repeat
    pub allow_auto_repeat: bool,
    /// Accepts a fractional input scale (e.g. from a precise scroll wheel)
    pub scalable: bool,
    /// Gets an abort entry and can be cancelled
    pub can_abort: bool,
    /// Cancelled when the playback session ends
    pub abort_on_playback_end: bool,
    /// Default for the per-invocation property expansion flag
    pub expand_properties: bool,
    /// Logged at trace level instead of debug
    pub is_ignore: bool,
}

impl CommandDef {
    pub fn new(name: &'static str, handler: CommandHandler) -> Self {
        Self {
            name,
            handler,
            args: Vec::new(),
            vararg: false,
            allow_auto_repeat: false,
            scalable: false,
            can_abort: false,
            abort_on_playback_end: false,
            expand_properties: true,
            is_ignore: false,
        }
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn vararg(mut self) -> Self {
        self.vararg = true;
        self
    }

    pub fn auto_repeat(mut self) -> Self {
        self.allow_auto_repeat = true;
        self
    }

    pub fn scalable(mut self) -> Self {
        self.scalable = true;
        self
    }

    pub fn can_abort(mut self) -> Self {
        self.can_abort = true;
        self
    }

    pub fn abort_on_playback_end(mut self) -> Self {
        self.can_abort = true;
        self.abort_on_playback_end = true;
        self
    }

    pub fn raw(mut self) -> Self {
        self.expand_properties = false;
        self
    }

    pub fn ignore(mut self) -> Self {
        self.is_ignore = true;
        self
    }

    /// Schema entry for positional argument `index`
    pub fn arg_spec(&self, index: usize) -> Option<&ArgSpec> {
        match self.args.get(index) {
            Some(spec) => Some(spec),
            None if self.vararg => self.args.last(),
            None => None,
        }
    }
}

impl fmt::Debug for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDef")
            .field("name", &self.name)
            .field("handler", &self.handler.kind())
            .field("args", &self.args)
            .field("vararg", &self.vararg)
            .field("can_abort", &self.can_abort)
            .finish()
    }
}

/// All known commands, by name
#[derive(Debug, Default)]
pub struct CommandTable {
    defs: HashMap<&'static str, Arc<CommandDef>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in command
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for def in handlers::builtin_commands() {
            table.insert(def);
        }
        table
    }

    pub fn insert(&mut self, def: CommandDef) {
        self.defs.insert(def.name, Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CommandDef>> {
        self.defs.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.defs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ============================================================================
// Parsed command
// ============================================================================

/// Per-invocation execution preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Default,
    /// Run detached inside a list
    Async,
    Sync,
}

/// A validated command invocation
#[derive(Debug, Clone)]
pub struct Command {
    pub def: Arc<CommandDef>,
    pub name: String,
    pub args: Vec<Node>,
    pub exec: ExecMode,
    pub expand_properties: bool,
    /// Explicitly allowed to auto-repeat
    pub repeatable: bool,
    /// Triggered by key auto-repeat
    pub is_repeated: bool,
    /// Input scale factor, e.g. from a precise scroll wheel
    pub scale: f64,
    /// Number of discrete steps the input represents
    pub scale_units: u32,
    /// Client that issued the command; `None` for interactive input
    pub sender: Option<ClientId>,
    /// Source text, for logging
    pub original: String,
    /// Entries of a `list` command
    pub sub_commands: Vec<Command>,
}

impl Command {
    pub fn new(def: Arc<CommandDef>, args: Vec<Node>) -> Self {
        Self {
            name: def.name.to_string(),
            expand_properties: def.expand_properties,
            def,
            args,
            exec: ExecMode::Default,
            repeatable: false,
            is_repeated: false,
            scale: 1.0,
            scale_units: 1,
            sender: None,
            original: String::new(),
            sub_commands: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: Option<ClientId>) -> Self {
        self.sender = sender;
        for sub in &mut self.sub_commands {
            sub.sender = sender;
        }
        self
    }

    /// Mark the invocation as coming from key auto-repeat
    pub fn with_repeated(mut self, repeated: bool) -> Self {
        self.is_repeated = repeated;
        self
    }

    pub fn with_scale(mut self, scale: f64, units: u32) -> Self {
        self.scale = scale;
        self.scale_units = units.max(1);
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.original.is_empty() {
            return f.write_str(&self.original);
        }
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            match arg {
                Node::String(s) => write!(f, " \"{}\"", s)?,
                other => write!(f, " {}", other)?,
            }
        }
        Ok(())
    }
}

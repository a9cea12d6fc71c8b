//! Control plane of a media player
//!
//! Runs commands, exposes the player state as named properties, bridges
//! option writes to their runtime effects, serializes hook handlers across
//! clients and delivers change notifications.
//!
//! # Features
//!
//! - **Properties**: uniform get/set/print/switch access to built-in and
//!   option-backed values, with `${...}` expansion in command arguments
//! - **Commands**: text and structured command parsing, prefixes, command
//!   lists and three execution modes (inline, async, worker pool)
//! - **Hooks**: per-type handler chains run one at a time in priority order
//! - **Notifications**: coalesced change events for observed names
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use playcore::{Core, CoreConfig, Node};
//!
//! let core = Core::new(CoreConfig::default())?;
//!
//! core.command_blocking("set volume 50")?;
//! core.command_blocking("cycle-values loop-playlist inf no")?;
//!
//! let text = core.command_blocking("expand-text \"vol=${volume}\"")?;
//! assert_eq!(text, Node::from("vol=50.00"));
//! ```
//!
//! # Architecture
//!
//! ```text
//! Core ─── Arc<Mutex<Session>> ──┬── OptionStore      (option_store)
//!   │                            ├── PropertyTable    property/
//!   │                            ├── CommandTable     command/
//!   │                            ├── HookManager      hook
//!   │                            ├── ChangeNotifier   notify
//!   │                            ├── Playback / Osd   playback, player
//!   │                            └── WorkerPool       worker
//!   └── ClientRegistry ◄──── hook invocations, events
//! ```
//!
//! Everything inside `Session` runs under the single core lock. Worker
//! commands release it for their blocking sections.

pub mod abort;
pub mod bridge;
pub mod client;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod hook;
pub mod logging;
pub mod notify;
pub mod playback;
pub mod player;
pub mod property;
pub mod session;
pub mod worker;

pub use crate::control::Core;
pub use client::{ClientChannel, ClientEvent, ClientHandle, ClientId, ClientRegistry, Envelope};
pub use command::{Command, CommandCtx, CommandDef, CommandOutcome, CommandTable, ExecMode};
pub use config::CoreConfig;
pub use error::{
    CommandError, CoreError, ExpandError, HookError, PoolError, PropertyError, PropertyResult, Result,
};
pub use hook::{HookHandler, HookSeq};
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use notify::{ChangeIterator, PlayerEvent, PropertyChange};
pub use option_store::{Node, OptionStore, OptionType, Profile, SetFlags};
pub use playback::MediaInfo;
pub use property::{PropertyAction, PropertyReply};
pub use session::Session;

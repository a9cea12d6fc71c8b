//! Built-in commands
//!
//! `builtin_commands` returns the schema of every command the core knows.
//! Property-manipulating commands route through the property registry, so
//! they get the same validation and change notification as direct property
//! writes.

use std::fs;
use std::io::{self, Read};
use std::process::{Command as Process, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use option_store::{format_timestamp, Node, OptionType, SetFlags};
use parking_lot::MutexGuard;
use tracing::{debug, info, warn};

use super::pipeline::cmd_list;
use super::{ArgSpec, ArgType, CommandCtx, CommandDef, CommandHandler};
use crate::abort::AbortEntry;
use crate::bridge;
use crate::client::ClientEvent;
use crate::error::{CommandError, PropertyError, PropertyResult};
use crate::hook::HookSeq;
use crate::notify::PlayerEvent;
use crate::player;
use crate::property::expand::expand_escaped_string;
use crate::property::{self, PropertyAction};
use crate::session::Session;

const CLIENT_ONLY: &str = "Can be used from client API only.";

/// Default capture limit of `subprocess`, in bytes
const DEFAULT_CAPTURE_SIZE: i64 = 64 * 1024 * 1024;

const SUBPROCESS_POLL: Duration = Duration::from_millis(10);

// Negative `subprocess` status codes
const SUBPROCESS_EGENERIC: i64 = -1;
const SUBPROCESS_EKILLED_BY_US: i64 = -2;
const SUBPROCESS_EINIT: i64 = -3;

/// Schema of every built-in command
pub(crate) fn builtin_commands() -> Vec<CommandDef> {
    use CommandHandler::{Async, Sync, Worker};

    vec![
        CommandDef::new("ignore", Sync(cmd_ignore)).ignore(),
        // Properties
        CommandDef::new("set", Sync(cmd_set))
            .arg(ArgSpec::required("property", ArgType::string()))
            .arg(ArgSpec::required("value", ArgType::string())),
        CommandDef::new("add", Sync(cmd_add))
            .arg(ArgSpec::required("property", ArgType::string()))
            .arg(ArgSpec::optional("value", ArgType::double(), 1.0))
            .auto_repeat()
            .scalable(),
        CommandDef::new("cycle", Sync(cmd_cycle))
            .arg(ArgSpec::required("property", ArgType::string()))
            .arg(ArgSpec::optional("value", ArgType::CycleDir, 1.0))
            .auto_repeat()
            .scalable(),
        CommandDef::new("multiply", Sync(cmd_multiply))
            .arg(ArgSpec::required("property", ArgType::string()))
            .arg(ArgSpec::required("value", ArgType::double()))
            .auto_repeat(),
        CommandDef::new("cycle-values", Sync(cmd_cycle_values))
            .arg(ArgSpec::required("args", ArgType::string()))
            .vararg(),
        CommandDef::new("change-list", Sync(cmd_change_list))
            .arg(ArgSpec::required("name", ArgType::string()))
            .arg(ArgSpec::required("operation", ArgType::string()))
            .arg(ArgSpec::required("value", ArgType::string())),
        // Text output
        CommandDef::new("print-text", Sync(cmd_print_text))
            .arg(ArgSpec::required("text", ArgType::string()))
            .auto_repeat(),
        CommandDef::new("show-text", Sync(cmd_show_text))
            .arg(ArgSpec::required("text", ArgType::string()))
            .arg(ArgSpec::optional("duration", ArgType::int(), -1i64))
            .arg(ArgSpec::optional("level", ArgType::int(), 1i64))
            .auto_repeat(),
        CommandDef::new("expand-text", Sync(cmd_expand_text))
            .arg(ArgSpec::required("text", ArgType::string()))
            .raw(),
        CommandDef::new("show-progress", Sync(cmd_show_progress)).auto_repeat(),
        // Processes
        CommandDef::new("run", Sync(cmd_run))
            .arg(ArgSpec::required("command", ArgType::string()))
            .vararg(),
        CommandDef::new("subprocess", Worker(cmd_subprocess))
            .arg(ArgSpec::required("args", ArgType::Typed(OptionType::string_list())))
            .arg(ArgSpec::optional("playback_only", ArgType::flag(), true))
            .arg(ArgSpec::optional("capture_size", ArgType::int(), DEFAULT_CAPTURE_SIZE))
            .arg(ArgSpec::optional("capture_stdout", ArgType::flag(), false))
            .arg(ArgSpec::optional("capture_stderr", ArgType::flag(), false))
            .can_abort(),
        // Playlist and playback
        CommandDef::new("loadfile", Async(cmd_loadfile))
            .arg(ArgSpec::required("url", ArgType::string()))
            .arg(ArgSpec::optional(
                "flags",
                ArgType::choice(&["replace", "append", "append-play"]),
                "replace",
            )),
        CommandDef::new("playlist-next", Sync(cmd_playlist_next))
            .arg(ArgSpec::optional("flags", ArgType::choice(&["weak", "force"]), "weak")),
        CommandDef::new("playlist-prev", Sync(cmd_playlist_prev))
            .arg(ArgSpec::optional("flags", ArgType::choice(&["weak", "force"]), "weak")),
        CommandDef::new("playlist-clear", Sync(cmd_playlist_clear)),
        CommandDef::new("playlist-remove", Sync(cmd_playlist_remove))
            .arg(ArgSpec::optional("index", ArgType::IndexOrCurrent, -1i64)),
        CommandDef::new("playlist-move", Sync(cmd_playlist_move))
            .arg(ArgSpec::required("index1", ArgType::int()))
            .arg(ArgSpec::required("index2", ArgType::int())),
        CommandDef::new("playlist-shuffle", Sync(cmd_playlist_shuffle)),
        CommandDef::new("loadlist", Sync(cmd_loadlist))
            .arg(ArgSpec::required("url", ArgType::string()))
            .arg(ArgSpec::optional("flags", ArgType::choice(&["replace", "append"]), "replace")),
        CommandDef::new("stop", Sync(cmd_stop)),
        CommandDef::new("seek", Sync(cmd_seek))
            .arg(ArgSpec::required("target", ArgType::Typed(OptionType::time())))
            .arg(ArgSpec::optional(
                "flags",
                ArgType::choice(&["relative", "absolute", "absolute-percent", "relative-percent"]),
                "relative",
            ))
            .auto_repeat()
            .scalable(),
        CommandDef::new("revert-seek", Sync(cmd_revert_seek))
            .arg(ArgSpec::optional("flags", ArgType::choice(&["none", "mark"]), "none")),
        CommandDef::new("quit", Sync(cmd_quit)).arg(ArgSpec::optional("code", ArgType::int(), 0i64)),
        CommandDef::new("quit-watch-later", Sync(cmd_quit_watch_later))
            .arg(ArgSpec::optional("code", ArgType::int(), 0i64)),
        CommandDef::new("apply-profile", Sync(cmd_apply_profile))
            .arg(ArgSpec::required("name", ArgType::string())),
        CommandDef::new("write-watch-later-config", Sync(cmd_write_watch_later_config)),
        // Clients
        CommandDef::new("hook-add", Sync(cmd_hook_add))
            .arg(ArgSpec::required("name", ArgType::string()))
            .arg(ArgSpec::required("id", ArgType::int()))
            .arg(ArgSpec::optional("priority", ArgType::int(), 0i64)),
        CommandDef::new("hook-ack", Sync(cmd_hook_ack)).arg(ArgSpec::required("id", ArgType::int())),
        CommandDef::new("script-message", Sync(cmd_script_message))
            .arg(ArgSpec::required("args", ArgType::string()))
            .vararg(),
        CommandDef::new("script-message-to", Sync(cmd_script_message_to))
            .arg(ArgSpec::required("target", ArgType::string()))
            .arg(ArgSpec::required("args", ArgType::string()))
            .vararg(),
        CommandDef::new("script-binding", Sync(cmd_script_binding))
            .arg(ArgSpec::required("name", ArgType::string())),
        CommandDef::new("list", Async(cmd_list)),
    ]
}

// ============================================================================
// Property commands
// ============================================================================

/// Show the new value of a property after an interactive change
fn show_property_osd(ctx: &CommandCtx, session: &mut Session, name: &str) {
    if !ctx.is_interactive() {
        return;
    }
    if let Ok(text) = property::property_print(session, name) {
        session.show_osd(&format!("{}: {}", name, text));
    }
}

/// Report the outcome of a property action on the command
fn show_property_status(ctx: &mut CommandCtx, session: &mut Session, name: &str, result: PropertyResult<()>) {
    let Err(source) = result else {
        show_property_osd(ctx, session, name);
        return;
    };
    match &source {
        PropertyError::Unavailable => {}
        PropertyError::Unknown => session.show_osd(&format!("Unknown property: '{}'", name)),
        _ => session.show_osd(&format!("Failed to set property '{}'", name)),
    }
    ctx.fail(CommandError::Property {
        name: name.to_string(),
        source,
    });
}

fn change_property(ctx: &mut CommandCtx, session: &mut Session, name: &str, action: PropertyAction) {
    let result = property::property_do(session, name, action).map(|_| ());
    show_property_status(ctx, session, name, result);
}

fn cmd_ignore(_ctx: &mut CommandCtx, _session: &mut Session) {}

fn cmd_set(ctx: &mut CommandCtx, session: &mut Session) {
    let name = ctx.arg_str(0).to_string();
    let value = ctx.arg_str(1).to_string();
    change_property(ctx, session, &name, PropertyAction::SetString(value));
}

fn cmd_add(ctx: &mut CommandCtx, session: &mut Session) {
    add_cycle(ctx, session, false);
}

fn cmd_cycle(ctx: &mut CommandCtx, session: &mut Session) {
    add_cycle(ctx, session, true);
}

fn add_cycle(ctx: &mut CommandCtx, session: &mut Session, wrap: bool) {
    let name = ctx.arg_str(0).to_string();
    let inc = ctx.arg_f64(1);
    let ty = property::property_get_type(session, &name).ok();

    // Flags and choices flicker when stepped by a held key
    if ctx.cmd.is_repeated && !ctx.cmd.repeatable && ty.as_ref().is_some_and(OptionType::is_discrete) {
        debug!("Dropping command '{}' from auto-repeated key.", ctx.cmd);
        return;
    }

    let (scale, units) = if ty.as_ref().is_some_and(OptionType::is_scalable) {
        (ctx.cmd.scale, 1)
    } else {
        (1.0, ctx.cmd.scale_units)
    };
    for _ in 0..units {
        let result = property::property_switch(session, &name, inc * scale, wrap);
        if result.is_err() {
            show_property_status(ctx, session, &name, result);
            return;
        }
    }
    show_property_status(ctx, session, &name, Ok(()));
}

fn cmd_multiply(ctx: &mut CommandCtx, session: &mut Session) {
    let name = ctx.arg_str(0).to_string();
    let factor = ctx.arg_f64(1);
    change_property(ctx, session, &name, PropertyAction::Multiply(factor));
}

fn cmd_cycle_values(ctx: &mut CommandCtx, session: &mut Session) {
    let mut args: Vec<String> = ctx
        .args()
        .iter()
        .filter_map(|a| a.as_str().map(str::to_string))
        .collect();
    let reverse = args.first().is_some_and(|a| a == "!reverse");
    if reverse {
        args.remove(0);
    }
    if args.len() < 2 {
        ctx.fail(CommandError::Failed(
            "cycle-values command does not have any value arguments.".into(),
        ));
        return;
    }
    let name = args.remove(0);

    let current = property::property_get_type(session, &name)
        .and_then(|ty| Ok((ty, property::property_get(session, &name)?)));
    let (ty, current) = match current {
        Ok(found) => found,
        Err(e) => {
            show_property_status(ctx, session, &name, Err(e));
            return;
        }
    };

    let position = args.iter().position(|candidate| {
        ty.parse(&name, candidate)
            .is_ok_and(|value| ty.values_equal(&current, &value))
    });
    let last = args.len() - 1;
    let next = match position {
        Some(i) if reverse => i.checked_sub(1).unwrap_or(last),
        Some(i) if i == last => 0,
        Some(i) => i + 1,
        None => {
            debug!("Current value not found. Picking default.");
            if reverse {
                last
            } else {
                0
            }
        }
    };
    let value = args.swap_remove(next);
    change_property(ctx, session, &name, PropertyAction::SetString(value));
}

fn cmd_change_list(ctx: &mut CommandCtx, session: &mut Session) {
    let name = ctx.arg_str(0).to_string();
    let operation = ctx.arg_str(1).to_string();
    let text = ctx.arg_str(2).to_string();

    let Some((canonical, ty, current)) = session
        .options
        .get(&name)
        .map(|opt| (opt.name().to_string(), opt.option_type().clone(), opt.value().clone()))
    else {
        session.show_osd(&format!("Unknown option: '{}'", name));
        ctx.fail(CommandError::Failed(format!("unknown option '{}'", name)));
        return;
    };

    if !ty.list_actions().contains(&operation.as_str()) {
        session.show_osd(&format!("Unknown action: '{}'", operation));
        ctx.fail(CommandError::Failed(format!("unknown list action '{}'", operation)));
        return;
    }

    let result = ty
        .list_action(&canonical, &current, &operation, &text)
        .map_err(PropertyError::from)
        .and_then(|value| bridge::on_set_option(session, &canonical, value, SetFlags::RUNTIME));
    if let Err(e) = result {
        session.show_osd(&format!("Failed setting option: '{}'", name));
        ctx.fail(CommandError::Property { name, source: e });
        return;
    }
    show_property_osd(ctx, session, &canonical);
}

// ============================================================================
// Text output
// ============================================================================

fn cmd_print_text(ctx: &mut CommandCtx, session: &mut Session) {
    session.osd.print(ctx.arg_str(0));
}

fn cmd_show_text(ctx: &mut CommandCtx, session: &mut Session) {
    let text = ctx.arg_str(0);
    let duration = ctx.arg_i64(1);
    let level = ctx.arg_i64(2);

    let osd_level = session
        .options
        .value("osd-level")
        .ok()
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    if level > osd_level {
        return;
    }
    if duration < 0 {
        session.show_osd(text);
    } else {
        session.osd.show(text, duration);
    }
}

fn cmd_expand_text(ctx: &mut CommandCtx, session: &mut Session) {
    match expand_escaped_string(session, ctx.arg_str(0)) {
        Ok(text) => ctx.set_result(Node::String(text)),
        Err(e) => ctx.fail(e.into()),
    }
}

fn cmd_show_progress(_ctx: &mut CommandCtx, session: &mut Session) {
    if !session.playback.is_playing() {
        return;
    }
    let pos = format_timestamp(session.playback.time_pos);
    let text = match (session.playback.duration(), session.playback.percent_pos()) {
        (Some(duration), Some(percent)) => {
            format!("{} / {} ({:.0}%)", pos, format_timestamp(duration), percent)
        }
        _ => pos,
    };
    session.show_osd(&text);
}

// ============================================================================
// Processes
// ============================================================================

fn cmd_run(ctx: &mut CommandCtx, _session: &mut Session) {
    let args: Vec<String> = ctx
        .args()
        .iter()
        .filter_map(|a| a.as_str().map(str::to_string))
        .collect();
    let Some((program, rest)) = args.split_first() else {
        ctx.fail(CommandError::Failed("program name missing".into()));
        return;
    };

    let spawned = Process::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            debug!("Started detached process '{}' (pid {})", program, child.id());
            // Reap the child so it does not linger as a zombie
            thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => {
            warn!("Could not run '{}': {}", program, e);
            ctx.fail(CommandError::Failed(format!("could not run '{}': {}", program, e)));
        }
    }
}

/// Outcome of a `subprocess` invocation
#[derive(Debug, Default)]
struct SubprocessResult {
    status: i64,
    killed_by_us: bool,
    error: &'static str,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
}

impl SubprocessResult {
    fn failed(status: i64, error: &'static str) -> Self {
        Self {
            status,
            error,
            ..Self::default()
        }
    }

    fn into_node(self) -> Node {
        let mut node = Node::map([
            ("status", Node::Int(self.status)),
            ("killed_by_us", Node::Flag(self.killed_by_us)),
            ("error_string", Node::from(self.error)),
        ]);
        for (key, bytes) in [("stdout", self.stdout), ("stderr", self.stderr)] {
            if let Some(bytes) = bytes {
                node.insert(key, Node::String(String::from_utf8_lossy(&bytes).into_owned()));
            }
        }
        node
    }
}

fn cmd_subprocess(ctx: &mut CommandCtx, session: &mut MutexGuard<'_, Session>) {
    let args = ctx.arg(0).to_string_list().unwrap_or_default();
    let playback_only = ctx.arg_bool(1);
    let capture_size = u64::try_from(ctx.arg_i64(2)).unwrap_or(0);
    let capture_stdout = ctx.arg_bool(3);
    let capture_stderr = ctx.arg_bool(4);

    if args.is_empty() {
        ctx.fail(CommandError::Failed("program name missing".into()));
        return;
    }
    let abort = ctx.abort.clone();
    if let Some(abort) = &abort {
        abort.set_coupled_to_playback(playback_only);
        // The file may have ended while the command waited in the queue
        let stopped = player::playback_aborted(session);
        if session.aborts.recheck(abort, stopped) {
            debug!("Subprocess '{}' aborted before start", args[0]);
        }
    }

    let result = MutexGuard::unlocked(session, || {
        run_subprocess(&args, abort.as_deref(), capture_size, capture_stdout, capture_stderr)
    });
    debug!("Subprocess '{}' finished with status {}", args[0], result.status);
    ctx.set_result(result.into_node());
}

/// Run a process to completion without the core lock
fn run_subprocess(
    args: &[String],
    abort: Option<&AbortEntry>,
    capture_size: u64,
    capture_stdout: bool,
    capture_stderr: bool,
) -> SubprocessResult {
    let pipe = |capture: bool| if capture { Stdio::piped() } else { Stdio::inherit() };
    let spawned = Process::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(pipe(capture_stdout))
        .stderr(pipe(capture_stderr))
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            warn!("Could not start '{}': {}", args[0], e);
            return SubprocessResult::failed(SUBPROCESS_EINIT, "init");
        }
    };

    let stdout = child.stdout.take().map(|p| capture_pipe(p, capture_size));
    let stderr = child.stderr.take().map(|p| capture_pipe(p, capture_size));

    let mut killed = false;
    let status = loop {
        if !killed && abort.is_some_and(AbortEntry::is_aborted) {
            debug!("Killing subprocess '{}'", args[0]);
            if let Err(e) = child.kill() {
                warn!("Could not kill '{}': {}", args[0], e);
            }
            killed = true;
        }
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => thread::sleep(SUBPROCESS_POLL),
            Err(e) => {
                warn!("Waiting for '{}' failed: {}", args[0], e);
                break None;
            }
        }
    };

    let mut result = match (killed, status.and_then(|s| s.code())) {
        (true, _) => SubprocessResult::failed(SUBPROCESS_EKILLED_BY_US, "killed"),
        (false, Some(code)) => SubprocessResult::failed(i64::from(code), ""),
        (false, None) => SubprocessResult::failed(SUBPROCESS_EGENERIC, "unknown"),
    };
    result.killed_by_us = killed;
    result.stdout = stdout.map(|h| h.join().unwrap_or_default());
    result.stderr = stderr.map(|h| h.join().unwrap_or_default());
    result
}

/// Read up to `limit` bytes from a pipe, draining the rest
fn capture_pipe<R: Read + Send + 'static>(mut pipe: R, limit: u64) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.by_ref().take(limit).read_to_end(&mut buf) {
            debug!("Capture read failed: {}", e);
        }
        // A child blocked on a full pipe would never exit
        let _ = io::copy(&mut pipe, &mut io::sink());
        buf
    })
}

// ============================================================================
// Playlist and playback
// ============================================================================

fn cmd_loadfile(mut ctx: CommandCtx, session: &mut Session) {
    let url = ctx.arg_str(0).to_string();
    let mode = ctx.arg_str(1).to_string();

    if mode == "replace" {
        player::end_file(session);
        session.playback.current = None;
        session.playback.playlist.clear();
    }
    let index = session.playback.append(&url);
    session.event(PlayerEvent::ChangePlaylist);

    let start = match mode.as_str() {
        "replace" => true,
        "append-play" => session.playback.current.is_none(),
        _ => false,
    };
    if start {
        player::start_file(session, index, Some(ctx));
    } else {
        ctx.set_result(Node::map([("playlist_entry_id", Node::Int(entry_id(session, index)))]));
        ctx.complete(session);
    }
}

fn entry_id(session: &Session, index: usize) -> i64 {
    session
        .playback
        .playlist
        .get(index)
        .map_or(-1, |e| i64::try_from(e.id).unwrap_or(-1))
}

fn playlist_next_prev(ctx: &mut CommandCtx, session: &mut Session, dir: i64) {
    let force = ctx.arg_str(0) == "force";
    match player::playlist_neighbor(session, dir) {
        Some(index) => player::start_file(session, index, None),
        None if force => player::end_playback(session),
        None => ctx.fail_silently(),
    }
}

fn cmd_playlist_next(ctx: &mut CommandCtx, session: &mut Session) {
    playlist_next_prev(ctx, session, 1);
}

fn cmd_playlist_prev(ctx: &mut CommandCtx, session: &mut Session) {
    playlist_next_prev(ctx, session, -1);
}

fn cmd_playlist_clear(_ctx: &mut CommandCtx, session: &mut Session) {
    session.playback.clear_except_current();
    session.event(PlayerEvent::ChangePlaylist);
}

fn cmd_playlist_remove(ctx: &mut CommandCtx, session: &mut Session) {
    let index = match usize::try_from(ctx.arg_i64(0)) {
        Ok(index) => Some(index),
        Err(_) => session.playback.current,
    };
    let Some(index) = index.filter(|i| *i < session.playback.playlist.len()) else {
        ctx.fail_silently();
        return;
    };

    if session.playback.current != Some(index) {
        session.playback.remove(index);
        session.event(PlayerEvent::ChangePlaylist);
        return;
    }

    // Removing the playing entry moves on to the one after it
    if index + 1 < session.playback.playlist.len() {
        player::end_file(session);
        session.playback.remove(index);
        session.event(PlayerEvent::ChangePlaylist);
        player::start_file(session, index, None);
    } else {
        player::end_playback(session);
        session.playback.remove(index);
        session.event(PlayerEvent::ChangePlaylist);
    }
}

fn cmd_playlist_move(ctx: &mut CommandCtx, session: &mut Session) {
    let Ok(from) = usize::try_from(ctx.arg_i64(0)) else {
        ctx.fail_silently();
        return;
    };
    // A negative or out of range destination means the end of the playlist
    let to = usize::try_from(ctx.arg_i64(1)).unwrap_or(usize::MAX);
    if !session.playback.move_entry(from, to) {
        ctx.fail_silently();
        return;
    }
    session.event(PlayerEvent::ChangePlaylist);
}

fn cmd_playlist_shuffle(_ctx: &mut CommandCtx, session: &mut Session) {
    session.playback.shuffle(&mut rand::thread_rng());
    session.event(PlayerEvent::ChangePlaylist);
}

/// Entries of a playlist file: one path per line, `#` starts a comment line
fn parse_playlist(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

fn cmd_loadlist(ctx: &mut CommandCtx, session: &mut Session) {
    let path = ctx.arg_str(0).to_string();
    let append = ctx.arg_str(1) == "append";
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Unable to load playlist {}: {}", path, e);
            ctx.fail(CommandError::Failed(format!("unable to load playlist {}: {}", path, e)));
            return;
        }
    };
    let entries = parse_playlist(&text);
    debug!("Loaded {} entries from playlist {}", entries.len(), path);

    if !append {
        player::end_file(session);
        session.playback.current = None;
        session.playback.playlist.clear();
    }
    let first = session.playback.playlist.len();
    for entry in &entries {
        session.playback.append(entry);
    }
    session.event(PlayerEvent::ChangePlaylist);

    if !append {
        if entries.is_empty() {
            player::end_playback(session);
        } else {
            player::start_file(session, first, None);
        }
    }
}

fn cmd_stop(_ctx: &mut CommandCtx, session: &mut Session) {
    player::end_playback(session);
    session.playback.playlist.clear();
    session.event(PlayerEvent::ChangePlaylist);
}

fn cmd_seek(ctx: &mut CommandCtx, session: &mut Session) {
    let amount = ctx.arg_f64(0) * ctx.cmd.scale;
    let mode = ctx.arg_str(1).to_string();
    let playback = &session.playback;
    let duration = playback.duration();

    let target = match (mode.as_str(), duration) {
        ("absolute", Some(d)) if amount < 0.0 => Some((d + amount).max(0.0)),
        ("absolute", _) => Some(amount),
        ("absolute-percent", Some(d)) => Some(d * amount / 100.0),
        ("relative-percent", Some(d)) => Some(playback.time_pos + d * amount / 100.0),
        ("relative", _) => Some(playback.time_pos + amount),
        _ => None,
    };
    match target.map(|t| player::seek(session, t)) {
        Some(Ok(())) => {}
        _ => ctx.fail_silently(),
    }
}

fn cmd_revert_seek(ctx: &mut CommandCtx, session: &mut Session) {
    if !session.playback.is_playing() {
        ctx.fail_silently();
        return;
    }
    let playback = &mut session.playback;
    if ctx.arg_str(0) == "mark" {
        playback.marked_pos = Some(playback.time_pos);
        return;
    }
    // A mark wins over the last seek and is used up by the revert
    let Some(pos) = playback.marked_pos.take().or(playback.last_seek_pos) else {
        ctx.fail_silently();
        return;
    };
    if player::seek(session, pos).is_err() {
        ctx.fail_silently();
    }
}

fn quit(ctx: &CommandCtx, session: &mut Session) {
    let code = i32::try_from(ctx.arg_i64(0)).unwrap_or(i32::MAX);
    info!("Quit requested (exit code {})", code);
    session.quit = Some(code);
    player::end_playback(session);
}

fn cmd_quit(ctx: &mut CommandCtx, session: &mut Session) {
    quit(ctx, session);
}

fn cmd_quit_watch_later(ctx: &mut CommandCtx, session: &mut Session) {
    write_watch_later(session);
    quit(ctx, session);
}

fn cmd_apply_profile(ctx: &mut CommandCtx, session: &mut Session) {
    let name = ctx.arg_str(0).to_string();
    if let Err(e) = bridge::apply_profile(session, &name) {
        ctx.fail(CommandError::Failed(format!("profile '{}': {}", name, e)));
    }
}

fn cmd_write_watch_later_config(_ctx: &mut CommandCtx, session: &mut Session) {
    write_watch_later(session);
}

/// Store the resume record of the playing file
fn write_watch_later(session: &mut Session) {
    let Some(path) = session.playback.file.as_ref().map(|f| f.path.clone()) else {
        return;
    };
    let mut record = session.options.runtime_changed();
    record.push(("start".to_string(), format!("{:.6}", session.playback.time_pos)));
    debug!("Saving resume record for '{}' ({} entries)", path, record.len());
    session.watch_later.insert(path, record);
}

// ============================================================================
// Client commands
// ============================================================================

fn cmd_hook_add(ctx: &mut CommandCtx, session: &mut Session) {
    let Some(sender) = ctx.sender() else {
        ctx.fail(CommandError::ClientOnly(CLIENT_ONLY));
        return;
    };
    let name = ctx.arg_str(0).to_string();
    let user_id = ctx.arg_i64(1) as u64;
    let priority = i32::try_from(ctx.arg_i64(2)).unwrap_or(0);
    session.hooks.add(sender, &name, user_id, priority, true);
}

fn cmd_hook_ack(ctx: &mut CommandCtx, session: &mut Session) {
    let Some(sender) = ctx.sender() else {
        ctx.fail(CommandError::ClientOnly(CLIENT_ONLY));
        return;
    };
    let seq = HookSeq::new(ctx.arg_i64(0) as u64);
    let clients = std::sync::Arc::clone(session.clients());
    if let Err(e) = session.hooks.continue_hook(clients.as_ref(), sender, seq) {
        ctx.fail(CommandError::Failed(e.to_string()));
        return;
    }
    player::check_pending_hooks(session);
    session.wakeup();
}

fn string_args(ctx: &CommandCtx, skip: usize) -> Vec<String> {
    ctx.args()
        .iter()
        .skip(skip)
        .filter_map(|a| a.as_str().map(str::to_string))
        .collect()
}

fn cmd_script_message(ctx: &mut CommandCtx, session: &mut Session) {
    session
        .clients()
        .broadcast(ClientEvent::ClientMessage(string_args(ctx, 0)));
}

fn cmd_script_message_to(ctx: &mut CommandCtx, session: &mut Session) {
    let target = ctx.arg_str(0).to_string();
    let message = ClientEvent::ClientMessage(string_args(ctx, 1));
    let clients = session.clients();
    let sent = clients
        .find_client(&target)
        .is_some_and(|id| clients.send_event(id, 0, message).is_ok());
    if !sent {
        debug!("Can't find script '{}' to send message to.", target);
        ctx.fail(CommandError::Failed(format!("no client named '{}'", target)));
    }
}

fn cmd_script_binding(ctx: &mut CommandCtx, session: &mut Session) {
    let name = ctx.arg_str(0).to_string();
    if name.is_empty() {
        ctx.fail_silently();
        return;
    }
    // "client/binding" addresses one client, a bare binding every client
    let (target, binding) = match name.split_once('/') {
        Some((target, binding)) => (Some(target), binding),
        None => (None, name.as_str()),
    };
    let message = ClientEvent::ClientMessage(vec![
        "key-binding".into(),
        binding.into(),
        "p-".into(),
        String::new(),
    ]);
    let clients = session.clients();
    let Some(target) = target else {
        clients.broadcast(message);
        return;
    };
    let sent = clients
        .find_client(target)
        .is_some_and(|id| clients.send_event(id, 0, message).is_ok());
    if !sent {
        debug!("Can't find script '{}' when handling input.", target);
        ctx.fail(CommandError::Failed(format!("no client named '{}'", target)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::control::Core;
    use crate::error::CoreError;
    use crate::playback::MediaInfo;
    use rstest::rstest;

    fn core() -> Core {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.register_media("a.mkv", MediaInfo::new().with_duration(100.0).with_tag("title", "A"));
        core.register_media("b.mkv", MediaInfo::new().with_duration(50.0));
        core
    }

    fn get(core: &Core, name: &str) -> Node {
        core.get_property(name).unwrap()
    }

    #[rstest]
    #[case("set volume 50", "volume", Node::Double(50.0))]
    #[case("add volume -10", "volume", Node::Double(90.0))]
    #[case("multiply speed 2", "speed", Node::Double(2.0))]
    #[case("cycle pause", "pause", Node::Flag(true))]
    #[case("cycle osd-level down", "osd-level", Node::Int(0))]
    #[case("cycle-values framedrop no decoder", "framedrop", Node::from("no"))]
    #[case("cycle-values !reverse idle no yes once", "idle", Node::from("once"))]
    fn test_property_commands(#[case] command: &str, #[case] name: &str, #[case] expected: Node) {
        let core = core();
        core.command_blocking(command).unwrap();
        assert_eq!(get(&core, name), expected);
    }

    #[test]
    fn test_cycle_values_advances_and_wraps() {
        let core = core();
        core.command_blocking("cycle-values keep-open no yes always").unwrap();
        assert_eq!(get(&core, "keep-open"), Node::from("yes"));
        core.command_blocking("cycle-values keep-open no yes always").unwrap();
        core.command_blocking("cycle-values keep-open no yes always").unwrap();
        assert_eq!(get(&core, "keep-open"), Node::from("no"));
    }

    #[test]
    fn test_cycle_values_without_values() {
        let core = core();
        assert!(core.command_blocking("cycle-values pause").is_err());
    }

    #[test]
    fn test_unknown_property_is_reported_on_osd() {
        let core = core();
        let err = core.command_blocking("set nonexistent 1").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Command(CommandError::Property {
                source: PropertyError::Unknown,
                ..
            })
        ));
        core.with_session(|s| {
            assert_eq!(s.osd.last().unwrap().text, "Unknown property: 'nonexistent'");
        });
    }

    #[test]
    fn test_repeated_add_skips_discrete_properties() {
        let core = core();
        core.with_session(|s| {
            let table = std::sync::Arc::clone(s.commands());
            let cmd = crate::command::parse_command(&table, "add pause 1", None)
                .unwrap()
                .with_repeated(true);
            crate::command::run_command(s, cmd, None);
            assert_eq!(s.options.value("pause").unwrap(), Node::Flag(false));

            let cmd = crate::command::parse_command(&table, "add volume -1", None)
                .unwrap()
                .with_repeated(true);
            crate::command::run_command(s, cmd, None);
            assert_eq!(s.options.value("volume").unwrap(), Node::Double(99.0));
        });
    }

    #[test]
    fn test_scaled_add() {
        let core = core();
        core.with_session(|s| {
            let table = std::sync::Arc::clone(s.commands());
            let cmd = crate::command::parse_command(&table, "add volume 10", None)
                .unwrap()
                .with_scale(0.5, 1);
            crate::command::run_command(s, cmd, None);
            assert_eq!(s.options.value("volume").unwrap(), Node::Double(105.0));

            // Non-scalable types step once per unit instead
            let cmd = crate::command::parse_command(&table, "add osd-level 1", None)
                .unwrap()
                .with_scale(0.5, 2);
            crate::command::run_command(s, cmd, None);
            assert_eq!(s.options.value("osd-level").unwrap(), Node::Int(3));
        });
    }

    #[rstest]
    #[case("change-list display-tags clr \"\"", 0)]
    #[case("change-list display-tags append Composer", 1)]
    fn test_change_list(#[case] command: &str, #[case] extra: usize) {
        let core = core();
        core.command_blocking("change-list display-tags clr \"\"").unwrap();
        if extra > 0 {
            core.command_blocking(command).unwrap();
        }
        let tags = get(&core, "display-tags").to_string_list().unwrap();
        assert_eq!(tags.len(), extra);
    }

    #[rstest]
    #[case("change-list nonexistent append x", "Unknown option: 'nonexistent'")]
    #[case("change-list display-tags shuffle x", "Unknown action: 'shuffle'")]
    #[case("change-list volume append 3", "Unknown action: 'append'")]
    fn test_change_list_errors(#[case] command: &str, #[case] osd: &str) {
        let core = core();
        assert!(core.command_blocking(command).is_err());
        core.with_session(|s| assert_eq!(s.osd.messages()[0].text, osd));
    }

    #[test]
    fn test_expand_text_result() {
        let core = core();
        let result = core.command_blocking("expand-text \"vol=${volume}\"").unwrap();
        assert_eq!(result, Node::from("vol=100.00"));
    }

    #[test]
    fn test_show_text_respects_level() {
        let core = core();
        core.command_blocking("show-text hidden 100 3").unwrap();
        core.command_blocking("show-text shown 100 1").unwrap();
        core.with_session(|s| {
            let texts: Vec<&str> = s.osd.messages().iter().map(|m| m.text.as_str()).collect();
            assert_eq!(texts, vec!["shown"]);
        });
    }

    #[test]
    fn test_show_text_named_level() {
        let core = core();
        let cmd = Node::map([
            ("name", Node::from("show-text")),
            ("text", Node::from("hello")),
            ("level", Node::Int(3)),
        ]);
        core.command_node(&cmd).unwrap();
        core.with_session(|s| assert!(s.osd.messages().is_empty()));
    }

    #[test]
    fn test_loadfile_modes() {
        let core = core();
        core.command_blocking("loadfile a.mkv append").unwrap();
        assert_eq!(get(&core, "playlist-count"), Node::Int(1));
        assert_eq!(get(&core, "idle-active"), Node::Flag(true));

        core.command_blocking("loadfile b.mkv append-play").unwrap();
        assert_eq!(get(&core, "path"), Node::from("b.mkv"));

        core.command_blocking("loadfile a.mkv").unwrap();
        assert_eq!(get(&core, "playlist-count"), Node::Int(1));
        assert_eq!(get(&core, "path"), Node::from("a.mkv"));
    }

    #[test]
    fn test_playlist_navigation() {
        let core = core();
        core.command_blocking("loadfile a.mkv; loadfile b.mkv append").unwrap();
        core.command_blocking("playlist-next").unwrap();
        assert_eq!(get(&core, "path"), Node::from("b.mkv"));
        assert!(core.command_blocking("playlist-next weak").is_err());
        core.command_blocking("playlist-prev").unwrap();
        assert_eq!(get(&core, "path"), Node::from("a.mkv"));

        core.command_blocking("playlist-remove current").unwrap();
        assert_eq!(get(&core, "path"), Node::from("b.mkv"));
        core.command_blocking("playlist-next force").unwrap();
        assert_eq!(get(&core, "idle-active"), Node::Flag(true));
    }

    #[rstest]
    #[case("seek 10", 10.0)]
    #[case("seek 30 absolute", 30.0)]
    #[case("seek -20 absolute", 80.0)]
    #[case("seek 50 absolute-percent", 50.0)]
    #[case("seek 1:00 absolute", 60.0)]
    fn test_seek(#[case] command: &str, #[case] expected: f64) {
        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        core.command_blocking(command).unwrap();
        assert_eq!(get(&core, "time-pos"), Node::Double(expected));
    }

    #[test]
    fn test_revert_seek() {
        let core = core();
        assert!(core.command_blocking("seek 10").is_err());
        core.command_blocking("loadfile a.mkv").unwrap();
        assert!(core.command_blocking("revert-seek").is_err());
        core.command_blocking("seek 40 absolute").unwrap();
        core.command_blocking("revert-seek").unwrap();
        assert_eq!(get(&core, "time-pos"), Node::Double(0.0));
    }

    #[test]
    fn test_revert_seek_mark() {
        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        core.command_blocking("seek 20 absolute").unwrap();
        core.command_blocking("revert-seek mark").unwrap();
        assert_eq!(get(&core, "time-pos"), Node::Double(20.0));

        core.command_blocking("seek 70 absolute").unwrap();
        core.command_blocking("seek 90 absolute").unwrap();
        core.command_blocking("revert-seek").unwrap();
        assert_eq!(get(&core, "time-pos"), Node::Double(20.0));

        // The mark is used up; the next revert undoes the revert
        core.command_blocking("revert-seek").unwrap();
        assert_eq!(get(&core, "time-pos"), Node::Double(90.0));
    }

    fn playlist_names(core: &Core) -> Vec<String> {
        core.with_session(|s| s.playback.playlist.iter().map(|e| e.filename.clone()).collect())
    }

    #[test]
    fn test_playlist_move() {
        let core = core();
        core.command_blocking("loadfile a.mkv; loadfile b.mkv append; loadfile c.mkv append")
            .unwrap();
        core.command_blocking("playlist-move 0 3").unwrap();
        assert_eq!(playlist_names(&core), ["b.mkv", "c.mkv", "a.mkv"]);
        assert_eq!(get(&core, "playlist-pos"), Node::Int(2));
        assert_eq!(get(&core, "path"), Node::from("a.mkv"));

        core.command_blocking("playlist-move 1 0").unwrap();
        assert_eq!(playlist_names(&core), ["c.mkv", "b.mkv", "a.mkv"]);
        assert!(core.command_blocking("playlist-move 5 0").is_err());
    }

    #[test]
    fn test_playlist_shuffle() {
        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        for i in 0..20 {
            core.command_blocking(&format!("loadfile {i}.mkv append")).unwrap();
        }
        let before = playlist_names(&core);
        core.command_blocking("playlist-shuffle").unwrap();

        let mut after = playlist_names(&core);
        let pos = get(&core, "playlist-pos").as_i64().unwrap() as usize;
        assert_eq!(after[pos], "a.mkv");
        assert_eq!(get(&core, "path"), Node::from("a.mkv"));
        after.sort();
        let mut sorted = before;
        sorted.sort();
        assert_eq!(after, sorted);
    }

    #[test]
    fn test_loadlist() {
        let path = std::env::temp_dir().join(format!("playcore-loadlist-{}.m3u", std::process::id()));
        fs::write(&path, "#EXTM3U\nb.mkv\n\n  a.mkv  \n# comment\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();
        let loadlist = |flags: &str| {
            Node::map([
                ("name", Node::from("loadlist")),
                ("url", Node::from(path_str.as_str())),
                ("flags", Node::from(flags)),
            ])
        };

        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        core.command_node(&loadlist("append")).unwrap();
        assert_eq!(playlist_names(&core), ["a.mkv", "b.mkv", "a.mkv"]);
        assert_eq!(get(&core, "playlist-pos"), Node::Int(0));

        core.command_node(&loadlist("replace")).unwrap();
        assert_eq!(playlist_names(&core), ["b.mkv", "a.mkv"]);
        assert_eq!(get(&core, "path"), Node::from("b.mkv"));

        fs::remove_file(&path).unwrap();
        assert!(core.command_node(&loadlist("replace")).is_err());
        assert_eq!(playlist_names(&core), ["b.mkv", "a.mkv"]);
    }

    #[test]
    fn test_quit_watch_later() {
        let core = core();
        core.command_blocking("loadfile a.mkv; seek 12 absolute").unwrap();
        core.command_blocking("quit-watch-later 3").unwrap();
        core.with_session(|s| {
            assert_eq!(s.quit, Some(3));
            let record = &s.watch_later["a.mkv"];
            assert!(record.contains(&("start".to_string(), "12.000000".to_string())));
        });
    }

    #[test]
    fn test_script_binding() {
        let core = core();
        let osc = core.connect_client("osc");
        let stats = core.connect_client("stats");
        let binding = |name: &str| {
            ClientEvent::ClientMessage(vec!["key-binding".into(), name.into(), "p-".into(), String::new()])
        };

        core.command_blocking("script-binding stats/display-page-1").unwrap();
        assert_eq!(stats.try_recv().unwrap().event, binding("display-page-1"));
        assert!(osc.try_recv().is_none());

        core.command_blocking("script-binding visibility").unwrap();
        assert_eq!(osc.try_recv().unwrap().event, binding("visibility"));
        assert_eq!(stats.try_recv().unwrap().event, binding("visibility"));

        assert!(core.command_blocking("script-binding nobody/toggle").is_err());
    }

    #[test]
    fn test_stop_and_quit() {
        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        core.command_blocking("stop").unwrap();
        assert_eq!(get(&core, "playlist-count"), Node::Int(0));

        core.command_blocking("quit 4").unwrap();
        core.with_session(|s| assert_eq!(s.quit, Some(4)));
    }

    #[test]
    fn test_hook_commands_require_client() {
        let core = core();
        let err = core.command_blocking("hook-add on_load 1 0").unwrap_err();
        assert_eq!(err.to_string(), CLIENT_ONLY);
    }

    #[test]
    fn test_script_message_to() {
        let core = core();
        let osc = core.connect_client("osc");
        core.command_blocking("script-message-to osc hello world").unwrap();
        assert_eq!(
            osc.try_recv().unwrap().event,
            ClientEvent::ClientMessage(vec!["hello".into(), "world".into()])
        );
        assert!(core.command_blocking("script-message-to nobody hi").is_err());
    }

    #[test]
    fn test_write_watch_later_config() {
        let core = core();
        core.command_blocking("loadfile a.mkv").unwrap();
        core.command_blocking("set volume 30").unwrap();
        core.command_blocking("write-watch-later-config").unwrap();
        core.with_session(|s| {
            let record = &s.watch_later["a.mkv"];
            assert!(record.contains(&("volume".to_string(), "30.000000".to_string())));
            assert!(record.iter().any(|(k, _)| k == "start"));
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_subprocess_capture() {
        let core = core();
        let cmd = Node::map([
            ("name", Node::from("subprocess")),
            ("args", Node::string_list(&["echo", "hi"])),
            ("playback_only", Node::Flag(false)),
            ("capture_size", Node::Int(1024)),
            ("capture_stdout", Node::Flag(true)),
        ]);
        let result = core.command_node(&cmd).unwrap();
        assert_eq!(result.get("status"), Some(&Node::Int(0)));
        assert_eq!(result.get("stdout"), Some(&Node::from("hi\n")));
        assert_eq!(result.get("killed_by_us"), Some(&Node::Flag(false)));
    }

    #[test]
    fn test_subprocess_missing_program() {
        let core = core();
        let cmd = Node::map([
            ("name", Node::from("subprocess")),
            ("args", Node::string_list(&["/nonexistent/program"])),
        ]);
        let result = core.command_node(&cmd).unwrap();
        assert_eq!(result.get("status"), Some(&Node::Int(SUBPROCESS_EINIT)));
        assert_eq!(result.get("error_string"), Some(&Node::from("init")));
    }
}

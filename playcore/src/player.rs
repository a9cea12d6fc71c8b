//! Playback lifecycle
//!
//! Drives the in-memory `Playback` through file start, the `on_load` hook,
//! load completion, seeks, pause changes and file end. Every transition
//! raises the matching `PlayerEvent`, so observers of event-driven
//! properties are woken.
//!
//! # File start
//!
//! ```text
//! start_file ─► END_FILE of previous file ─► START_FILE ─► hook "on_load"
//!                                                            │
//!                 handlers acknowledged (check_pending_hooks)│
//!                                                            ▼
//!                                   FILE_LOADED ◄── finish_load
//! ```

use std::sync::Arc;

use option_store::{Node, SetFlags};
use tracing::{debug, info};

use crate::bridge;
use crate::command::CommandCtx;
use crate::error::{CommandError, PropertyError, PropertyResult};
use crate::notify::PlayerEvent;
use crate::playback::LoadedFile;
use crate::session::{PendingLoad, Session};

/// Hook run before a file is opened
pub const HOOK_ON_LOAD: &str = "on_load";

/// Start playing a playlist entry, ending the current file first
///
/// `ctx` is completed once the file finished loading, or as failed if the
/// entry does not exist or loading was aborted.
pub fn start_file(session: &mut Session, index: usize, ctx: Option<CommandCtx>) {
    if index >= session.playback.playlist.len() {
        if let Some(mut ctx) = ctx {
            ctx.fail(CommandError::Failed(format!("playlist entry {} does not exist", index)));
            ctx.complete(session);
        }
        return;
    }

    end_file(session);
    session.playback.current = Some(index);
    info!("Playing: {}", session.playback.playlist[index].filename);
    session.event(PlayerEvent::StartFile);

    let clients = Arc::clone(session.clients());
    if session.hooks.start(clients.as_ref(), HOOK_ON_LOAD) {
        debug!("Waiting for '{}' hook handlers", HOOK_ON_LOAD);
        session.pending_load = Some(PendingLoad { index, ctx });
        return;
    }
    finish_load(session, index, ctx);
}

/// Finish a pending load once the `on_load` hook completed
///
/// Returns true if a load was finished.
pub fn check_pending_hooks(session: &mut Session) -> bool {
    if session.pending_load.is_none() {
        return false;
    }
    let clients = Arc::clone(session.clients());
    if !session.hooks.test_completion(clients.as_ref(), HOOK_ON_LOAD) {
        return false;
    }
    match session.pending_load.take() {
        Some(pending) => {
            finish_load(session, pending.index, pending.ctx);
            true
        }
        None => false,
    }
}

fn finish_load(session: &mut Session, index: usize, ctx: Option<CommandCtx>) {
    let Some(entry) = session.playback.playlist.get(index).cloned() else {
        if let Some(mut ctx) = ctx {
            ctx.fail(CommandError::Failed("playlist entry removed while loading".into()));
            ctx.complete(session);
        }
        return;
    };

    let info = session.playback.probe(&entry.filename);
    session.playback.file = Some(LoadedFile {
        path: entry.filename,
        duration: info.duration,
        tags: info.tags,
    });
    session.playback.time_pos = 0.0;
    session.playback.eof_reached = false;
    session.event(PlayerEvent::FileLoaded);
    session.event(PlayerEvent::PlaybackRestart);

    if let Some(ctx) = ctx {
        ctx.complete(session);
    }
}

/// End the current file without entering idle mode
pub fn end_file(session: &mut Session) {
    if let Some(pending) = session.pending_load.take() {
        if let Some(mut ctx) = pending.ctx {
            ctx.fail(CommandError::Failed("loading aborted".into()));
            ctx.complete(session);
        }
    }
    if session.playback.current.is_none() {
        return;
    }

    session.playback.stop_requested = true;
    let aborted = session.aborts.abort_playback();
    if aborted > 0 {
        debug!("Aborted {} commands coupled to playback", aborted);
    }
    session.event(PlayerEvent::EndFile);
    bridge::restore_file_local(session);
    session.playback.unload();
}

/// End playback and go idle
pub fn end_playback(session: &mut Session) {
    let was_active = session.playback.current.is_some() || session.pending_load.is_some();
    end_file(session);
    session.playback.current = None;
    if was_active {
        info!("Playback ended, entering idle mode");
        session.event(PlayerEvent::Idle);
    }
}

/// Playlist index `dir` entries away from the current one
pub fn playlist_neighbor(session: &Session, dir: i64) -> Option<usize> {
    let len = session.playback.playlist.len() as i64;
    let target = match session.playback.current {
        Some(current) => current as i64 + dir,
        None if dir > 0 => 0,
        None => len - 1,
    };
    (0..len).contains(&target).then_some(target as usize)
}

/// Seek to an absolute position, remembering the old one for `revert-seek`
pub fn seek(session: &mut Session, target: f64) -> PropertyResult<()> {
    if !session.playback.is_playing() {
        return Err(PropertyError::Unavailable);
    }
    session.playback.last_seek_pos = Some(session.playback.time_pos);
    session.playback.seeking = true;
    session.playback.seek_to(target);
    session.event(PlayerEvent::Seek);
    session.playback.seeking = false;
    session.event(PlayerEvent::PlaybackRestart);
    Ok(())
}

/// Write the `pause` option and raise pause/unpause events while playing
pub fn set_pause_state(session: &mut Session, pause: bool) -> PropertyResult<()> {
    let outcome = bridge::write_option(session, "pause", Node::Flag(pause), SetFlags::RUNTIME)?;
    if outcome.changed && session.playback.is_playing() {
        session.event(if pause { PlayerEvent::Pause } else { PlayerEvent::Unpause });
        session.event(PlayerEvent::CoreIdle);
    }
    Ok(())
}

/// Nothing is playing, or the current file is being stopped
pub fn playback_aborted(session: &Session) -> bool {
    session.playback.current.is_none() || session.playback.stop_requested
}

pub fn is_paused(session: &Session) -> bool {
    session
        .options
        .value("pause")
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Advance the playback clock; handles end of file
pub fn advance_clock(session: &mut Session, seconds: f64) {
    if is_paused(session) || !session.playback.is_playing() {
        return;
    }
    let eof = session.playback.advance(seconds);
    session.event(PlayerEvent::Tick);
    if !eof {
        return;
    }

    let keep_open = session
        .options
        .value("keep-open")
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    if keep_open != "no" {
        debug!("End of file reached, keeping file open");
        return;
    }
    match playlist_neighbor(session, 1) {
        Some(next) => start_file(session, next, None),
        None => end_playback(session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::control::Core;
    use crate::playback::MediaInfo;

    fn core_with_playlist() -> Core {
        let core = Core::new(CoreConfig::default()).unwrap();
        core.register_media("a.mkv", MediaInfo::new().with_duration(10.0));
        core.register_media("b.mkv", MediaInfo::new().with_duration(5.0));
        core.with_session(|s| {
            s.playback.append("a.mkv");
            s.playback.append("b.mkv");
        });
        core
    }

    #[test]
    fn test_start_file_without_hooks_loads_immediately() {
        let core = core_with_playlist();
        core.with_session(|s| {
            start_file(s, 0, None);
            assert!(s.playback.is_playing());
            assert_eq!(s.playback.duration(), Some(10.0));
        });
    }

    #[test]
    fn test_eof_advances_to_next_then_idles() {
        let core = core_with_playlist();
        core.with_session(|s| {
            start_file(s, 0, None);
            advance_clock(s, 11.0);
            assert_eq!(s.playback.current, Some(1));
            advance_clock(s, 6.0);
            assert!(s.playback.is_idle());
            assert!(!s.playback.is_playing());
        });
    }

    #[test]
    fn test_paused_clock_does_not_move() {
        let core = core_with_playlist();
        core.with_session(|s| {
            start_file(s, 0, None);
            set_pause_state(s, true).unwrap();
            advance_clock(s, 3.0);
            assert_eq!(s.playback.time_pos, 0.0);
        });
    }

    #[test]
    fn test_seek_requires_file() {
        let core = core_with_playlist();
        core.with_session(|s| {
            assert_eq!(seek(s, 3.0), Err(PropertyError::Unavailable));
            start_file(s, 0, None);
            seek(s, 3.0).unwrap();
            assert_eq!(s.playback.time_pos, 3.0);
            assert_eq!(s.playback.last_seek_pos, Some(0.0));
        });
    }
}

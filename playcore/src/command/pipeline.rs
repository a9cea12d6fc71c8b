//! Command execution
//!
//! `run_command` takes a validated `Command` through abort registration,
//! property expansion and dispatch to its handler. Every path ends in
//! exactly one `CommandCtx::complete`.
//!
//! # List commands
//!
//! A `list` runs its entries in order. Entries flagged `async` are started
//! and not waited for; every other entry must complete before the next one
//! starts. Most entries complete while `run_command` is still on the stack,
//! so the driver records that case and keeps looping instead of recursing:
//!
//! ```text
//! continue_list ─► run_command(sub) ─► ... ─► on_sub_completion
//!      ▲                                          │
//!      │          same thread, still inside run_command?
//!      │              yes: set completed_recursive, return
//!      │              no:  call continue_list from here
//!      └── loop while completed_recursive
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use option_store::Node;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Command, CommandCtx, CommandHandler, CommandOutcome, Completion, ExecMode};
use crate::abort::AbortEntry;
use crate::error::{CommandError, ExpandError, PoolError};
use crate::property::expand::expand_string;
use crate::session::Session;

/// Run a command; `on_completion` is called exactly once when it ends
pub fn run_command(session: &mut Session, cmd: Command, on_completion: Option<Completion>) {
    let def = Arc::clone(&cmd.def);
    let mut ctx = CommandCtx::new(cmd, on_completion);

    if ctx.cmd.is_repeated && !def.allow_auto_repeat && !ctx.cmd.repeatable {
        debug!("Dropping command '{}' from auto-repeated key.", ctx.cmd);
        ctx.fail_silently();
        ctx.complete(session);
        return;
    }

    if def.can_abort {
        let entry = AbortEntry::new();
        entry.set_coupled_to_playback(def.abort_on_playback_end);
        session.aborts.register(Arc::clone(&entry));
        ctx.abort = Some(entry);
    }

    if def.is_ignore {
        trace!("Run command: {}", ctx.cmd);
    } else {
        debug!("Run command: {} ({} args, {:?})", ctx.cmd, ctx.cmd.args.len(), ctx.cmd.exec);
    }

    if ctx.cmd.expand_properties {
        if let Err(e) = expand_arguments(session, &mut ctx.cmd) {
            ctx.fail(e.into());
            ctx.complete(session);
            return;
        }
    }

    match def.handler {
        CommandHandler::Sync(handler) => {
            handler(&mut ctx, session);
            ctx.complete(session);
        }
        CommandHandler::Async(handler) => handler(ctx, session),
        CommandHandler::Worker(handler) => submit_worker(session, ctx, handler),
    }
}

/// Expand `${...}` in every string-typed argument
fn expand_arguments(session: &mut Session, cmd: &mut Command) -> Result<(), ExpandError> {
    let def = Arc::clone(&cmd.def);
    for (index, arg) in cmd.args.iter_mut().enumerate() {
        if !def.arg_spec(index).is_some_and(|spec| spec.ty.is_string()) {
            continue;
        }
        if let Node::String(text) = arg {
            if text.contains('$') {
                *text = expand_string(session, text)?;
            }
        }
    }
    Ok(())
}

fn submit_worker(session: &mut Session, ctx: CommandCtx, handler: super::WorkerHandler) {
    // The job owns the context only once it runs; a rejected submission
    // leaves it here to be completed as failed.
    let slot = Arc::new(Mutex::new(Some(ctx)));
    let job_slot = Arc::clone(&slot);
    let handle = session.handle();

    let job = Box::new(move || {
        let Some(core) = handle.upgrade() else {
            return;
        };
        let mut guard = core.lock();
        let Some(mut ctx) = job_slot.lock().take() else {
            return;
        };
        handler(&mut ctx, &mut guard);
        ctx.complete(&mut guard);
        guard.outstanding_async = guard.outstanding_async.saturating_sub(1);
        guard.wakeup();
    });

    session.outstanding_async += 1;
    let submitted = match session.workers.as_ref() {
        Some(workers) => workers.submit(job),
        None => Err(PoolError::ShutDown),
    };
    if let Err(e) = submitted {
        session.outstanding_async = session.outstanding_async.saturating_sub(1);
        if let Some(mut ctx) = slot.lock().take() {
            debug!("Command '{}' rejected by worker pool: {}", ctx.cmd.name, e);
            ctx.fail(CommandError::Pool(e));
            ctx.complete(session);
        }
    }
}

// ============================================================================
// List driver
// ============================================================================

struct ListState {
    pending: VecDeque<Command>,
    parent: Option<CommandCtx>,
    /// Thread currently inside `run_command` for a sequential entry
    current: Option<ThreadId>,
    completed_recursive: bool,
    failed: bool,
}

type SharedList = Arc<Mutex<ListState>>;

/// Handler of the internal `list` command
pub(crate) fn cmd_list(mut ctx: CommandCtx, session: &mut Session) {
    let pending: VecDeque<Command> = std::mem::take(&mut ctx.cmd.sub_commands).into();
    debug!("Running command list with {} entries", pending.len());
    let list = Arc::new(Mutex::new(ListState {
        pending,
        parent: Some(ctx),
        current: None,
        completed_recursive: false,
        failed: false,
    }));
    continue_list(&list, session);
}

fn continue_list(list: &SharedList, session: &mut Session) {
    loop {
        // The state lock is never held across run_command
        let next = list.lock().pending.pop_front();
        let Some(sub) = next else {
            break;
        };

        if sub.exec == ExecMode::Async {
            run_command(session, sub, None);
            continue;
        }

        {
            let mut state = list.lock();
            state.completed_recursive = false;
            state.current = Some(thread::current().id());
        }
        let on_done = Arc::clone(list);
        run_command(
            session,
            sub,
            Some(Box::new(move |session: &mut Session, outcome: CommandOutcome| {
                on_sub_completion(&on_done, session, outcome);
            })),
        );

        let mut state = list.lock();
        state.current = None;
        if !state.completed_recursive {
            // Resumed by on_sub_completion once the entry finishes
            return;
        }
    }

    let (parent, failed) = {
        let mut state = list.lock();
        (state.parent.take(), state.failed)
    };
    if let Some(mut parent) = parent {
        if failed {
            parent.fail_silently();
        }
        parent.complete(session);
    }
}

fn on_sub_completion(list: &SharedList, session: &mut Session, outcome: CommandOutcome) {
    let recursive = {
        let mut state = list.lock();
        if !outcome.success {
            state.failed = true;
        }
        if state.current == Some(thread::current().id()) {
            state.completed_recursive = true;
            true
        } else {
            false
        }
    };
    if !recursive {
        continue_list(list, session);
    }
}

//! Per-invocation command context
//!
//! A `CommandCtx` carries one command from submission to completion.
//! `complete` consumes the context, so a command can only be completed
//! once; dropping a context without completing it is logged.

use std::sync::Arc;

use option_store::Node;
use tracing::{debug, warn};

use super::Command;
use crate::abort::AbortEntry;
use crate::client::ClientId;
use crate::error::CommandError;
use crate::session::Session;

/// Final state of a command, handed to its completion callback
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub result: Node,
    pub error: Option<CommandError>,
}

impl CommandOutcome {
    pub fn into_result(self) -> Result<Node, CommandError> {
        match (self.success, self.error) {
            (true, _) => Ok(self.result),
            (false, Some(e)) => Err(e),
            (false, None) => Err(CommandError::Failed("command failed".into())),
        }
    }
}

/// Continuation run exactly once, with the core locked, when a command ends
pub type Completion = Box<dyn FnOnce(&mut Session, CommandOutcome) + Send + 'static>;

/// A command in flight
pub struct CommandCtx {
    pub cmd: Command,
    pub success: bool,
    pub result: Node,
    pub error: Option<CommandError>,
    pub abort: Option<Arc<AbortEntry>>,
    on_completion: Option<Completion>,
    completed: bool,
}

impl CommandCtx {
    pub fn new(cmd: Command, on_completion: Option<Completion>) -> Self {
        Self {
            cmd,
            success: true,
            result: Node::None,
            error: None,
            abort: None,
            on_completion,
            completed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.cmd.name
    }

    pub fn args(&self) -> &[Node] {
        &self.cmd.args
    }

    /// Argument `index`, or `Node::None` past the end
    pub fn arg(&self, index: usize) -> &Node {
        self.cmd.args.get(index).unwrap_or(&Node::None)
    }

    pub fn arg_str(&self, index: usize) -> &str {
        self.arg(index).as_str().unwrap_or("")
    }

    pub fn arg_f64(&self, index: usize) -> f64 {
        self.arg(index).as_f64().unwrap_or(0.0)
    }

    pub fn arg_i64(&self, index: usize) -> i64 {
        self.arg(index).as_i64().unwrap_or(0)
    }

    pub fn arg_bool(&self, index: usize) -> bool {
        self.arg(index).as_bool().unwrap_or(false)
    }

    pub fn sender(&self) -> Option<ClientId> {
        self.cmd.sender
    }

    /// Issued from a key binding or the terminal rather than a client
    pub fn is_interactive(&self) -> bool {
        self.cmd.sender.is_none()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|a| a.is_aborted())
    }

    /// Mark the command failed; the first error is kept
    pub fn fail(&mut self, error: CommandError) {
        self.success = false;
        self.error.get_or_insert(error);
    }

    /// Mark the command failed without a specific error
    pub fn fail_silently(&mut self) {
        self.success = false;
    }

    pub fn set_result(&mut self, result: Node) {
        self.result = result;
    }

    /// Finish the command and run its continuation
    ///
    /// Pending change notifications are delivered first, so observers see
    /// the effects of a command before its completion.
    pub fn complete(mut self, session: &mut Session) {
        self.completed = true;
        session.flush_notifications();
        if let Some(abort) = self.abort.take() {
            session.aborts.unregister(&abort);
        }
        debug!("Command '{}' completed (success: {})", self.cmd.name, self.success);
        if self.is_interactive() {
            // Property failures were already shown by the handler
            if let Some(e) = self.error.as_ref().filter(|e| !matches!(e, CommandError::Property { .. })) {
                session.show_osd(&format!("Command '{}' failed: {}", self.cmd.name, e));
            }
        }

        let result = if self.success {
            std::mem::take(&mut self.result)
        } else {
            Node::None
        };
        let outcome = CommandOutcome {
            success: self.success,
            result,
            error: self.error.take(),
        };
        if let Some(on_completion) = self.on_completion.take() {
            on_completion(session, outcome);
        }
    }
}

impl Drop for CommandCtx {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Command '{}' dropped without completion", self.cmd.name);
        }
    }
}

impl std::fmt::Debug for CommandCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCtx")
            .field("cmd", &self.cmd.name)
            .field("success", &self.success)
            .field("result", &self.result)
            .field("completed", &self.completed)
            .finish()
    }
}

//! Hook manager
//!
//! A hook is a named interception point (e.g. `on_load`). Clients register
//! handlers with a priority; when the hook is started, handlers run one at
//! a time in `(priority, seq)` order, each continued by an explicit
//! acknowledgment from its client.
//!
//! # Architecture
//!
//! ```text
//! HookManager
//!     │
//!     └── handlers: Vec<HookHandler>   (sorted by priority, then seq)
//!             │
//!             └── at most one `active` handler per hook type
//!
//! start(type) ──► first handler of type ──► ClientChannel::send_event
//!                        │                        │
//!                        │                 ClientGone: remove, try next
//!                        ▼
//! continue_hook(client, seq) ──► next handler after it, or complete
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::client::{ClientChannel, ClientEvent, ClientId};
use crate::error::HookError;

/// Sequence number identifying one handler registration
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct HookSeq(u64);

impl HookSeq {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HookSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered hook handler
#[derive(Debug, Clone, PartialEq)]
pub struct HookHandler {
    pub client: ClientId,
    pub hook_type: String,
    /// Opaque id chosen by the client, echoed back on invocation
    pub user_id: u64,
    pub priority: i32,
    pub seq: HookSeq,
    /// Registered through the command-based API
    pub legacy: bool,
    pub active: bool,
}

/// Ordered registry of hook handlers
#[derive(Debug, Default)]
pub struct HookManager {
    handlers: Vec<HookHandler>,
    last_seq: u64,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and return its sequence number
    pub fn add(&mut self, client: ClientId, hook_type: &str, user_id: u64, priority: i32, legacy: bool) -> HookSeq {
        if legacy {
            warn!(
                "The old hook API is deprecated! Hook type '{}' registered by {}",
                hook_type, client
            );
        }
        self.last_seq += 1;
        let seq = HookSeq(self.last_seq);
        self.handlers.push(HookHandler {
            client,
            hook_type: hook_type.to_string(),
            user_id,
            priority,
            seq,
            legacy,
            active: false,
        });
        self.handlers.sort_by_key(|h| (h.priority, h.seq));
        debug!("Hook handler {} added for '{}' (priority {})", seq, hook_type, priority);
        seq
    }

    /// Registered handlers in run order
    pub fn handlers(&self) -> &[HookHandler] {
        &self.handlers
    }

    /// The currently running handler of a type
    pub fn active(&self, hook_type: &str) -> Option<&HookHandler> {
        self.handlers
            .iter()
            .find(|h| h.active && h.hook_type == hook_type)
    }

    /// Drop every handler owned by a client
    pub fn remove_client(&mut self, client: ClientId) {
        self.handlers.retain(|h| h.client != client);
    }

    /// Whether processing of a hook type is finished
    ///
    /// An active handler whose client has disappeared is removed and the
    /// hook counts as finished.
    pub fn test_completion(&mut self, clients: &dyn ClientChannel, hook_type: &str) -> bool {
        let Some(index) = self
            .handlers
            .iter()
            .position(|h| h.active && h.hook_type == hook_type)
        else {
            return true;
        };
        let client = self.handlers[index].client;
        if !clients.client_exists(client) {
            warn!("Client {} removed during hook '{}' handling", client, hook_type);
            self.handlers.remove(index);
            return true;
        }
        false
    }

    /// Start processing a hook type by invoking its first handler
    ///
    /// Returns `true` if a handler is now running, `false` if the hook has
    /// no reachable handlers and is already complete.
    pub fn start(&mut self, clients: &dyn ClientChannel, hook_type: &str) -> bool {
        debug!("Starting hook '{}'", hook_type);
        self.run_next(clients, hook_type, 0)
    }

    /// Acknowledge the running handler and run the next one
    ///
    /// Returns whether another handler is now running.
    pub fn continue_hook(
        &mut self,
        clients: &dyn ClientChannel,
        client: ClientId,
        seq: HookSeq,
    ) -> Result<bool, HookError> {
        let index = self
            .handlers
            .iter()
            .position(|h| h.client == client && h.seq == seq)
            .ok_or(HookError::NotFound { seq: seq.0 })?;
        let handler = &mut self.handlers[index];
        if !handler.active {
            return Err(HookError::NotActive { seq: seq.0 });
        }
        handler.active = false;
        let hook_type = handler.hook_type.clone();
        Ok(self.run_next(clients, &hook_type, index + 1))
    }

    fn run_next(&mut self, clients: &dyn ClientChannel, hook_type: &str, mut index: usize) -> bool {
        while index < self.handlers.len() {
            if self.handlers[index].hook_type != hook_type {
                index += 1;
                continue;
            }
            match self.invoke(clients, &self.handlers[index]) {
                Ok(()) => {
                    self.handlers[index].active = true;
                    return true;
                }
                Err(_) => {
                    warn!("Sending hook command failed. Removing hook.");
                    self.handlers.remove(index);
                }
            }
        }
        false
    }

    fn invoke(&self, clients: &dyn ClientChannel, h: &HookHandler) -> Result<(), crate::client::ClientGone> {
        debug!("Running hook '{}' handler {} on {}", h.hook_type, h.seq, h.client);
        if h.legacy {
            let msg = vec![
                "hook_run".to_string(),
                h.user_id.to_string(),
                h.seq.to_string(),
            ];
            clients.send_event(h.client, 0, ClientEvent::ClientMessage(msg))
        } else {
            clients.send_event(
                h.client,
                h.user_id,
                ClientEvent::Hook {
                    name: h.hook_type.clone(),
                    id: h.seq.0,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;

    #[test]
    fn test_handlers_sorted_by_priority_then_seq() {
        let clients = ClientRegistry::new();
        let a = clients.connect("a");
        let mut hooks = HookManager::new();

        let s1 = hooks.add(a.id(), "on_load", 1, 10, false);
        let s2 = hooks.add(a.id(), "on_load", 2, 0, false);
        let s3 = hooks.add(a.id(), "on_load", 3, 10, false);

        let order: Vec<HookSeq> = hooks.handlers().iter().map(|h| h.seq).collect();
        assert_eq!(order, vec![s2, s1, s3]);
    }

    #[test]
    fn test_start_without_handlers_is_complete() {
        let clients = ClientRegistry::new();
        let mut hooks = HookManager::new();
        assert!(!hooks.start(&clients, "on_unload"));
        assert!(hooks.test_completion(&clients, "on_unload"));
    }

    #[test]
    fn test_new_api_invocation_event() {
        let clients = ClientRegistry::new();
        let a = clients.connect("a");
        let mut hooks = HookManager::new();
        let seq = hooks.add(a.id(), "on_load", 42, 0, false);

        assert!(hooks.start(&clients, "on_load"));
        let msg = a.try_recv().unwrap();
        assert_eq!(msg.reply_id, 42);
        assert_eq!(
            msg.event,
            ClientEvent::Hook {
                name: "on_load".into(),
                id: seq.as_u64()
            }
        );
    }

    #[test]
    fn test_legacy_invocation_message() {
        let clients = ClientRegistry::new();
        let a = clients.connect("a");
        let mut hooks = HookManager::new();
        let seq = hooks.add(a.id(), "on_load", 5, 0, true);

        hooks.start(&clients, "on_load");
        let msg = a.try_recv().unwrap();
        assert_eq!(msg.reply_id, 0);
        assert_eq!(
            msg.event,
            ClientEvent::ClientMessage(vec!["hook_run".into(), "5".into(), seq.to_string()])
        );
    }

    #[test]
    fn test_continue_requires_active_handler() {
        let clients = ClientRegistry::new();
        let a = clients.connect("a");
        let mut hooks = HookManager::new();
        let seq = hooks.add(a.id(), "on_load", 0, 0, false);

        assert_eq!(
            hooks.continue_hook(&clients, a.id(), seq),
            Err(HookError::NotActive { seq: seq.as_u64() })
        );
        assert_eq!(
            hooks.continue_hook(&clients, a.id(), HookSeq::new(99)),
            Err(HookError::NotFound { seq: 99 })
        );
    }

    #[test]
    fn test_unreachable_handler_is_skipped() {
        let clients = ClientRegistry::new();
        let gone = clients.connect("gone");
        let b = clients.connect("b");
        let mut hooks = HookManager::new();
        hooks.add(gone.id(), "on_load", 0, 0, false);
        hooks.add(b.id(), "on_load", 0, 5, false);
        drop(gone);

        assert!(hooks.start(&clients, "on_load"));
        assert_eq!(hooks.handlers().len(), 1);
        assert_eq!(hooks.active("on_load").unwrap().client, b.id());
    }

    #[test]
    fn test_other_types_are_not_invoked() {
        let clients = ClientRegistry::new();
        let a = clients.connect("a");
        let mut hooks = HookManager::new();
        hooks.add(a.id(), "on_unload", 0, 0, false);

        assert!(!hooks.start(&clients, "on_load"));
        assert!(a.try_recv().is_none());
    }
}

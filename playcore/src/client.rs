//! Client notification channel
//!
//! Clients (scripts, remote controllers) receive hook invocations, client
//! messages and lifecycle events through a `ClientChannel`. The core only
//! needs to send to a client by id and to ask whether the client still
//! exists; `ClientRegistry` is the in-process implementation with one queue
//! per client.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;

use crate::notify::PlayerEvent;

/// Unique identifier of a connected client
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Events delivered to clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A hook handler is being run; acknowledge with `hook_continue(id)`
    Hook { name: String, id: u64 },
    /// Free-form message, also used by the command-based hook API
    ClientMessage(Vec<String>),
    /// Player lifecycle event
    Player(PlayerEvent),
}

/// An event together with the reply id chosen by the sender
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub reply_id: u64,
    pub event: ClientEvent,
}

/// The target client no longer exists
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("client {0} is gone")]
pub struct ClientGone(pub ClientId);

/// Delivery interface used by the hook manager and commands
pub trait ClientChannel: Send + Sync {
    /// Deliver an event to one client
    fn send_event(&self, client: ClientId, reply_id: u64, event: ClientEvent) -> Result<(), ClientGone>;

    /// Whether the client is still connected
    fn client_exists(&self, client: ClientId) -> bool;

    /// Deliver an event to every client
    fn broadcast(&self, event: ClientEvent);

    /// Look up a client by its name
    fn find_client(&self, name: &str) -> Option<ClientId>;
}

struct ClientSlot {
    name: String,
    tx: mpsc::Sender<Envelope>,
}

/// In-process client registry
///
/// # Example
///
/// ```rust
/// use playcore::client::{ClientChannel, ClientEvent, ClientRegistry};
///
/// let registry = ClientRegistry::new();
/// let handle = registry.connect("osc");
/// registry
///     .send_event(handle.id(), 7, ClientEvent::ClientMessage(vec!["hi".into()]))
///     .unwrap();
/// assert_eq!(handle.try_recv().unwrap().reply_id, 7);
///
/// let id = handle.id();
/// drop(handle);
/// assert!(!registry.client_exists(id));
/// ```
pub struct ClientRegistry {
    clients: Arc<DashMap<ClientId, ClientSlot>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect a new client; it is disconnected when the handle is dropped
    pub fn connect(&self, name: &str) -> ClientHandle {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel();
        self.clients.insert(
            id,
            ClientSlot {
                name: name.to_string(),
                tx,
            },
        );
        tracing::debug!("Client {} connected as '{}'", id, name);
        ClientHandle {
            id,
            name: name.to_string(),
            rx,
            clients: Arc::clone(&self.clients),
        }
    }

    /// Number of connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientChannel for ClientRegistry {
    fn send_event(&self, client: ClientId, reply_id: u64, event: ClientEvent) -> Result<(), ClientGone> {
        let slot = self.clients.get(&client).ok_or(ClientGone(client))?;
        slot.tx
            .send(Envelope { reply_id, event })
            .map_err(|_| ClientGone(client))
    }

    fn client_exists(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    fn broadcast(&self, event: ClientEvent) {
        for slot in self.clients.iter() {
            let _ = slot.tx.send(Envelope {
                reply_id: 0,
                event: event.clone(),
            });
        }
    }

    fn find_client(&self, name: &str) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| *entry.key())
    }
}

/// Receiving side of a connected client
pub struct ClientHandle {
    id: ClientId,
    name: String,
    rx: mpsc::Receiver<Envelope>,
    clients: Arc<DashMap<ClientId, ClientSlot>>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the next event
    pub fn recv(&self) -> Option<Envelope> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.clients.remove(&self.id);
        tracing::debug!("Client {} disconnected", self.id);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId::new(3).to_string(), "client-3");
    }

    #[test]
    fn test_send_to_disconnected_client_fails() {
        let registry = ClientRegistry::new();
        let handle = registry.connect("a");
        let id = handle.id();
        drop(handle);

        assert_eq!(
            registry.send_event(id, 0, ClientEvent::Player(PlayerEvent::Idle)),
            Err(ClientGone(id))
        );
    }

    #[test]
    fn test_broadcast_reaches_all_clients() {
        let registry = ClientRegistry::new();
        let a = registry.connect("a");
        let b = registry.connect("b");

        registry.broadcast(ClientEvent::Player(PlayerEvent::Shutdown));

        assert_eq!(a.try_recv().unwrap().event, ClientEvent::Player(PlayerEvent::Shutdown));
        assert_eq!(b.try_recv().unwrap().event, ClientEvent::Player(PlayerEvent::Shutdown));
    }

    #[test]
    fn test_find_client_by_name() {
        let registry = ClientRegistry::new();
        let a = registry.connect("osc");
        assert_eq!(registry.find_client("osc"), Some(a.id()));
        assert_eq!(registry.find_client("missing"), None);
    }
}

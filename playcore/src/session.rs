//! Player session
//!
//! `Session` is the state guarded by the single core lock: options,
//! properties, hooks, observers, clients and the playback stand-in. All
//! mutation happens through `&mut Session` while the lock is held; worker
//! jobs re-acquire the lock through the session's weak self-handle.
//!
//! # Architecture
//!
//! ```text
//! Arc<Mutex<Session>>
//!     │
//!     ├── options: OptionStore            (typed configuration)
//!     ├── properties: Arc<PropertyTable>  (immutable after start)
//!     ├── commands: Arc<CommandTable>     (immutable after start)
//!     ├── hooks: HookManager
//!     ├── notifier: ChangeNotifier ──► ChangeIterator
//!     ├── clients: Arc<dyn ClientChannel>
//!     ├── aborts: AbortRegistry
//!     ├── workers: WorkerPool ──► jobs upgrade `handle` and lock
//!     └── playback: Playback
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use option_store::{Node, OptionStore, SetFlags};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::abort::AbortRegistry;
use crate::client::{ClientChannel, ClientEvent};
use crate::command::{CommandCtx, CommandTable};
use crate::config::CoreConfig;
use crate::error::PoolError;
use crate::hook::HookManager;
use crate::notify::{ChangeIterator, ChangeNotifier, PlayerEvent};
use crate::playback::{Osd, Playback};
use crate::property::PropertyTable;
use crate::worker::WorkerPool;

/// A `loadfile` waiting for its `on_load` hook to finish
pub(crate) struct PendingLoad {
    pub index: usize,
    pub ctx: Option<CommandCtx>,
}

/// State guarded by the core lock
pub struct Session {
    pub options: OptionStore,
    pub hooks: HookManager,
    pub playback: Playback,
    pub osd: Osd,
    /// Exit code requested by `quit`
    pub quit: Option<i32>,
    /// Resume records written by `write-watch-later-config`, by path
    pub watch_later: HashMap<String, Vec<(String, String)>>,
    pub(crate) config: CoreConfig,
    pub(crate) aborts: AbortRegistry,
    pub(crate) workers: Option<WorkerPool>,
    pub(crate) outstanding_async: usize,
    pub(crate) pending_load: Option<PendingLoad>,
    properties: Arc<PropertyTable>,
    commands: Arc<CommandTable>,
    notifier: ChangeNotifier,
    clients: Arc<dyn ClientChannel>,
    wakeup: Arc<Condvar>,
    handle: Weak<Mutex<Session>>,
    warned_deprecated: HashSet<String>,
    silent_depth: u32,
}

impl Session {
    /// Create a session behind the core lock
    pub fn new(
        config: CoreConfig,
        mut options: OptionStore,
        clients: Arc<dyn ClientChannel>,
        wakeup: Arc<Condvar>,
    ) -> Result<Arc<Mutex<Session>>, PoolError> {
        if let Err(e) = options.set_raw_direct("osd-duration", Node::Int(config.osd_duration_ms), SetFlags::NONE) {
            warn!("Ignoring configured OSD duration: {}", e);
        }
        let workers = WorkerPool::new(config.worker_threads, config.worker_queue_capacity)?;
        let properties = Arc::new(PropertyTable::build(&options));
        let commands = Arc::new(CommandTable::builtin());
        debug!(
            "Session created: {} properties, {} commands",
            properties.len(),
            commands.len()
        );

        Ok(Arc::new_cyclic(|handle| {
            Mutex::new(Session {
                options,
                hooks: HookManager::new(),
                playback: Playback::new(),
                osd: Osd::default(),
                quit: None,
                watch_later: HashMap::new(),
                config,
                aborts: AbortRegistry::new(),
                workers: Some(workers),
                outstanding_async: 0,
                pending_load: None,
                properties,
                commands,
                notifier: ChangeNotifier::new(),
                clients,
                wakeup,
                handle: handle.clone(),
                warned_deprecated: HashSet::new(),
                silent_depth: 0,
            })
        }))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn properties(&self) -> &Arc<PropertyTable> {
        &self.properties
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    pub fn clients(&self) -> &Arc<dyn ClientChannel> {
        &self.clients
    }

    pub(crate) fn handle(&self) -> Weak<Mutex<Session>> {
        self.handle.clone()
    }

    /// Wake threads blocked on the core condition variable
    pub fn wakeup(&self) {
        self.wakeup.notify_all();
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Record that a property changed
    pub fn notify_property(&mut self, name: &str) {
        self.notifier.property_changed(name);
    }

    /// Raise a lifecycle event for observers and clients
    pub fn event(&mut self, event: PlayerEvent) {
        debug!("Event: {}", event.name());
        self.notifier.event(event);
        self.clients.broadcast(ClientEvent::Player(event));
    }

    /// Deliver pending change notifications to observers
    pub fn flush_notifications(&mut self) {
        self.notifier.flush();
    }

    pub fn observe(&mut self, name: &str) {
        self.notifier.watch(name);
    }

    pub fn unobserve(&mut self, name: &str) {
        self.notifier.unwatch(name);
    }

    pub fn changes(&self) -> ChangeIterator {
        self.notifier.iter()
    }

    // ------------------------------------------------------------------------
    // Silent mode and deprecation warnings
    // ------------------------------------------------------------------------

    pub fn is_silent(&self) -> bool {
        self.silent_depth > 0
    }

    pub(crate) fn enter_silent(&mut self) {
        self.silent_depth += 1;
    }

    pub(crate) fn leave_silent(&mut self) {
        self.silent_depth = self.silent_depth.saturating_sub(1);
    }

    /// Warn about a deprecated name the first time it is used
    pub fn warn_deprecated_once(&mut self, name: &str, replacement: &str) {
        if self.is_silent() || !self.warned_deprecated.insert(name.to_string()) {
            return;
        }
        warn!(
            "Warning: property '{}' was replaced with '{}' and might be removed in the future.",
            name, replacement
        );
    }

    pub fn was_deprecation_warned(&self, name: &str) -> bool {
        self.warned_deprecated.contains(name)
    }

    // ------------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------------

    /// Re-apply volume and mute to the audio output
    pub fn audio_update(&mut self) {
        let volume = self
            .options
            .value("volume")
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(100.0);
        let mute = self
            .options
            .value("mute")
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.playback.effective_volume = if mute { 0.0 } else { volume };
        debug!("Audio volume now {}", self.playback.effective_volume);
    }

    /// Show a message on the OSD for the default duration
    pub fn show_osd(&mut self, text: &str) {
        let duration = self
            .options
            .value("osd-duration")
            .ok()
            .and_then(|v| v.as_i64())
            .unwrap_or(self.config.osd_duration_ms);
        self.osd.show(text, duration);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("properties", &self.properties.len())
            .field("hooks", &self.hooks.handlers().len())
            .field("playing", &self.playback.is_playing())
            .field("outstanding_async", &self.outstanding_async)
            .finish()
    }
}

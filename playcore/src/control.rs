//! Thread-safe facade over a player session
//!
//! `Core` owns the session behind the single core lock and offers blocking
//! entry points for embedders: run a command and wait for it, read and
//! write properties, observe changes, drive hooks. No method holds the lock
//! while it waits.
//!
//! # Example
//!
//! ```rust,ignore
//! use playcore::{Core, CoreConfig, Node};
//!
//! let core = Core::new(CoreConfig::default())?;
//! core.observe("pause");
//!
//! core.command_blocking("set pause yes")?;
//! assert_eq!(core.get_property("pause")?, Node::Flag(true));
//!
//! for change in core.changes().try_iter() {
//!     println!("{} changed", change.name);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use option_store::{Node, OptionStore, Profile, SetFlags};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::bridge;
use crate::client::{ClientChannel, ClientHandle, ClientId, ClientRegistry};
use crate::command::{parse_command, parse_command_node, run_command, Command, CommandOutcome};
use crate::config::CoreConfig;
use crate::error::{CommandError, CoreError, Result};
use crate::hook::HookSeq;
use crate::notify::{ChangeIterator, PlayerEvent};
use crate::playback::MediaInfo;
use crate::player;
use crate::property;
use crate::session::Session;

/// Embedding entry point of the control plane
pub struct Core {
    inner: Arc<Mutex<Session>>,
    wakeup: Arc<Condvar>,
    clients: Arc<ClientRegistry>,
    config: CoreConfig,
    shut_down: AtomicBool,
}

impl Core {
    /// Create a core with the built-in option set
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_options(config, OptionStore::with_defaults())
    }

    /// Create a core with a caller-provided option store
    pub fn with_options(config: CoreConfig, options: OptionStore) -> Result<Self> {
        config.validate().map_err(CoreError::Config)?;

        let wakeup = Arc::new(Condvar::new());
        let clients = Arc::new(ClientRegistry::new());
        let channel: Arc<dyn ClientChannel> = Arc::clone(&clients) as Arc<dyn ClientChannel>;
        let inner = Session::new(config.clone(), options, channel, Arc::clone(&wakeup))?;
        info!("Core started with {} worker threads", config.worker_threads);

        Ok(Self {
            inner,
            wakeup,
            clients,
            config,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutDown);
        }
        Ok(self.inner.lock())
    }

    /// Run a closure with the session locked, then deliver notifications
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.inner.lock();
        let result = f(&mut session);
        session.flush_notifications();
        result
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Run a command string and wait for it to complete
    pub fn command_blocking(&self, text: &str) -> Result<Node> {
        let cmd = parse_command(self.lock()?.commands(), text, None)?;
        self.run_blocking(cmd)
    }

    /// Run a command built from a node and wait for it to complete
    pub fn command_node(&self, node: &Node) -> Result<Node> {
        let cmd = parse_command_node(self.lock()?.commands(), node, None)?;
        self.run_blocking(cmd)
    }

    /// Run a command on behalf of a client and wait for it to complete
    pub fn command_from_client(&self, client: ClientId, text: &str) -> Result<Node> {
        let cmd = parse_command(self.lock()?.commands(), text, Some(client))?;
        self.run_blocking(cmd)
    }

    /// Start a command; `on_done` runs with its outcome once it completes
    pub fn command_async(
        &self,
        text: &str,
        sender: Option<ClientId>,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<()> {
        let mut session = self.lock()?;
        let cmd = parse_command(session.commands(), text, sender)?;
        run_command(
            &mut session,
            cmd,
            Some(Box::new(move |_: &mut Session, outcome: CommandOutcome| on_done(outcome))),
        );
        session.flush_notifications();
        Ok(())
    }

    fn run_blocking(&self, cmd: Command) -> Result<Node> {
        let (tx, rx) = mpsc::channel();
        {
            let mut session = self.lock()?;
            run_command(
                &mut session,
                cmd,
                Some(Box::new(move |_: &mut Session, outcome: CommandOutcome| {
                    // The waiter may have given up
                    let _ = tx.send(outcome);
                })),
            );
            session.flush_notifications();
        }

        loop {
            match rx.recv_timeout(self.config.hook_poll_interval) {
                Ok(outcome) => return outcome.into_result().map_err(CoreError::from),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // Hook handlers of vanished clients never acknowledge
                    let mut session = self.inner.lock();
                    player::check_pending_hooks(&mut session);
                    session.flush_notifications();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(CommandError::Failed("command dropped without completion".into()).into())
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Properties and options
    // ------------------------------------------------------------------------

    pub fn get_property(&self, name: &str) -> Result<Node> {
        let mut session = self.lock()?;
        Ok(property::property_get(&mut session, name)?)
    }

    /// Human-oriented text of a property
    pub fn print_property(&self, name: &str) -> Result<String> {
        let mut session = self.lock()?;
        Ok(property::property_print(&mut session, name)?)
    }

    pub fn set_property(&self, name: &str, value: Node) -> Result<()> {
        let mut session = self.lock()?;
        property::property_set(&mut session, name, value)?;
        session.flush_notifications();
        Ok(())
    }

    pub fn set_property_string(&self, name: &str, text: &str) -> Result<()> {
        let mut session = self.lock()?;
        property::property_set_string(&mut session, name, text)?;
        session.flush_notifications();
        Ok(())
    }

    /// Write an option at runtime through the option bridge
    pub fn set_option(&self, name: &str, value: Node) -> Result<()> {
        let mut session = self.lock()?;
        bridge::on_set_option(&mut session, name, value, SetFlags::RUNTIME)?;
        session.flush_notifications();
        Ok(())
    }

    pub fn define_profile(&self, profile: Profile) {
        self.inner.lock().options.define_profile(profile);
    }

    pub fn observe(&self, name: &str) {
        self.inner.lock().observe(name);
    }

    pub fn unobserve(&self, name: &str) {
        self.inner.lock().unobserve(name);
    }

    /// Iterator over change notifications of observed names
    pub fn changes(&self) -> ChangeIterator {
        self.inner.lock().changes()
    }

    // ------------------------------------------------------------------------
    // Clients and hooks
    // ------------------------------------------------------------------------

    /// Connect an in-process client
    pub fn connect_client(&self, name: &str) -> ClientHandle {
        self.clients.connect(name)
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Register a hook handler for a client
    pub fn add_hook(&self, client: ClientId, hook_type: &str, user_id: u64, priority: i32) -> Result<HookSeq> {
        let mut session = self.lock()?;
        Ok(session.hooks.add(client, hook_type, user_id, priority, false))
    }

    /// Acknowledge a hook invocation so the next handler can run
    pub fn hook_continue(&self, client: ClientId, seq: HookSeq) -> Result<()> {
        let mut session = self.lock()?;
        let clients = Arc::clone(session.clients());
        session.hooks.continue_hook(clients.as_ref(), client, seq)?;
        player::check_pending_hooks(&mut session);
        session.flush_notifications();
        session.wakeup();
        Ok(())
    }

    /// Drop every hook handler of a client
    pub fn forget_client(&self, client: ClientId) {
        let mut session = self.inner.lock();
        session.hooks.remove_client(client);
        player::check_pending_hooks(&mut session);
        session.flush_notifications();
        session.wakeup();
    }

    /// Run every handler of a hook type and wait until all have finished
    pub fn run_hook(&self, hook_type: &str) -> Result<()> {
        let mut session = self.lock()?;
        let clients = Arc::clone(session.clients());
        if !session.hooks.start(clients.as_ref(), hook_type) {
            return Ok(());
        }
        while !session.hooks.test_completion(clients.as_ref(), hook_type) {
            // Woken by acknowledgments; the timeout catches vanished clients
            self.wakeup.wait_for(&mut session, self.config.hook_poll_interval);
        }
        debug!("Hook '{}' completed", hook_type);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------------

    /// Make `info` the probe result for a path
    pub fn register_media(&self, path: &str, info: MediaInfo) {
        self.inner.lock().playback.register_media(path, info);
    }

    /// Advance the playback clock
    pub fn advance(&self, seconds: f64) {
        self.with_session(|s| player::advance_clock(s, seconds));
    }

    pub fn end_playback(&self) {
        self.with_session(player::end_playback);
    }

    /// Exit code requested by `quit`, if any
    pub fn quit_requested(&self) -> Option<i32> {
        self.inner.lock().quit
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Abort running commands, end playback and wait for worker commands
    ///
    /// Later calls to command and property methods fail with
    /// `CoreError::ShutDown`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = {
            let mut session = self.inner.lock();
            session.aborts.abort_all();
            player::end_playback(&mut session);
            session.event(PlayerEvent::Shutdown);
            session.flush_notifications();
            while session.outstanding_async > 0 {
                debug!("Waiting for {} worker commands", session.outstanding_async);
                self.wakeup.wait_for(&mut session, self.config.hook_poll_interval);
            }
            session.workers.take()
        };
        // Joined without the lock
        drop(workers);
        info!("Core shut down");
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("config", &self.config)
            .field("clients", &self.clients.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

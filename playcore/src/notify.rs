//! Property change notification
//!
//! Observers register interest in property names. A name is reported as
//! changed either when a set-class property action succeeds, or when a
//! player lifecycle event is raised whose static property list covers it.
//!
//! Notifications are collected into a pending set and flushed in one batch,
//! so a name is reported once per batch no matter how many paths touched it.
//!
//! # Architecture
//!
//! ```text
//! ChangeNotifier
//!     │
//!     ├── watched: Vec<(name, EventMask)>
//!     │
//!     ├── pending: Vec<name>          (deduplicated, flushed in order)
//!     │
//!     └── event_channel: mpsc::channel<PropertyChange>
//!             │
//!             └── ChangeIterator
//! ```

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// ============================================================================
// Lifecycle events
// ============================================================================

/// Player lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEvent {
    StartFile,
    EndFile,
    FileLoaded,
    /// Everything may have changed
    ChangeAll,
    Idle,
    TracksChanged,
    TrackSwitched,
    Pause,
    Unpause,
    Tick,
    DurationUpdate,
    VideoReconfig,
    AudioReconfig,
    Seek,
    PlaybackRestart,
    MetadataUpdate,
    ChapterChange,
    CacheUpdate,
    WinResize,
    WinState,
    ChangePlaylist,
    CoreIdle,
    Shutdown,
}

impl PlayerEvent {
    /// Event name as delivered to clients
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::StartFile => "start-file",
            PlayerEvent::EndFile => "end-file",
            PlayerEvent::FileLoaded => "file-loaded",
            PlayerEvent::ChangeAll => "change-all",
            PlayerEvent::Idle => "idle",
            PlayerEvent::TracksChanged => "tracks-changed",
            PlayerEvent::TrackSwitched => "track-switched",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Unpause => "unpause",
            PlayerEvent::Tick => "tick",
            PlayerEvent::DurationUpdate => "duration-update",
            PlayerEvent::VideoReconfig => "video-reconfig",
            PlayerEvent::AudioReconfig => "audio-reconfig",
            PlayerEvent::Seek => "seek",
            PlayerEvent::PlaybackRestart => "playback-restart",
            PlayerEvent::MetadataUpdate => "metadata-update",
            PlayerEvent::ChapterChange => "chapter-change",
            PlayerEvent::CacheUpdate => "cache-update",
            PlayerEvent::WinResize => "win-resize",
            PlayerEvent::WinState => "win-state",
            PlayerEvent::ChangePlaylist => "playlist-change",
            PlayerEvent::CoreIdle => "core-idle",
            PlayerEvent::Shutdown => "shutdown",
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u32)
    }
}

/// Properties affected by each lifecycle event; `*` means all
const EVENT_PROPERTIES: &[(PlayerEvent, &[&str])] = &[
    (PlayerEvent::StartFile, &["*"]),
    (PlayerEvent::EndFile, &["*"]),
    (PlayerEvent::FileLoaded, &["*"]),
    (PlayerEvent::ChangeAll, &["*"]),
    (PlayerEvent::Idle, &["*"]),
    (PlayerEvent::TracksChanged, &["track-list"]),
    (
        PlayerEvent::TrackSwitched,
        &["vid", "video", "aid", "audio", "sid", "sub", "secondary-sid"],
    ),
    (PlayerEvent::Pause, &["pause", "paused", "core-idle", "eof-reached"]),
    (PlayerEvent::Unpause, &["pause", "paused", "core-idle", "eof-reached"]),
    (
        PlayerEvent::Tick,
        &[
            "time-pos",
            "audio-pts",
            "stream-pos",
            "avsync",
            "percent-pos",
            "time-remaining",
            "playtime-remaining",
            "playback-time",
            "estimated-vf-fps",
            "drop-frame-count",
            "vo-drop-frame-count",
            "total-avsync-change",
            "audio-speed-correction",
            "video-speed-correction",
            "vo-delayed-frame-count",
            "mistimed-frame-count",
            "vsync-ratio",
            "estimated-display-fps",
            "vsync-jitter",
            "sub-text",
            "audio-bitrate",
            "video-bitrate",
            "sub-bitrate",
            "decoder-frame-drop-count",
            "frame-drop-count",
            "video-frame-info",
        ],
    ),
    (PlayerEvent::DurationUpdate, &["duration"]),
    (
        PlayerEvent::VideoReconfig,
        &[
            "video-out-params",
            "video-params",
            "video-format",
            "video-codec",
            "video-bitrate",
            "dwidth",
            "dheight",
            "width",
            "height",
            "fps",
            "aspect",
            "vo-configured",
            "current-vo",
            "colormatrix",
            "colormatrix-input-range",
            "colormatrix-primaries",
            "video-aspect",
        ],
    ),
    (
        PlayerEvent::AudioReconfig,
        &[
            "audio-format",
            "audio-codec",
            "audio-bitrate",
            "samplerate",
            "channels",
            "audio",
            "volume",
            "mute",
            "current-ao",
            "audio-codec-name",
            "audio-params",
            "audio-out-params",
            "volume-max",
            "mixer-active",
        ],
    ),
    (PlayerEvent::Seek, &["seeking", "core-idle", "eof-reached"]),
    (PlayerEvent::PlaybackRestart, &["seeking", "core-idle", "eof-reached"]),
    (
        PlayerEvent::MetadataUpdate,
        &["metadata", "filtered-metadata", "media-title"],
    ),
    (PlayerEvent::ChapterChange, &["chapter", "chapter-metadata"]),
    (
        PlayerEvent::CacheUpdate,
        &[
            "demuxer-cache-duration",
            "demuxer-cache-idle",
            "paused-for-cache",
            "demuxer-cache-time",
            "cache-buffering-state",
            "cache-speed",
            "demuxer-cache-state",
        ],
    ),
    (
        PlayerEvent::WinResize,
        &["current-window-scale", "osd-width", "osd-height", "osd-par", "osd-dimensions"],
    ),
    (
        PlayerEvent::WinState,
        &["display-names", "display-fps", "display-width", "display-height"],
    ),
    (
        PlayerEvent::ChangePlaylist,
        &["playlist", "playlist-pos", "playlist-pos-1", "playlist-count", "playlist/count"],
    ),
    (PlayerEvent::CoreIdle, &["core-idle", "eof-reached"]),
];

/// Set of lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u64);

impl EventMask {
    pub const EMPTY: Self = Self(0);

    pub fn contains(self, event: PlayerEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn insert(&mut self, event: PlayerEvent) {
        self.0 |= event.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Length of the top-level part of a property name
///
/// A name without `/` is compared in full, including its terminator, so
/// `pause` does not match `pause-foo`.
fn prefix_len(name: &str) -> usize {
    match name.find('/') {
        Some(pos) => pos,
        None => name.len() + 1,
    }
}

/// Whether a change to one property name may affect the other
///
/// `*` matches everything; an `options/` prefix is ignored on either side;
/// names are compared up to the shorter top-level prefix.
pub fn property_matches(a: &str, b: &str) -> bool {
    if a == "*" || b == "*" {
        return true;
    }
    let a = a.strip_prefix("options/").unwrap_or(a);
    let b = b.strip_prefix("options/").unwrap_or(b);
    let len = prefix_len(a).min(prefix_len(b));

    // Compare as if both strings were NUL-terminated
    let (a, b) = (a.as_bytes(), b.as_bytes());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return false;
        }
        if x == 0 {
            break;
        }
    }
    true
}

/// Lifecycle events that affect a property name
pub fn property_event_mask(name: &str) -> EventMask {
    let mut mask = EventMask::EMPTY;
    for (event, names) in EVENT_PROPERTIES {
        if names.iter().any(|n| property_matches(n, name)) {
            mask.insert(*event);
        }
    }
    mask
}

// ============================================================================
// Change events
// ============================================================================

/// A change notification for an observed property name
#[derive(Debug, Clone)]
pub struct PropertyChange {
    /// The observed name, as registered with `watch`
    pub name: String,

    /// When the change was flushed
    pub timestamp: Instant,
}

impl PropertyChange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Instant::now(),
        }
    }
}

impl PartialEq for PropertyChange {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.name == other.name
    }
}

/// Collects and delivers property change notifications
pub struct ChangeNotifier {
    watched: Vec<(String, EventMask)>,
    pending: Vec<String>,
    event_tx: mpsc::Sender<PropertyChange>,
    event_rx: Arc<Mutex<mpsc::Receiver<PropertyChange>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            watched: Vec::new(),
            pending: Vec::new(),
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        }
    }

    /// Register interest in a property name
    pub fn watch(&mut self, name: &str) {
        if !self.is_watched(name) {
            self.watched.push((name.to_string(), property_event_mask(name)));
        }
    }

    pub fn unwatch(&mut self, name: &str) {
        self.watched.retain(|(n, _)| n != name);
    }

    pub fn is_watched(&self, name: &str) -> bool {
        self.watched.iter().any(|(n, _)| n == name)
    }

    fn mark(&mut self, name: &str) {
        if !self.pending.iter().any(|p| p == name) {
            self.pending.push(name.to_string());
        }
    }

    /// Record that a property was written
    pub fn property_changed(&mut self, name: &str) {
        let hits: Vec<String> = self
            .watched
            .iter()
            .filter(|(w, _)| property_matches(w, name))
            .map(|(w, _)| w.clone())
            .collect();
        for w in hits {
            self.mark(&w);
        }
    }

    /// Record a lifecycle event
    pub fn event(&mut self, event: PlayerEvent) {
        let hits: Vec<String> = self
            .watched
            .iter()
            .filter(|(_, mask)| mask.contains(event))
            .map(|(w, _)| w.clone())
            .collect();
        for w in hits {
            self.mark(&w);
        }
    }

    /// Number of names waiting to be flushed
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Deliver all pending notifications
    pub fn flush(&mut self) {
        for name in self.pending.drain(..) {
            // Receiver lives as long as the notifier
            let _ = self.event_tx.send(PropertyChange::new(name));
        }
    }

    /// Create a blocking iterator over delivered notifications
    pub fn iter(&self) -> ChangeIterator {
        ChangeIterator::new(Arc::clone(&self.event_rx))
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("watched", &self.watched.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Iteration
// ============================================================================

/// Blocking iterator over property change notifications
///
/// # Example
///
/// ```rust,ignore
/// core.observe("pause");
/// core.set_property("pause", Node::Flag(true))?;
///
/// for change in core.changes().try_iter() {
///     println!("{} changed", change.name);
/// }
/// ```
pub struct ChangeIterator {
    rx: Arc<Mutex<mpsc::Receiver<PropertyChange>>>,
}

impl ChangeIterator {
    pub(crate) fn new(rx: Arc<Mutex<mpsc::Receiver<PropertyChange>>>) -> Self {
        Self { rx }
    }

    /// Block until the next notification is available
    ///
    /// Returns `None` if the channel is closed.
    pub fn recv(&self) -> Option<PropertyChange> {
        self.rx.lock().recv().ok()
    }

    /// Block until the next notification or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PropertyChange> {
        self.rx.lock().recv_timeout(timeout).ok()
    }

    /// Try to receive a notification without blocking
    pub fn try_recv(&self) -> Option<PropertyChange> {
        self.rx.lock().try_recv().ok()
    }

    /// Non-blocking iterator over currently available notifications
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }

    /// Iterator that waits up to `timeout` for each notification
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }
}

impl Iterator for ChangeIterator {
    type Item = PropertyChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Non-blocking iterator over currently available notifications
pub struct TryIter<'a> {
    inner: &'a ChangeIterator,
}

impl Iterator for TryIter<'_> {
    type Item = PropertyChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a> {
    inner: &'a ChangeIterator,
    timeout: Duration,
}

impl Iterator for TimeoutIter<'_> {
    type Item = PropertyChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}

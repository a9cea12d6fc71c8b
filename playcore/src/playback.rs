//! In-memory playback state
//!
//! Stands in for the decoding engine: which file is loaded, its tags and
//! duration, the playlist and the playback clock. Properties and commands
//! read and drive this state; nothing here decodes media.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

/// What is known about a media file before it is played
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration: Option<f64>,
    /// Tags in container order
    pub tags: Vec<(String, String)>,
}

impl MediaInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub id: u64,
    pub filename: String,
}

/// The file currently loaded
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    pub path: String,
    pub duration: Option<f64>,
    pub tags: Vec<(String, String)>,
}

impl LoadedFile {
    /// Case-insensitive tag lookup
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Playback engine state
#[derive(Debug)]
pub struct Playback {
    pub playlist: Vec<PlaylistEntry>,
    /// Index of the playlist entry being played or loaded
    pub current: Option<usize>,
    /// Set once the file finished loading
    pub file: Option<LoadedFile>,
    pub time_pos: f64,
    pub eof_reached: bool,
    pub seeking: bool,
    /// Position before the last seek, for `revert-seek`
    pub last_seek_pos: Option<f64>,
    /// Position stored by `revert-seek mark`
    pub marked_pos: Option<f64>,
    pub speed: f64,
    /// Volume after mute is applied
    pub effective_volume: f64,
    pub audio_speed_correction: f64,
    pub video_speed_correction: f64,
    pub decoder_frame_drops: i64,
    /// Playback of the current file is being stopped
    pub stop_requested: bool,
    media: HashMap<String, MediaInfo>,
    next_entry_id: u64,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            playlist: Vec::new(),
            current: None,
            file: None,
            time_pos: 0.0,
            eof_reached: false,
            seeking: false,
            last_seek_pos: None,
            marked_pos: None,
            speed: 1.0,
            effective_volume: 100.0,
            audio_speed_correction: 1.0,
            video_speed_correction: 1.0,
            decoder_frame_drops: 0,
            stop_requested: false,
            media: HashMap::new(),
            next_entry_id: 1,
        }
    }

    /// Make `info` the probe result for `path`
    pub fn register_media(&mut self, path: &str, info: MediaInfo) {
        self.media.insert(path.to_string(), info);
    }

    /// Probe a path; unknown paths have no duration and no tags
    pub fn probe(&self, path: &str) -> MediaInfo {
        self.media.get(path).cloned().unwrap_or_default()
    }

    pub fn is_playing(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Append an entry and return its index
    pub fn append(&mut self, filename: &str) -> usize {
        self.playlist.push(PlaylistEntry {
            id: self.next_entry_id,
            filename: filename.to_string(),
        });
        self.next_entry_id += 1;
        self.playlist.len() - 1
    }

    /// Remove every entry except the current one
    pub fn clear_except_current(&mut self) {
        match self.current.and_then(|i| self.playlist.get(i).cloned()) {
            Some(entry) => {
                self.playlist = vec![entry];
                self.current = Some(0);
            }
            None => self.playlist.clear(),
        }
    }

    /// Remove an entry; returns false if the index is out of range
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.playlist.len() {
            return false;
        }
        self.playlist.remove(index);
        self.current = match self.current {
            Some(c) if c == index => None,
            Some(c) if c > index => Some(c - 1),
            other => other,
        };
        true
    }

    /// Move the entry at `from` in front of the entry at `to`, or to the
    /// end if `to` is past the last entry. The current entry stays current.
    pub fn move_entry(&mut self, from: usize, to: usize) -> bool {
        if from >= self.playlist.len() {
            return false;
        }
        let to = to.min(self.playlist.len());
        if to == from || to == from + 1 {
            return true;
        }
        let current_id = self.current_id();
        let entry = self.playlist.remove(from);
        let dest = if to > from { to - 1 } else { to };
        self.playlist.insert(dest, entry);
        self.current = current_id.and_then(|id| self.index_of(id));
        true
    }

    /// Put the entries in random order; the current entry stays current
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let current_id = self.current_id();
        self.playlist.shuffle(rng);
        self.current = current_id.and_then(|id| self.index_of(id));
    }

    fn current_id(&self) -> Option<u64> {
        self.current.and_then(|i| self.playlist.get(i)).map(|e| e.id)
    }

    fn index_of(&self, id: u64) -> Option<usize> {
        self.playlist.iter().position(|e| e.id == id)
    }

    /// Reset per-file state after the file ends
    pub fn unload(&mut self) {
        self.file = None;
        self.time_pos = 0.0;
        self.eof_reached = false;
        self.seeking = false;
        self.last_seek_pos = None;
        self.marked_pos = None;
        self.decoder_frame_drops = 0;
        self.stop_requested = false;
    }

    pub fn duration(&self) -> Option<f64> {
        self.file.as_ref().and_then(|f| f.duration)
    }

    pub fn time_remaining(&self) -> Option<f64> {
        self.duration().map(|d| (d - self.time_pos).max(0.0))
    }

    pub fn percent_pos(&self) -> Option<f64> {
        let duration = self.duration().filter(|d| *d > 0.0)?;
        Some((self.time_pos / duration * 100.0).clamp(0.0, 100.0))
    }

    /// Jump to an absolute position, clamped to the file
    pub fn seek_to(&mut self, target: f64) {
        let upper = self.duration().unwrap_or(f64::MAX);
        self.time_pos = target.clamp(0.0, upper);
        self.eof_reached = false;
    }

    /// Advance the clock; returns true when the end of the file is reached
    pub fn advance(&mut self, seconds: f64) -> bool {
        if self.file.is_none() || self.eof_reached {
            return false;
        }
        self.time_pos += seconds * self.speed;
        if let Some(duration) = self.duration() {
            if self.time_pos >= duration {
                self.time_pos = duration;
                self.eof_reached = true;
                return true;
            }
        }
        false
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

/// OSD and terminal output produced by commands
#[derive(Debug, Default)]
pub struct Osd {
    messages: Vec<OsdMessage>,
    terminal: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsdMessage {
    pub text: String,
    pub duration_ms: i64,
}

impl Osd {
    pub fn show(&mut self, text: &str, duration_ms: i64) {
        tracing::debug!("OSD: {}", text);
        self.messages.push(OsdMessage {
            text: text.to_string(),
            duration_ms,
        });
    }

    pub fn print(&mut self, text: &str) {
        tracing::info!("{}", text);
        self.terminal.push(text.to_string());
    }

    pub fn last(&self) -> Option<&OsdMessage> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[OsdMessage] {
        &self.messages
    }

    pub fn terminal(&self) -> &[String] {
        &self.terminal
    }
}

//! Cooperative cancellation
//!
//! Commands declaring `can_abort` receive an `AbortEntry` at submission.
//! Handlers poll it at safe points; nothing is interrupted forcibly.
//! Entries coupled to playback are triggered when the current file ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

static NEXT_ABORT_ID: AtomicU64 = AtomicU64::new(1);

/// Cancellation token shared between a running command and the core
#[derive(Debug)]
pub struct AbortEntry {
    id: u64,
    aborted: AtomicBool,
    coupled_to_playback: AtomicBool,
}

impl AbortEntry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ABORT_ID.fetch_add(1, Ordering::Relaxed),
            aborted: AtomicBool::new(false),
            coupled_to_playback: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Couple the entry to the lifetime of the current file
    pub fn set_coupled_to_playback(&self, coupled: bool) {
        self.coupled_to_playback.store(coupled, Ordering::SeqCst);
    }

    pub fn coupled_to_playback(&self) -> bool {
        self.coupled_to_playback.load(Ordering::SeqCst)
    }
}

/// Registry of abort entries for in-flight commands
#[derive(Debug, Default)]
pub struct AbortRegistry {
    entries: DashMap<u64, Arc<AbortEntry>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: Arc<AbortEntry>) {
        self.entries.insert(entry.id(), entry);
    }

    pub fn unregister(&self, entry: &AbortEntry) {
        self.entries.remove(&entry.id());
    }

    /// Trigger every entry coupled to playback; returns how many fired
    pub fn abort_playback(&self) -> usize {
        let mut count = 0;
        for entry in self.entries.iter() {
            if entry.coupled_to_playback() {
                entry.abort();
                count += 1;
            }
        }
        count
    }

    /// Trigger `entry` right away if it is coupled to playback that has
    /// already stopped; returns whether it is aborted
    pub fn recheck(&self, entry: &AbortEntry, playback_stopped: bool) -> bool {
        if entry.coupled_to_playback() && playback_stopped {
            entry.abort();
        }
        entry.is_aborted()
    }

    /// Trigger every registered entry
    pub fn abort_all(&self) {
        for entry in self.entries.iter() {
            entry.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_playback_only_hits_coupled_entries() {
        let registry = AbortRegistry::new();
        let coupled = AbortEntry::new();
        coupled.set_coupled_to_playback(true);
        let free = AbortEntry::new();
        registry.register(Arc::clone(&coupled));
        registry.register(Arc::clone(&free));

        assert_eq!(registry.abort_playback(), 1);
        assert!(coupled.is_aborted());
        assert!(!free.is_aborted());

        registry.abort_all();
        assert!(free.is_aborted());
    }

    #[test]
    fn test_recheck_after_playback_stopped() {
        let registry = AbortRegistry::new();
        let entry = AbortEntry::new();
        registry.register(Arc::clone(&entry));

        // Uncoupled entries ignore the playback state
        assert!(!registry.recheck(&entry, true));

        entry.set_coupled_to_playback(true);
        assert!(!registry.recheck(&entry, false));
        assert!(registry.recheck(&entry, true));
        assert!(entry.is_aborted());
    }

    #[test]
    fn test_unregister() {
        let registry = AbortRegistry::new();
        let entry = AbortEntry::new();
        registry.register(Arc::clone(&entry));
        assert_eq!(registry.len(), 1);
        registry.unregister(&entry);
        assert!(registry.is_empty());
    }
}

//! Time-windowed duplicate suppression
//!
//! Volatile by nature: a restart allows one duplicate per active identifier.
//! Memory is bounded by a sweep that runs whenever the table grows past the
//! high-water mark, there is no background cleanup task.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

pub struct DedupWindow {
    /// identifier → last recorded timestamp (seconds)
    last_seen: DashMap<String, i64>,
    window_secs: i64,
    high_water: usize,
}

impl DedupWindow {
    pub fn new(window_secs: i64, high_water: usize) -> Self {
        Self {
            last_seen: DashMap::new(),
            window_secs,
            high_water,
        }
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Decide whether a ping at `now` should be recorded
    ///
    /// Returns false if the identifier was recorded less than `window_secs`
    /// ago. Otherwise refreshes its timestamp and returns true. The entry lock
    /// serializes concurrent calls for the same identifier.
    pub fn should_record(&self, identifier: &str, now: i64) -> bool {
        let record = match self.last_seen.entry(identifier.to_string()) {
            Entry::Occupied(mut entry) => {
                if now - *entry.get() < self.window_secs {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        if record && self.last_seen.len() > self.high_water {
            self.sweep(now);
        }

        record
    }

    /// Undo a recording whose event could not be persisted
    ///
    /// Only removes the entry if it still carries `recorded_at`.
    pub fn forget(&self, identifier: &str, recorded_at: i64) {
        self.last_seen.remove_if(identifier, |_, seen| *seen == recorded_at);
    }

    /// Drop every entry older than the window
    pub fn sweep(&self, now: i64) {
        let before = self.last_seen.len();
        self.last_seen.retain(|_, seen| now - *seen < self.window_secs);
        debug!(before, after = self.last_seen.len(), "swept dedup window");
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

//! Event window tracker
//!
//! Process-resident sliding-window counters keyed by (guild, moderator,
//! module). Entries older than the window are evicted on insertion; a streak
//! that has fired will not fire again until its count decays back below the
//! threshold.

use crate::antinuke::config::Module;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Sliding window length in milliseconds.
pub const WINDOW_MS: i64 = 60_000;

#[derive(Debug, Default)]
struct Window {
    /// Timestamps (unix millis) of qualifying events, oldest first.
    stamps: VecDeque<i64>,
    /// Latched once a streak triggers; cleared when the count decays below
    /// the threshold again.
    fired: bool,
}

/// Result of recording one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// Events in the window after this one, including it.
    pub count: usize,
    /// True exactly once per streak that reaches the threshold.
    pub triggered: bool,
}

/// Per-(guild, moderator, module) sliding-window counters.
///
/// Never persisted; windows are created lazily on first event.
#[derive(Debug)]
pub struct EventTracker {
    windows: DashMap<(u64, u64, Module), Window>,
    window_ms: i64,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(WINDOW_MS)
    }

    /// Tracker with a custom window length, for tests.
    #[must_use]
    pub fn with_window(window_ms: i64) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms,
        }
    }

    /// Record one qualifying event at `at_ms` and report whether it crossed
    /// `threshold`. Events must be admitted in arrival order per key.
    pub fn record(
        &self,
        guild_id: u64,
        moderator_id: u64,
        module: Module,
        at_ms: i64,
        threshold: u32,
    ) -> Recorded {
        let mut window = self
            .windows
            .entry((guild_id, moderator_id, module))
            .or_default();

        // Evict entries that fell out of the window.
        let cutoff = at_ms - self.window_ms;
        while window.stamps.front().is_some_and(|&s| s <= cutoff) {
            window.stamps.pop_front();
        }
        if (window.stamps.len() as u32) < threshold {
            window.fired = false;
        }

        window.stamps.push_back(at_ms);
        let count = window.stamps.len();

        let triggered = count as u32 >= threshold && !window.fired;
        if triggered {
            window.fired = true;
        }

        Recorded { count, triggered }
    }

    /// Drop the window for one key, if any.
    pub fn forget(&self, guild_id: u64, moderator_id: u64, module: Module) {
        self.windows.remove(&(guild_id, moderator_id, module));
    }

    /// Drop every window whose entries have all expired as of `now_ms`.
    pub fn purge_expired(&self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        self.windows
            .retain(|_, window| window.stamps.back().is_some_and(|&s| s > cutoff));
    }

    /// Number of live windows, for diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: u64 = 1000;
    const M: u64 = 2000;

    #[test]
    fn test_threshold_fires_on_nth_event() {
        let tracker = EventTracker::new();

        let first = tracker.record(G, M, Module::Ban, 0, 3);
        assert_eq!(first.count, 1);
        assert!(!first.triggered);

        let second = tracker.record(G, M, Module::Ban, 1_000, 3);
        assert_eq!(second.count, 2);
        assert!(!second.triggered);

        let third = tracker.record(G, M, Module::Ban, 2_000, 3);
        assert_eq!(third.count, 3);
        assert!(third.triggered);
    }

    #[test]
    fn test_no_retrigger_within_same_burst() {
        let tracker = EventTracker::new();
        for i in 0..3 {
            tracker.record(G, M, Module::Ban, i * 1_000, 3);
        }

        // The fourth ban in the same window stays above the threshold but
        // must not fire again.
        let fourth = tracker.record(G, M, Module::Ban, 3_000, 3);
        assert_eq!(fourth.count, 4);
        assert!(!fourth.triggered);
    }

    #[test]
    fn test_retriggers_after_decay() {
        let tracker = EventTracker::new();
        for i in 0..3 {
            tracker.record(G, M, Module::Role, i * 1_000, 3);
        }

        // Well past the window: everything evicted, streak restarts.
        let base = 120_000;
        for i in 0..2 {
            let rec = tracker.record(G, M, Module::Role, base + i * 1_000, 3);
            assert!(!rec.triggered);
        }
        let rec = tracker.record(G, M, Module::Role, base + 2_000, 3);
        assert_eq!(rec.count, 3);
        assert!(rec.triggered);
    }

    #[test]
    fn test_eviction_on_insert() {
        let tracker = EventTracker::new();
        tracker.record(G, M, Module::Channel, 0, 10);
        tracker.record(G, M, Module::Channel, 30_000, 10);

        // First stamp is now outside the 60s window.
        let rec = tracker.record(G, M, Module::Channel, 61_000, 10);
        assert_eq!(rec.count, 2);
    }

    #[test]
    fn test_threshold_one_fires_immediately() {
        let tracker = EventTracker::new();
        let rec = tracker.record(G, M, Module::Webhook, 5_000, 1);
        assert_eq!(rec.count, 1);
        assert!(rec.triggered);

        // Still latched; the next event in-window does not fire.
        let rec = tracker.record(G, M, Module::Webhook, 6_000, 1);
        assert!(!rec.triggered);
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = EventTracker::new();
        tracker.record(G, M, Module::Ban, 0, 2);
        let other_mod = tracker.record(G, M + 1, Module::Ban, 0, 2);
        assert_eq!(other_mod.count, 1);

        let other_module = tracker.record(G, M, Module::Kick, 0, 2);
        assert_eq!(other_module.count, 1);
    }

    #[test]
    fn test_forget_and_purge() {
        let tracker = EventTracker::new();
        tracker.record(G, M, Module::Ban, 0, 3);
        tracker.record(G, M + 1, Module::Ban, 50_000, 3);
        assert_eq!(tracker.len(), 2);

        tracker.forget(G, M, Module::Ban);
        assert_eq!(tracker.len(), 1);

        tracker.purge_expired(200_000);
        assert!(tracker.is_empty());
    }

    /// The periodic sweep must only drop windows whose every stamp has
    /// decayed; a window with any in-window stamp stays.
    #[test]
    fn test_purge_keeps_live_windows() {
        let tracker = EventTracker::new();
        tracker.record(G, M, Module::Ban, 0, 3);
        tracker.record(G, M + 1, Module::Ban, 55_000, 3);

        tracker.purge_expired(70_000);
        assert_eq!(tracker.len(), 1);
        // The surviving window still counts correctly.
        let rec = tracker.record(G, M + 1, Module::Ban, 71_000, 3);
        assert_eq!(rec.count, 2);
    }
}

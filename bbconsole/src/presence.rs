//! Presence tracking for scanned peripherals.
//!
//! Scan sightings flow into a [`PresenceTracker`], which maintains the set
//! of currently live peripherals in first-seen order. Every sighting
//! refreshes a per-peripheral liveness deadline; a peripheral that is not
//! re-sighted within the window is dropped. An optional name filter keeps
//! the listing down to the device families the operator cares about.

use std::time::{Duration, Instant};

use log::trace;

use crate::transport::{Peripheral, PeripheralId};

/// Liveness window: a peripheral not re-sighted within this long is dropped.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(15);

/// Name prefixes accepted by [`default_name_filter`].
pub const DEFAULT_NAME_PREFIXES: &[&str] = &["BASIC#", "BlueBattery"];

/// The stock filter predicate: accepts the known console device families.
pub fn default_name_filter(name: &str) -> bool {
    DEFAULT_NAME_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Bucket an RSSI reading into 0..=5 signal bars for display.
pub fn signal_bars(rssi: i16) -> u8 {
    match rssi {
        -41..=0 => 5,
        -53..=-42 => 4,
        -65..=-54 => 3,
        -75..=-66 => 2,
        -97..=-76 => 1,
        _ => 0,
    }
}

/// Filter predicate over advertised names.
pub type NameFilter = Box<dyn Fn(&str) -> bool + Send>;

/// A tracked peripheral with its liveness deadline.
#[derive(Debug, Clone)]
struct PresenceEntry {
    peripheral: Peripheral,
    deadline: Instant,
}

/// The set of currently live peripherals observed during a scan.
///
/// Entries are kept in first-seen order, not sorted by signal strength or
/// name. Expired entries are removed before they can be surfaced; a
/// re-sighting replaces the old deadline rather than stacking a new one, so
/// expiry is debounced per peripheral.
pub struct PresenceTracker {
    entries: Vec<PresenceEntry>,
    window: Duration,
    filter: Option<NameFilter>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    /// Create a tracker with the default liveness window and no filter.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            window: DEFAULT_LIVENESS_WINDOW,
            filter: None,
        }
    }

    /// Override the liveness window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Install a name filter. Peripherals failing the predicate are removed
    /// rather than inserted or refreshed.
    pub fn set_filter(&mut self, filter: Option<NameFilter>) {
        self.filter = filter;
    }

    /// Record a scan sighting.
    ///
    /// Inserts or refreshes the peripheral's entry and resets its liveness
    /// deadline. Returns `true` when the live set (or a displayed attribute)
    /// changed and the listing should be redrawn.
    pub fn on_sighting(&mut self, peripheral: Peripheral) -> bool {
        self.on_sighting_at(peripheral, Instant::now())
    }

    fn on_sighting_at(&mut self, peripheral: Peripheral, now: Instant) -> bool {
        let mut changed = self.prune_at(now);

        if let Some(filter) = &self.filter {
            if !filter(&peripheral.name) {
                trace!("presence: filtered out {}", peripheral.name);
                let before = self.entries.len();
                self.entries.retain(|e| e.peripheral.id != peripheral.id);
                return changed || self.entries.len() != before;
            }
        }

        let deadline = now + self.window;
        match self
            .entries
            .iter_mut()
            .find(|e| e.peripheral.id == peripheral.id)
        {
            Some(entry) => {
                changed |= entry.peripheral != peripheral;
                entry.peripheral = peripheral;
                entry.deadline = deadline;
            },
            None => {
                trace!("presence: new peripheral {} ({})", peripheral.name, peripheral.id);
                self.entries.push(PresenceEntry {
                    peripheral,
                    deadline,
                });
                changed = true;
            },
        }

        changed
    }

    /// Remove a peripheral whose liveness deadline elapsed.
    ///
    /// Drivers that schedule their own expiry timers call this when one
    /// fires; trackers driven purely through [`PresenceTracker::list`] never
    /// need to.
    pub fn expire(&mut self, id: &PeripheralId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.peripheral.id != *id);
        self.entries.len() != before
    }

    /// Clear all entries unconditionally (scan restart).
    pub fn reset(&mut self) -> bool {
        let changed = !self.entries.is_empty();
        self.entries.clear();
        changed
    }

    /// The current live set in first-seen order, with expired entries
    /// removed.
    pub fn list(&mut self) -> Vec<Peripheral> {
        self.list_at(Instant::now())
    }

    fn list_at(&mut self, now: Instant) -> Vec<Peripheral> {
        self.prune_at(now);
        self.entries.iter().map(|e| e.peripheral.clone()).collect()
    }

    /// The earliest pending deadline, for drivers that schedule wakeups.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    fn prune_at(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.deadline > now);
        self.entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peripheral(id: &str, name: &str, rssi: i16) -> Peripheral {
        Peripheral {
            id: PeripheralId::new(id),
            name: name.to_string(),
            rssi,
        }
    }

    #[test]
    fn test_sighting_inserts_in_first_seen_order() {
        let mut tracker = PresenceTracker::new();
        let t0 = Instant::now();
        assert!(tracker.on_sighting_at(peripheral("b", "BASIC#2", -80), t0));
        assert!(tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t0));

        let names: Vec<String> = tracker.list_at(t0).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["BASIC#2", "BASIC#1"]);
    }

    #[test]
    fn test_resighting_does_not_duplicate_and_extends_deadline() {
        let mut tracker = PresenceTracker::new().with_window(Duration::from_secs(15));
        let t0 = Instant::now();
        tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t0);

        // Re-sight just before expiry; the deadline must move forward.
        let t1 = t0 + Duration::from_secs(14);
        tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t1);
        assert_eq!(tracker.list_at(t1).len(), 1);

        // Past the original deadline but within the refreshed one.
        let t2 = t0 + Duration::from_secs(20);
        assert_eq!(tracker.list_at(t2).len(), 1);

        // Past the refreshed deadline.
        let t3 = t1 + Duration::from_secs(16);
        assert!(tracker.list_at(t3).is_empty());
    }

    #[test]
    fn test_list_never_contains_expired_entries() {
        let mut tracker = PresenceTracker::new().with_window(Duration::from_secs(15));
        let t0 = Instant::now();
        tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t0);
        tracker.on_sighting_at(peripheral("b", "BASIC#2", -60), t0 + Duration::from_secs(10));

        let live = tracker.list_at(t0 + Duration::from_secs(16));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "BASIC#2");
    }

    #[test]
    fn test_filter_removes_nonmatching_entries() {
        let mut tracker = PresenceTracker::new();
        let t0 = Instant::now();
        tracker.on_sighting_at(peripheral("a", "SomethingElse", -40), t0);
        assert_eq!(tracker.list_at(t0).len(), 1);

        tracker.set_filter(Some(Box::new(default_name_filter)));

        // Re-sighting a filtered-out peripheral removes it instead of
        // refreshing it.
        assert!(tracker.on_sighting_at(peripheral("a", "SomethingElse", -40), t0));
        assert!(tracker.list_at(t0).is_empty());

        assert!(tracker.on_sighting_at(peripheral("b", "BASIC#00:11", -50), t0));
        assert_eq!(tracker.list_at(t0).len(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = PresenceTracker::new();
        let t0 = Instant::now();
        tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t0);
        tracker.on_sighting_at(peripheral("b", "BASIC#2", -60), t0);
        assert!(tracker.reset());
        assert!(tracker.list_at(t0).is_empty());
        assert!(!tracker.reset());
    }

    #[test]
    fn test_explicit_expire() {
        let mut tracker = PresenceTracker::new();
        let t0 = Instant::now();
        tracker.on_sighting_at(peripheral("a", "BASIC#1", -40), t0);
        assert!(tracker.expire(&PeripheralId::new("a")));
        assert!(!tracker.expire(&PeripheralId::new("a")));
    }

    #[test]
    fn test_signal_bars_thresholds() {
        assert_eq!(signal_bars(-30), 5);
        assert_eq!(signal_bars(-41), 5);
        assert_eq!(signal_bars(-42), 4);
        assert_eq!(signal_bars(-54), 3);
        assert_eq!(signal_bars(-66), 2);
        assert_eq!(signal_bars(-76), 1);
        assert_eq!(signal_bars(-98), 0);
    }

    #[test]
    fn test_default_name_filter() {
        assert!(default_name_filter("BASIC#00:11:22"));
        assert!(default_name_filter("BlueBattery 12V"));
        assert!(!default_name_filter("FitnessTracker"));
    }
}

//! Memory usage accounting shared between the in-memory indexing structures and
//! the session that decides when to flush them.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

/// A cloneable handle to a shared memory usage counter.
///
/// Every clone observes and updates the same underlying [`Counter`]. Components
/// record their usage through [`Reservation`]s, which keep the counter in sync
/// with the capacity they describe and give it back when dropped.
#[derive(Clone, Debug)]
pub struct MemoryTracker(Arc<TrackerNode>);

#[derive(Debug)]
struct TrackerNode {
    used: Counter,
    /// Usage above which [`MemoryTracker::exceeds_threshold`] reports `true`.
    flush_threshold: Option<u64>,
}

impl MemoryTracker {
    /// Creates a new tracker with no flush threshold.
    pub fn new() -> MemoryTracker {
        MemoryTracker(Arc::new(TrackerNode {
            used: Counter::new(0),
            flush_threshold: None,
        }))
    }

    /// Creates a new tracker that reports memory pressure once more than
    /// `threshold` bytes are in use.
    pub fn with_flush_threshold(threshold: u64) -> MemoryTracker {
        MemoryTracker(Arc::new(TrackerNode {
            used: Counter::new(0),
            flush_threshold: Some(threshold),
        }))
    }

    /// Returns the number of bytes currently recorded.
    pub fn bytes_used(&self) -> u64 {
        self.0.used.read()
    }

    /// Returns the configured flush threshold, if any.
    pub fn flush_threshold(&self) -> Option<u64> {
        self.0.flush_threshold
    }

    /// Returns `true` when the recorded usage is above the flush threshold.
    pub fn exceeds_threshold(&self) -> bool {
        self.0
            .flush_threshold
            .is_some_and(|threshold| self.bytes_used() > threshold)
    }

    /// Records `amount` bytes and returns the reservation that owns them.
    pub fn reserve(&self, amount: u64) -> Reservation {
        if amount != 0 {
            self.0.used.add(amount);
        }
        Reservation {
            tracker: self.clone(),
            amount,
        }
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A block of recorded memory usage.
///
/// The reservation can be resized as the structure it describes grows or
/// shrinks. When the reservation is dropped, its amount is subtracted from the
/// tracker.
pub struct Reservation {
    tracker: MemoryTracker,
    amount: u64,
}

impl Reservation {
    /// Currently recorded amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Sets the recorded amount, applying the difference to the tracker.
    pub fn resize(&mut self, amount: u64) {
        if amount > self.amount {
            self.tracker.0.used.add(amount - self.amount);
        } else if amount < self.amount {
            self.tracker.0.used.sub(self.amount - amount);
        }
        self.amount = amount;
    }

    /// Increases the recorded amount by `additional` bytes.
    pub fn grow(&mut self, additional: u64) {
        self.resize(self.amount + additional);
    }

    /// Releases the whole amount while keeping the reservation usable.
    pub fn release(&mut self) {
        self.resize(0);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.tracker.0.used.sub(self.amount);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_creation() {
        let tracker = MemoryTracker::new();
        assert_eq!(tracker.bytes_used(), 0);
        assert!(!tracker.exceeds_threshold());
        assert_eq!(tracker.flush_threshold(), None);
    }

    #[test]
    fn test_reservation_drop() {
        let tracker = MemoryTracker::new();
        {
            let reservation = tracker.reserve(64);
            assert_eq!(reservation.amount(), 64);
            assert_eq!(tracker.bytes_used(), 64);
        }
        assert_eq!(tracker.bytes_used(), 0);
    }

    #[test]
    fn test_reservation_resize() {
        let tracker = MemoryTracker::new();
        let mut reservation = tracker.reserve(0);
        reservation.resize(120);
        assert_eq!(tracker.bytes_used(), 120);
        reservation.grow(30);
        assert_eq!(tracker.bytes_used(), 150);
        reservation.resize(40);
        assert_eq!(tracker.bytes_used(), 40);
        reservation.release();
        assert_eq!(reservation.amount(), 0);
        assert_eq!(tracker.bytes_used(), 0);
    }

    #[test]
    fn test_shared_between_clones() {
        let tracker = MemoryTracker::new();
        let other = tracker.clone();
        let _a = tracker.reserve(10);
        let _b = other.reserve(5);
        assert_eq!(tracker.bytes_used(), 15);
        assert_eq!(other.bytes_used(), 15);
        assert_eq!(MemoryTracker::new().bytes_used(), 0);
    }

    #[test]
    fn test_flush_threshold() {
        let tracker = MemoryTracker::with_flush_threshold(100);
        let mut reservation = tracker.reserve(100);
        assert!(!tracker.exceeds_threshold());
        reservation.grow(1);
        assert!(tracker.exceeds_threshold());
        drop(reservation);
        assert!(!tracker.exceeds_threshold());
    }
}

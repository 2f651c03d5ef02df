use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe byte counter shared by the components that report memory usage
/// to an indexing session.
///
/// The counter never goes below zero: releasing more than is currently recorded
/// is an accounting bug and panics in debug builds, saturating at zero otherwise.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new `Counter` with the given initial amount.
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Adds `amount` to the counter and returns the updated value.
    pub fn add(&self, amount: u64) -> u64 {
        self.0.fetch_add(amount, Ordering::AcqRel) + amount
    }

    /// Subtracts `amount` from the counter and returns the updated value.
    pub fn sub(&self, amount: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            debug_assert!(
                current >= amount,
                "counter underflow: {current} - {amount}"
            );
            let updated = current.saturating_sub(amount);
            match self.0.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return updated,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the counter value (most likely stale by the time it is observed by the caller
    /// when other threads share the counter).
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

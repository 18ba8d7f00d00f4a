/*
    clock.rs - Logical timestamp source

    Lamport-style clock: every local write ticks the counter, every remote
    timestamp observed advances it past that value. Injected into the
    engine as a trait object so tests can control ordering deterministically.
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of logical timestamps
pub trait LogicalClock: Send + Sync {
    /// Advance the clock and return a fresh timestamp for a local write
    fn tick(&self) -> u64;

    /// Fold a remotely observed timestamp into the clock so the next local
    /// write is ordered after it
    fn observe(&self, timestamp: u64);

    /// Current value without advancing
    fn now(&self) -> u64;
}

/// Lamport counter seeded from wall-clock milliseconds, so timestamps from
/// a fresh replica land near those of long-running peers
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        LamportClock { counter: AtomicU64::new(seed) }
    }

    /// Start from an explicit value, used when rehydrating from disk
    pub fn starting_at(value: u64) -> Self {
        LamportClock { counter: AtomicU64::new(value) }
    }
}

impl Default for LamportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalClock for LamportClock {
    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe(&self, timestamp: u64) {
        self.counter.fetch_max(timestamp, Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Manually driven clock for deterministic tests
pub struct ManualClock {
    counter: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock { counter: AtomicU64::new(start) }
    }

    pub fn set(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }
}

impl LogicalClock for ManualClock {
    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe(&self, timestamp: u64) {
        self.counter.fetch_max(timestamp, Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let clock = LamportClock::starting_at(0);
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }

    #[test]
    fn test_observe_advances_past_remote() {
        let clock = LamportClock::starting_at(10);
        clock.observe(500);
        assert!(clock.tick() > 500);
    }

    #[test]
    fn test_observe_never_rewinds() {
        let clock = LamportClock::starting_at(1000);
        clock.observe(5);
        assert!(clock.now() >= 1000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(99);
        assert_eq!(clock.tick(), 100);
        clock.set(200);
        assert_eq!(clock.now(), 200);
        assert_eq!(clock.tick(), 201);
    }
}

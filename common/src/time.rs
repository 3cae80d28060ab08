// Time types and clocks used across the node.
//
// System time is non-deterministic and must never feed consensus-critical
// decisions; it is only used for fetch timestamps, logging and metrics.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Return timestamp in milliseconds
// We cast it to u64 as we have plenty of time before it overflows
#[inline]
pub fn get_current_time_in_millis() -> TimestampMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMillis)
        .unwrap_or_default()
}

/// Source of wall-clock timestamps. Abstracted so storage entries get
/// deterministic times under test.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> TimestampMillis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMillis {
        get_current_time_in_millis()
    }
}

/// Clock advanced by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn at(start: TimestampMillis) -> Self {
        ManualClock(Arc::new(AtomicU64::new(start)))
    }

    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMillis {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now(), 1_500);

        let shared = clock.clone();
        shared.advance(1);
        assert_eq!(clock.now(), 1_501);
    }
}

//! Clocks for the duty cycle: real monotonic/epoch sources plus cached
//! snapshots the conductor refreshes at most once per millisecond so
//! resource sweeps never issue a syscall per resource.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic nanosecond clock hook.
pub type NanoClock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall-clock epoch millisecond hook.
pub type EpochClock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Default monotonic source backed by `Instant`.
pub fn default_nano_clock() -> NanoClock {
    let origin = std::time::Instant::now();
    Arc::new(move || origin.elapsed().as_nanos() as i64)
}

/// Default epoch source backed by `SystemTime`.
pub fn default_epoch_clock() -> EpochClock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    })
}

/// Cached nanosecond snapshot, written by the conductor, read by resources.
#[derive(Debug, Default)]
pub struct CachedNanoClock {
    value: AtomicI64,
}

impl CachedNanoClock {
    #[inline]
    pub fn update(&self, now_ns: i64) {
        self.value.store(now_ns, Ordering::Release);
    }

    #[inline]
    pub fn nano_time(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Cached epoch-millisecond snapshot.
#[derive(Debug, Default)]
pub struct CachedEpochClock {
    value: AtomicI64,
}

impl CachedEpochClock {
    #[inline]
    pub fn update(&self, now_ms: i64) {
        self.value.store(now_ms, Ordering::Release);
    }

    #[inline]
    pub fn time(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_clocks_advance() {
        let nano = default_nano_clock();
        let a = nano();
        let b = nano();
        assert!(b >= a);

        let epoch = default_epoch_clock();
        assert!(epoch() > 1_600_000_000_000);
    }

    #[test]
    fn cached_clocks_hold_snapshots() {
        let cached = CachedNanoClock::default();
        cached.update(42);
        assert_eq!(cached.nano_time(), 42);

        let epoch = CachedEpochClock::default();
        epoch.update(99);
        assert_eq!(epoch.time(), 99);
    }
}

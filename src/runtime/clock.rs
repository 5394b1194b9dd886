use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

/// Default start time: 2020-01-01T00:00:00Z in milliseconds.
pub const DEFAULT_START_MILLIS: i64 = 1_577_836_800_000;

/// Deterministic time source of a sandbox.
///
/// Time only moves when [`SandboxClock::advance`] is called, for instance by
/// `Thread.sleep`, so code reading `System.nanoTime` or `currentTimeMillis` sees
/// the same values on every run.
#[derive(Debug)]
pub struct SandboxClock {
    nanos: AtomicI64,
    start_millis: i64,
}

impl SandboxClock {
    /// A clock at `start_millis` wall time and zero nano time.
    #[must_use]
    pub fn new(start_millis: i64) -> Self {
        SandboxClock {
            nanos: AtomicI64::new(0),
            start_millis,
        }
    }

    /// Monotonic nanoseconds since the clock was created.
    #[must_use]
    pub fn nano_time(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }

    /// Wall time in milliseconds since the epoch.
    #[must_use]
    pub fn current_time_millis(&self) -> i64 {
        self.start_millis + self.nano_time() / 1_000_000
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        let nanos = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| Some(now.saturating_add(nanos)));
    }
}

impl Default for SandboxClock {
    fn default() -> Self {
        SandboxClock::new(DEFAULT_START_MILLIS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_both_clocks() {
        let clock = SandboxClock::default();
        assert_eq!(clock.nano_time(), 0);
        assert_eq!(clock.current_time_millis(), DEFAULT_START_MILLIS);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.nano_time(), 1_500_000_000);
        assert_eq!(clock.current_time_millis(), DEFAULT_START_MILLIS + 1500);
    }
}

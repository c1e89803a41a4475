//! Coordination counters and periodic rate logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between the simulation and render threads.
///
/// Each counter has a single writer; readers only get approximate,
/// monotonically increasing values.
#[derive(Debug, Default)]
pub struct RunnerStats {
    simulated_steps: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    returned: AtomicU64,
    frames: AtomicU64,
    swaps: AtomicU64,
}

/// Plain copy of [`RunnerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Compute submissions made by the worker.
    pub simulated_steps: u64,
    /// Results placed in the mailbox.
    pub published: u64,
    /// Results displaced from the mailbox before the render loop took them.
    pub dropped: u64,
    /// Slots recycled after their return fence signaled.
    pub returned: u64,
    /// Frames that asked the mailbox for a buffer.
    pub frames: u64,
    /// Frames that switched to a newer buffer.
    pub swaps: u64,
}

impl RunnerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_step(&self) {
        self.simulated_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish(&self, displaced: bool) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if displaced {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_returned(&self, count: u64) {
        self.returned.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self, swapped: bool) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        if swapped {
            self.swaps.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            simulated_steps: self.simulated_steps.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
        }
    }
}

/// Counts events and reports the count once per interval.
///
/// Owned by a single thread, so no synchronization is involved.
#[derive(Debug)]
pub struct RateLog {
    interval: Duration,
    count: u64,
    since: Instant,
}

impl RateLog {
    /// Report once per second.
    pub fn per_second(now: Instant) -> Self {
        Self::new(Duration::from_secs(1), now)
    }

    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            count: 0,
            since: now,
        }
    }

    /// Restart the window without reporting.
    pub fn restart(&mut self, now: Instant) {
        self.count = 0;
        self.since = now;
    }

    /// Count one event.
    ///
    /// Once more than the interval has passed, returns the number of events in
    /// the window (excluding this one) and its length, then starts a new window
    /// that includes this event.
    pub fn tick(&mut self, now: Instant) -> Option<(u64, Duration)> {
        let elapsed = now.saturating_duration_since(self.since);
        let report = if elapsed > self.interval {
            let count = self.count;
            self.restart(now);
            Some((count, elapsed))
        } else {
            None
        };
        self.count += 1;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_drops_and_swaps() {
        let stats = RunnerStats::new();
        stats.record_publish(false);
        stats.record_publish(true);
        stats.record_frame(true);
        stats.record_frame(false);
        stats.record_returned(2);

        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.swaps, 1);
        assert_eq!(snap.returned, 2);
    }

    #[test]
    fn rate_log_reports_after_interval() {
        let start = Instant::now();
        let mut log = RateLog::new(Duration::from_millis(100), start);

        for i in 0..5 {
            assert!(log.tick(start + Duration::from_millis(i * 10)).is_none());
        }

        let (count, elapsed) = log.tick(start + Duration::from_millis(150)).unwrap();
        assert_eq!(count, 5);
        assert_eq!(elapsed, Duration::from_millis(150));

        // New window started with the reporting tick counted.
        let (count, _) = log.tick(start + Duration::from_millis(300)).unwrap();
        assert_eq!(count, 1);
    }
}

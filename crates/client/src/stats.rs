use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// A point-in-time sample of the client supervisor's stats subsystem (spec
/// §4.9: `{connected, new, throttle, goroutines, cpus}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections currently open.
    pub connected: usize,
    /// Connections opened since the previous sample.
    pub new: usize,
    /// Free slots left in the global connection throttle.
    pub throttle_available: usize,
    /// Running worker tasks (reader + writer lanes counted once per server).
    pub goroutines: usize,
    /// CPUs detected on this host, for context on the throttle capacity.
    pub cpus: usize,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "connected={} new={} throttle={} goroutines={} cpus={}",
            self.connected, self.new, self.throttle_available, self.goroutines, self.cpus
        )
    }
}

/// Live counters the stats subsystem samples from (spec §4.9, §5).
#[derive(Debug, Default)]
pub struct StatsTracker {
    connected: AtomicUsize,
    new: AtomicUsize,
    goroutines: AtomicUsize,
}

impl StatsTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
        self.new.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.goroutines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self) {
        self.goroutines.fetch_sub(1, Ordering::Relaxed);
    }

    /// Builds a snapshot, resetting the `new` counter since it measures
    /// connections opened since the last sample rather than a running total.
    #[must_use]
    pub fn snapshot(&self, throttle_available: usize) -> StatsSnapshot {
        StatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            new: self.new.swap(0, Ordering::Relaxed),
            throttle_available,
            goroutines: self.goroutines.load(Ordering::Relaxed),
            cpus: num_cpus::get(),
        }
    }
}

/// Periodically logs a [`StatsSnapshot`] until `cancel` fires, or emits one
/// immediately on a user-driven interrupt (spec §4.9: "every few seconds or
/// on a user-driven interrupt signal... emit... to a log stream"). An
/// interactive pause-resume overlay is a terminal-UI concern that belongs to
/// the binary crates, not this library.
pub async fn run_periodic_log(
    tracker: Arc<StatsTracker>,
    throttle: Arc<Semaphore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let snapshot = tracker.snapshot(throttle.available_permits());
                tracing::info!(%snapshot, "client stats");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_resets_new_counter_but_keeps_connected() {
        let tracker = StatsTracker::new();
        tracker.connection_opened();
        tracker.connection_opened();
        let first = tracker.snapshot(4);
        assert_eq!(first.connected, 2);
        assert_eq!(first.new, 2);

        let second = tracker.snapshot(4);
        assert_eq!(second.connected, 2);
        assert_eq!(second.new, 0);
    }

    #[test]
    fn connection_closed_decrements_connected_only() {
        let tracker = StatsTracker::new();
        tracker.connection_opened();
        tracker.connection_closed();
        let snapshot = tracker.snapshot(1);
        assert_eq!(snapshot.connected, 0);
        assert_eq!(snapshot.new, 1);
    }
}

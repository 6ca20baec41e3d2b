//! Per-session liveness tracking.
//!
//! Heartbeats arrive on the datagram path and are recorded on a
//! [`LivenessClock`] shared between the registry and the session task. The
//! session task runs [`watchdog`], which resolves once the clock has gone
//! stale. Dropping the watchdog future cancels it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::trace;

use lookout_core::MonitorConfig;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Time of the last heartbeat, readable and resettable from any task.
#[derive(Debug)]
pub struct LivenessClock {
    origin: Instant,
    /// Milliseconds after `origin` of the last reset.
    last_ms: AtomicU64,
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessClock {
    /// A clock whose last heartbeat is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        saturating_millis(self.origin.elapsed())
    }

    /// Records a heartbeat.
    pub fn reset(&self) {
        self.last_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the last heartbeat.
    pub fn elapsed(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

/// Waits until `clock` has been silent for longer than the eviction threshold.
///
/// Sleeps for the grace period first, then checks every watchdog interval.
/// Returns the observed silence.
pub async fn watchdog(clock: &LivenessClock, config: &MonitorConfig) -> Duration {
    sleep(config.watchdog_grace()).await;

    let threshold = config.eviction_threshold();
    let mut ticker = interval(config.watchdog_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let elapsed = clock.elapsed();
        if elapsed > threshold {
            return elapsed;
        }
        trace!(elapsed_ms = saturating_millis(elapsed), "Heartbeat fresh");
    }
}

//! Virtual clock implementing BattleContext for deterministic battles.

use crate::context::BattleContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time virtual zero maps to (2024-01-01 00:00:00 UTC).
pub const EPOCH_SECS: u64 = 1704067200;

#[derive(Debug, Default)]
struct VirtualClock {
    elapsed_ns: AtomicU64,
    sleeps: AtomicU64,
}

/// Battle context backed by a virtual clock.
///
/// Sleeping advances virtual time instead of waiting, so paced recordings
/// and the final-frame pause cost nothing while episode durations stay
/// exact. Clones share one clock.
#[derive(Debug, Clone, Default)]
pub struct SimContext {
    clock: Arc<VirtualClock>,
}

impl SimContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped context for a `RunManager`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Moves the clock forward without counting a sleep.
    pub fn advance_time(&self, duration: Duration) {
        self.clock
            .elapsed_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Virtual nanoseconds since start.
    pub fn time_ns(&self) -> u64 {
        self.clock.elapsed_ns.load(Ordering::SeqCst)
    }

    /// Number of `sleep` calls so far.
    pub fn sleep_count(&self) -> u64 {
        self.clock.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BattleContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(EPOCH_SECS) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.clock.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance_time(duration);
    }
}

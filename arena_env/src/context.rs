//! Clock context trait for the battle orchestrator.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// The central interface for time.
///
/// This trait abstracts the wall clock so that the battle loop can pace
/// rendering and measure episode durations in production (tokio) and under a
/// virtual clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - a virtual clock advanced by sleeping
#[async_trait]
pub trait BattleContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Used for episode duration measurements.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Used for the `finished_at` stamp of merged episode recordings.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);
}

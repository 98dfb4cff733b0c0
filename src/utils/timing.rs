//! Timing utilities
//!
//! The [`Clock`] trait is the engine's only source of time. Governor waits and
//! retry backoff both go through it, so tests can swap in a virtual clock and
//! never sleep for real.

use async_trait::async_trait;
use log::{debug, info};
use std::fmt;
use std::time::{Duration, Instant};

/// Source of "now" plus the suspension primitive used for every wait.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    /// Suspend the calling task. Must not block the executor thread.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// A timer for measuring operation durations
#[derive(Debug)]
pub struct Timer {
    start_time: Instant,
    operation_name: String,
    checkpoints: Vec<(&'static str, Instant)>,
}

impl Timer {
    /// Create a new timer for the given operation
    pub fn start(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        debug!("⏱️ Starting timer for: {}", operation_name);

        Self {
            start_time: Instant::now(),
            operation_name,
            checkpoints: Vec::new(),
        }
    }

    /// Add a checkpoint to track intermediate timing
    pub fn checkpoint(&mut self, checkpoint_name: &'static str) {
        let now = Instant::now();
        self.checkpoints.push((checkpoint_name, now));
        debug!(
            "📍 {} - {}: {}ms",
            self.operation_name,
            checkpoint_name,
            now.duration_since(self.start_time).as_millis()
        );
    }

    /// Finish the timer and log the total duration along with a short outcome note
    pub fn finish(self, outcome: &str) -> Duration {
        let total_duration = self.start_time.elapsed();

        info!(
            "🕐 {} {} in {}ms",
            self.operation_name,
            outcome,
            total_duration.as_millis()
        );

        let mut last_time = self.start_time;
        for (name, time) in &self.checkpoints {
            debug!("   └─ {}: {}ms", name, time.duration_since(last_time).as_millis());
            last_time = *time;
        }

        total_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_clock_sleeps() {
        let clock = TokioClock;
        let t1 = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!(clock.now().duration_since(t1) >= Duration::from_millis(10));
    }

    #[test]
    fn test_timer_measures_elapsed() {
        let mut timer = Timer::start("unit");
        std::thread::sleep(Duration::from_millis(5));
        timer.checkpoint("slept");
        assert!(timer.finish("completed") >= Duration::from_millis(5));
    }
}

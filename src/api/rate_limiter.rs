// src/api/rate_limiter.rs
//! Per-endpoint request governor
//!
//! Every endpoint key gets its own state slot behind an async mutex:
//! - a minimum interval between any two dispatches, failed ones included
//! - a fixed window with a call ceiling that resets when the window elapses;
//!   only successful dispatches count against it
//!
//! Callers targeting the same key queue on that key's lock, so their waits are
//! serialized. Different keys never share a lock.

use crate::api::types::EndpointKey;
use crate::error::{Result, SearchError};
use crate::utils::Clock;
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Request budget for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    pub window: Duration,
    pub window_ceiling: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            window: Duration::from_secs(60),
            window_ceiling: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self, endpoint: EndpointKey) -> Result<()> {
        if self.window.is_zero() {
            return Err(SearchError::Config(format!(
                "rate window for '{}' must be greater than zero",
                endpoint
            )));
        }
        if self.window_ceiling == 0 {
            return Err(SearchError::Config(format!(
                "rate window ceiling for '{}' must be at least 1",
                endpoint
            )));
        }
        Ok(())
    }
}

/// Mutable bookkeeping for one endpoint. Only touched under its slot lock.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    /// Last call that went out on the wire, whatever its outcome.
    last_attempt: Option<Instant>,
    /// Last call credited through `record_dispatch`.
    last_dispatch: Option<Instant>,
    window_start: Option<Instant>,
    window_count: u32,
}

impl RateState {
    fn roll_window(&mut self, config: &RateLimitConfig, now: Instant) {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) >= config.window {
                self.window_start = Some(now);
                self.window_count = 0;
            }
        }
    }

    /// How long to wait before the next dispatch. Opens or rolls the window
    /// as a side effect; never credits a dispatch.
    fn delay_before(&mut self, config: &RateLimitConfig, now: Instant) -> Duration {
        if self.window_start.is_none() {
            self.window_start = Some(now);
            self.window_count = 0;
            return Duration::ZERO;
        }
        self.roll_window(config, now);

        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < config.min_interval {
                return config.min_interval - elapsed;
            }
        }

        if self.window_count >= config.window_ceiling {
            if let Some(start) = self.window_start {
                return (start + config.window).saturating_duration_since(now);
            }
        }

        Duration::ZERO
    }

    fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    fn record_dispatch(&mut self, config: &RateLimitConfig, now: Instant) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.roll_window(config, now);
        self.last_attempt = Some(now);
        self.last_dispatch = Some(now);
        self.window_count = self.window_count.saturating_add(1);
    }
}

type Slot = Arc<Mutex<RateState>>;

/// Governs outbound dispatch timing for every endpoint key.
#[derive(Clone)]
pub struct RateGovernor {
    slots: Arc<DashMap<EndpointKey, Slot>>,
    configs: Arc<HashMap<EndpointKey, RateLimitConfig>>,
    default_config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateGovernor")
            .field("configs", &self.configs)
            .field("default_config", &self.default_config)
            .field("tracked_endpoints", &self.slots.len())
            .finish()
    }
}

impl RateGovernor {
    pub fn new(
        configs: HashMap<EndpointKey, RateLimitConfig>,
        default_config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        for endpoint in EndpointKey::ALL {
            configs
                .get(&endpoint)
                .unwrap_or(&default_config)
                .validate(endpoint)?;
        }

        for (endpoint, config) in &configs {
            info!(
                "🚦 Rate governor for {}: min interval {:?}, {} calls per {:?}",
                endpoint, config.min_interval, config.window_ceiling, config.window
            );
        }

        Ok(Self {
            slots: Arc::new(DashMap::new()),
            configs: Arc::new(configs),
            default_config,
            clock,
        })
    }

    /// Same budget for every endpoint.
    pub fn uniform(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(HashMap::new(), config, clock)
    }

    pub fn config_for(&self, endpoint: EndpointKey) -> RateLimitConfig {
        self.configs
            .get(&endpoint)
            .copied()
            .unwrap_or(self.default_config)
    }

    fn slot(&self, endpoint: EndpointKey) -> Slot {
        // Clone the Arc out so the shard lock is released before any await.
        self.slots
            .entry(endpoint)
            .or_insert_with(|| Arc::new(Mutex::new(RateState::default())))
            .value()
            .clone()
    }

    /// Delay the caller must observe before dispatching to `endpoint`.
    pub async fn delay_before(&self, endpoint: EndpointKey) -> Duration {
        let config = self.config_for(endpoint);
        let slot = self.slot(endpoint);
        let mut state = slot.lock().await;
        state.delay_before(&config, self.clock.now())
    }

    /// Credit one completed dispatch to `endpoint`.
    pub async fn record_dispatch(&self, endpoint: EndpointKey) {
        let config = self.config_for(endpoint);
        let slot = self.slot(endpoint);
        let mut state = slot.lock().await;
        state.record_dispatch(&config, self.clock.now());
    }

    /// Wait until `endpoint` may be dispatched to and return a permit holding
    /// the endpoint's lock. Dropping the permit without recording gives no
    /// window credit, which is what happens on failure or cancellation.
    pub async fn acquire(&self, endpoint: EndpointKey) -> DispatchPermit {
        let config = self.config_for(endpoint);
        let mut guard = self.slot(endpoint).lock_owned().await;

        loop {
            let delay = guard.delay_before(&config, self.clock.now());
            if delay.is_zero() {
                break;
            }
            debug!("⏳ {} governor wait {:?}", endpoint, delay);
            self.clock.sleep(delay).await;
        }

        DispatchPermit {
            endpoint,
            config,
            guard,
            clock: Arc::clone(&self.clock),
        }
    }

    pub async fn stats(&self, endpoint: EndpointKey) -> RateStats {
        let config = self.config_for(endpoint);
        let slot = self.slot(endpoint);
        let mut state = slot.lock().await;
        let now = self.clock.now();
        state.roll_window(&config, now);

        RateStats {
            endpoint,
            window_count: state.window_count,
            window_ceiling: config.window_ceiling,
            min_interval: config.min_interval,
            since_last_dispatch: state
                .last_dispatch
                .map(|last| now.saturating_duration_since(last)),
        }
    }

    /// Stats for every endpoint that has been touched so far.
    pub async fn snapshot(&self) -> Vec<RateStats> {
        let mut endpoints: Vec<EndpointKey> = self.slots.iter().map(|e| *e.key()).collect();
        endpoints.sort();

        let mut stats = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            stats.push(self.stats(endpoint).await);
        }
        stats
    }
}

/// Exclusive right to dispatch one call to an endpoint.
pub struct DispatchPermit {
    endpoint: EndpointKey,
    config: RateLimitConfig,
    guard: OwnedMutexGuard<RateState>,
    clock: Arc<dyn Clock>,
}

impl DispatchPermit {
    pub fn endpoint(&self) -> EndpointKey {
        self.endpoint
    }

    /// Stamp the moment the call goes out. The next dispatch on this key is
    /// spaced from here even if this one fails and is never recorded.
    pub fn mark_attempt(&mut self) {
        let now = self.clock.now();
        self.guard.mark_attempt(now);
    }

    /// Credit the dispatch and release the endpoint.
    pub fn record_dispatch(mut self) {
        let now = self.clock.now();
        self.guard.record_dispatch(&self.config, now);
        debug!(
            "📊 {} dispatch recorded ({}/{} in window)",
            self.endpoint, self.guard.window_count, self.config.window_ceiling
        );
    }
}

impl fmt::Debug for DispatchPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPermit")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Rate limiting statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateStats {
    pub endpoint: EndpointKey,
    pub window_count: u32,
    pub window_ceiling: u32,
    pub min_interval: Duration,
    pub since_last_dispatch: Option<Duration>,
}

impl fmt::Display for RateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} in window, min interval {:?}, last dispatch {:?} ago",
            self.endpoint,
            self.window_count,
            self.window_ceiling,
            self.min_interval,
            self.since_last_dispatch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClock;
    use pretty_assertions::assert_eq;

    fn governor(config: RateLimitConfig, clock: &MockClock) -> RateGovernor {
        RateGovernor::uniform(config, Arc::new(clock.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_first_call_opens_window_without_delay() {
        let clock = MockClock::new();
        let gov = governor(RateLimitConfig::default(), &clock);

        assert_eq!(gov.delay_before(EndpointKey::News).await, Duration::ZERO);
        let stats = gov.stats(EndpointKey::News).await;
        assert_eq!(stats.window_count, 0);
        assert_eq!(stats.since_last_dispatch, None);
    }

    #[tokio::test]
    async fn test_min_interval_returns_remaining_wait() {
        let clock = MockClock::new();
        let gov = governor(
            RateLimitConfig {
                min_interval: Duration::from_millis(500),
                window: Duration::from_secs(60),
                window_ceiling: 100,
            },
            &clock,
        );

        gov.delay_before(EndpointKey::Blog).await;
        gov.record_dispatch(EndpointKey::Blog).await;
        clock.advance(Duration::from_millis(200));

        assert_eq!(
            gov.delay_before(EndpointKey::Blog).await,
            Duration::from_millis(300)
        );

        clock.advance(Duration::from_millis(300));
        assert_eq!(gov.delay_before(EndpointKey::Blog).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_window_ceiling_and_reset() {
        let clock = MockClock::new();
        let gov = governor(
            RateLimitConfig {
                min_interval: Duration::ZERO,
                window: Duration::from_secs(10),
                window_ceiling: 3,
            },
            &clock,
        );

        for _ in 0..3 {
            assert_eq!(gov.delay_before(EndpointKey::News).await, Duration::ZERO);
            gov.record_dispatch(EndpointKey::News).await;
            clock.advance(Duration::from_secs(1));
        }

        // Window opened at t=0, now t=3s.
        assert_eq!(
            gov.delay_before(EndpointKey::News).await,
            Duration::from_secs(7)
        );
        assert_eq!(gov.stats(EndpointKey::News).await.window_count, 3);

        clock.advance(Duration::from_secs(7));
        assert_eq!(gov.delay_before(EndpointKey::News).await, Duration::ZERO);
        assert_eq!(gov.stats(EndpointKey::News).await.window_count, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let clock = MockClock::new();
        let gov = governor(
            RateLimitConfig {
                min_interval: Duration::from_secs(5),
                window: Duration::from_secs(60),
                window_ceiling: 10,
            },
            &clock,
        );

        gov.delay_before(EndpointKey::News).await;
        gov.record_dispatch(EndpointKey::News).await;

        assert!(gov.delay_before(EndpointKey::News).await > Duration::ZERO);
        assert_eq!(gov.delay_before(EndpointKey::Blog).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_acquire_sleeps_through_the_clock() {
        let clock = MockClock::new();
        let gov = governor(
            RateLimitConfig {
                min_interval: Duration::from_millis(250),
                window: Duration::from_secs(60),
                window_ceiling: 10,
            },
            &clock,
        );

        gov.acquire(EndpointKey::Trending).await.record_dispatch();
        gov.acquire(EndpointKey::Trending).await.record_dispatch();

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
        assert_eq!(gov.stats(EndpointKey::Trending).await.window_count, 2);
    }

    #[tokio::test]
    async fn test_dropped_permit_gives_no_credit() {
        let clock = MockClock::new();
        let gov = governor(RateLimitConfig::default(), &clock);

        let permit = gov.acquire(EndpointKey::News).await;
        drop(permit);

        let stats = gov.stats(EndpointKey::News).await;
        assert_eq!(stats.window_count, 0);
        assert_eq!(stats.since_last_dispatch, None);
        assert_eq!(gov.delay_before(EndpointKey::News).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_failed_attempt_still_spaces_next_dispatch() {
        let clock = MockClock::new();
        let gov = governor(
            RateLimitConfig {
                min_interval: Duration::from_millis(500),
                window: Duration::from_secs(60),
                window_ceiling: 10,
            },
            &clock,
        );

        let mut permit = gov.acquire(EndpointKey::News).await;
        permit.mark_attempt();
        drop(permit);
        clock.advance(Duration::from_millis(100));

        assert_eq!(
            gov.delay_before(EndpointKey::News).await,
            Duration::from_millis(400)
        );
        let stats = gov.stats(EndpointKey::News).await;
        assert_eq!(stats.window_count, 0);
        assert_eq!(stats.since_last_dispatch, None);

        gov.acquire(EndpointKey::News).await.record_dispatch();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(400)]);
        assert_eq!(gov.stats(EndpointKey::News).await.window_count, 1);
    }

    #[tokio::test]
    async fn test_per_endpoint_override() {
        let clock = MockClock::new();
        let mut configs = HashMap::new();
        configs.insert(
            EndpointKey::Trending,
            RateLimitConfig {
                min_interval: Duration::from_secs(2),
                ..RateLimitConfig::default()
            },
        );
        let gov = RateGovernor::new(configs, RateLimitConfig::default(), Arc::new(clock)).unwrap();

        assert_eq!(
            gov.config_for(EndpointKey::Trending).min_interval,
            Duration::from_secs(2)
        );
        assert_eq!(
            gov.config_for(EndpointKey::News).min_interval,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = MockClock::new();
        let result = RateGovernor::uniform(
            RateLimitConfig {
                window_ceiling: 0,
                ..RateLimitConfig::default()
            },
            Arc::new(clock),
        );
        assert!(matches!(result, Err(SearchError::Config(_))));
    }

    #[tokio::test]
    async fn test_snapshot_lists_touched_endpoints() {
        let clock = MockClock::new();
        let gov = governor(RateLimitConfig::default(), &clock);
        gov.acquire(EndpointKey::Blog).await.record_dispatch();
        gov.acquire(EndpointKey::News).await.record_dispatch();

        let snapshot = gov.snapshot().await;
        let endpoints: Vec<EndpointKey> = snapshot.iter().map(|s| s.endpoint).collect();
        assert_eq!(endpoints, vec![EndpointKey::News, EndpointKey::Blog]);
        assert!(snapshot[0].to_string().contains("1/30"));
    }
}

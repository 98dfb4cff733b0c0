//! Test doubles
//!
//! Shared by unit tests and the `tests/` integration suite:
//! - [`MockClock`]: virtual time; `sleep` advances it instantly
//! - [`MockTransport`]: scripted responses, records every call

use crate::api::executor::ExecutorSettings;
use crate::api::retry::RetryPolicy;
use crate::api::transport::{HttpResponse, OutboundRequest, Transport};
use crate::api::types::{EndpointKey, QueryParams};
use crate::config::settings::{default_path, DEFAULT_API_URL};
use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::utils::Clock;
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test must not poison the double for the rest of the run.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    now: Instant,
    sleeps: Vec<Duration>,
}

/// Virtual clock. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            state: Arc::new(Mutex::new(ClockState {
                origin,
                now: origin,
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = lock(&self.state);
        state.now += duration;
    }

    /// Virtual time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        let state = lock(&self.state);
        state.now.duration_since(state.origin)
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        lock(&self.state).now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = lock(&self.state);
            state.now += duration;
            state.sleeps.push(duration);
        }
        // Give other tasks a chance to observe the new time.
        tokio::task::yield_now().await;
    }
}

/// One request as seen by the transport.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: EndpointKey,
    pub url: Url,
    pub query: QueryParams,
    /// Virtual dispatch time, when the transport was built with a clock.
    pub at: Option<Instant>,
}

type Scripted = std::result::Result<HttpResponse, TransportError>;

#[derive(Debug, Default)]
struct TransportState {
    routes: HashMap<EndpointKey, Scripted>,
    queue: VecDeque<Scripted>,
    fallback: Option<Scripted>,
    calls: Vec<RecordedCall>,
}

/// Answers from, in order: a per-endpoint route, the scripted queue, the
/// fallback. With none of them set every call fails with a transport error.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
    clock: Option<Arc<dyn Clock>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every recorded call with `clock.now()`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            clock: Some(clock),
        }
    }

    pub fn push_response(&self, response: HttpResponse) {
        lock(&self.state).queue.push_back(Ok(response));
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(HttpResponse::json(status, &body));
    }

    pub fn push_error(&self, error: TransportError) {
        lock(&self.state).queue.push_back(Err(error));
    }

    pub fn always(&self, outcome: Scripted) {
        lock(&self.state).fallback = Some(outcome);
    }

    pub fn always_fail(&self, error: TransportError) {
        self.always(Err(error));
    }

    /// Fixed answer for one endpoint, for calls whose order is not fixed.
    pub fn route(&self, endpoint: EndpointKey, outcome: Scripted) {
        lock(&self.state).routes.insert(endpoint, outcome);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_for(&self, endpoint: EndpointKey) -> Vec<RecordedCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state).calls.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &OutboundRequest) -> std::result::Result<HttpResponse, TransportError> {
        let at = self.clock.as_ref().map(|clock| clock.now());
        let mut state = lock(&self.state);
        state.calls.push(RecordedCall {
            endpoint: request.endpoint,
            url: request.url.clone(),
            query: request.query.clone(),
            at,
        });
        debug!("mock transport call #{} to {}", state.calls.len(), request.endpoint);

        if let Some(outcome) = state.routes.get(&request.endpoint) {
            return outcome.clone();
        }
        if let Some(outcome) = state.queue.pop_front() {
            return outcome;
        }
        state
            .fallback
            .clone()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response".to_string())))
    }
}

/// Executor settings with short backoff (100ms base, 10s cap, 3 attempts).
pub fn default_executor_settings() -> ExecutorSettings {
    ExecutorSettings {
        api_base_url: DEFAULT_API_URL.to_string(),
        endpoint_paths: EndpointKey::ALL
            .iter()
            .map(|&endpoint| (endpoint, default_path(endpoint).to_string()))
            .collect(),
        request_timeout: Duration::from_secs(10),
        retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10)),
        credential_error_codes: ["024", "025"].iter().map(|c| c.to_string()).collect(),
    }
}

/// Config with test credentials and the same short backoff as
/// [`default_executor_settings`]. Extra `(name, value)` pairs override.
pub fn test_config(overrides: &[(&str, &str)]) -> Result<Config> {
    let mut vars: HashMap<String, String> = [
        ("NAVER_CLIENT_ID", "test-client-id"),
        ("NAVER_CLIENT_SECRET", "test-client-secret"),
        ("RETRY_BASE_DELAY_MS", "100"),
        ("RETRY_MAX_DELAY_MS", "10000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (name, value) in overrides {
        vars.insert(name.to_string(), value.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned())
}

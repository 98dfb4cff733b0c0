//! Request executor: governor wait, dispatch, classify, retry.

use crate::api::rate_limiter::RateGovernor;
use crate::api::retry::{RetryMachine, RetryPolicy};
use crate::api::transport::{HttpResponse, OutboundRequest, Transport};
use crate::api::types::{ApiEnvelope, ApiPayload, EndpointKey, QueryParams};
use crate::error::{Result, SearchError, TransportError};
use crate::utils::Clock;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Everything the executor needs to know about the upstream.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub api_base_url: String,
    pub endpoint_paths: HashMap<EndpointKey, String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub credential_error_codes: HashSet<String>,
}

impl ExecutorSettings {
    fn resolve_urls(&self) -> Result<HashMap<EndpointKey, Url>> {
        let base = Url::parse(&self.api_base_url)?;
        self.endpoint_paths
            .iter()
            .map(|(endpoint, path)| -> Result<(EndpointKey, Url)> {
                Ok((*endpoint, base.join(path)?))
            })
            .collect()
    }
}

/// Result of one attempt, before the retry decision.
enum Outcome {
    Success(ApiPayload),
    Transient(TransportError),
    Terminal(SearchError),
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    credential_failures: AtomicU64,
    connectivity_failures: AtomicU64,
    protocol_failures: AtomicU64,
    upstream_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorMetrics {
    pub attempts: u64,
    pub retries: u64,
    pub successes: u64,
    pub credential_failures: u64,
    pub connectivity_failures: u64,
    pub protocol_failures: u64,
    pub upstream_failures: u64,
}

impl Counters {
    fn record_failure(&self, err: &SearchError) {
        let counter = match err {
            SearchError::Credential(_) => &self.credential_failures,
            SearchError::Connectivity { .. } => &self.connectivity_failures,
            SearchError::Protocol(_) => &self.protocol_failures,
            SearchError::Upstream { .. } => &self.upstream_failures,
            SearchError::InvalidInput(_) | SearchError::Config(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorMetrics {
        ExecutorMetrics {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            credential_failures: self.credential_failures.load(Ordering::Relaxed),
            connectivity_failures: self.connectivity_failures.load(Ordering::Relaxed),
            protocol_failures: self.protocol_failures.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

/// Owns the outbound call lifecycle. The only component that decides
/// between retrying and propagating.
#[derive(Clone)]
pub struct RequestExecutor {
    urls: Arc<HashMap<EndpointKey, Url>>,
    settings: Arc<ExecutorSettings>,
    transport: Arc<dyn Transport>,
    governor: RateGovernor,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("urls", &self.urls)
            .field("retry", &self.settings.retry)
            .field("request_timeout", &self.settings.request_timeout)
            .field("transport", &self.transport)
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(
        settings: ExecutorSettings,
        transport: Arc<dyn Transport>,
        governor: RateGovernor,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.retry.validate()?;
        let urls = settings.resolve_urls()?;

        Ok(Self {
            urls: Arc::new(urls),
            settings: Arc::new(settings),
            transport,
            governor,
            clock,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.counters.snapshot()
    }

    pub async fn execute(&self, endpoint: EndpointKey, params: &QueryParams) -> Result<ApiPayload> {
        let url = self.urls.get(&endpoint).cloned().ok_or_else(|| {
            SearchError::Config(format!("no path configured for endpoint '{}'", endpoint))
        })?;
        let request = OutboundRequest {
            endpoint,
            url,
            query: params.clone(),
            timeout: self.settings.request_timeout,
        };

        let request_id = Uuid::new_v4().simple().to_string();
        let label = format!("[{}] {}", &request_id[..8], endpoint);
        let mut machine = RetryMachine::new(self.settings.retry.clone(), label.clone());

        loop {
            machine.begin_wait();
            let mut permit = self.governor.acquire(endpoint).await;

            machine.begin_dispatch();
            permit.mark_attempt();
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(
                "{} dispatching attempt {}/{}",
                label,
                machine.attempt() + 1,
                machine.max_attempts()
            );

            let outcome = match self.transport.get(&request).await {
                Ok(response) => self.classify(endpoint, response),
                Err(cause) => Outcome::Transient(cause),
            };

            match outcome {
                Outcome::Success(payload) => {
                    permit.record_dispatch();
                    machine.succeed();
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "✅ {} returned {} item(s) after {} attempt(s)",
                        label,
                        payload.items.len(),
                        machine.attempts_made()
                    );
                    return Ok(payload);
                }
                Outcome::Terminal(err) => {
                    drop(permit);
                    machine.fail();
                    self.counters.record_failure(&err);
                    error!("❌ {} failed without retry: {}", label, err);
                    return Err(err);
                }
                Outcome::Transient(cause) => {
                    // Release the endpoint before backing off.
                    drop(permit);
                    match machine.on_transient_failure() {
                        Some(delay) => {
                            self.counters.retries.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "🔄 {} attempt {}/{} failed: {} (retrying in {:?})",
                                label,
                                machine.attempt(),
                                machine.max_attempts(),
                                cause,
                                delay
                            );
                            self.clock.sleep(delay).await;
                        }
                        None => {
                            let err = SearchError::Connectivity {
                                attempts: machine.attempts_made(),
                                cause,
                            };
                            self.counters.record_failure(&err);
                            error!("❌ {} gave up: {}", label, err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Minimal news request used as a start-up connection test.
    pub async fn probe(&self) -> Result<()> {
        let params = QueryParams::new().with("query", "naver").with("display", 1);
        self.execute(EndpointKey::News, &params).await.map(|_| ())
    }

    fn is_credential_code(&self, code: &str) -> bool {
        self.settings.credential_error_codes.contains(code)
    }

    fn classify_error_code(&self, code: String, message: Option<String>) -> SearchError {
        let message = message.unwrap_or_else(|| "no error message".to_string());
        if self.is_credential_code(&code) {
            SearchError::Credential(format!("upstream rejected credentials [{}]: {}", code, message))
        } else {
            SearchError::Upstream { code, message }
        }
    }

    fn classify(&self, endpoint: EndpointKey, response: HttpResponse) -> Outcome {
        let envelope = serde_json::from_str::<ApiEnvelope>(&response.body);

        if !response.is_success() {
            if let Ok(envelope) = &envelope {
                if let Some(code) = envelope.error_code() {
                    let permanent_client_error = (400..500).contains(&response.status)
                        && response.status != 408
                        && response.status != 429;
                    if self.is_credential_code(&code) || permanent_client_error {
                        return Outcome::Terminal(
                            self.classify_error_code(code, envelope.error_message.clone()),
                        );
                    }
                }
            }
            if response.status == 401 {
                return Outcome::Terminal(SearchError::Credential(
                    "upstream rejected credentials (HTTP 401)".to_string(),
                ));
            }
            return Outcome::Transient(TransportError::status(response.status, &response.body));
        }

        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(err) => {
                return Outcome::Terminal(SearchError::Protocol(format!(
                    "{} response is not the expected JSON object: {}",
                    endpoint, err
                )))
            }
        };

        if let Some(code) = envelope.error_code() {
            return Outcome::Terminal(self.classify_error_code(code, envelope.error_message));
        }

        match envelope.items {
            Some(items) => Outcome::Success(ApiPayload {
                endpoint,
                total: envelope.total,
                items,
            }),
            None => Outcome::Terminal(SearchError::Protocol(format!(
                "{} response has neither items nor an error code",
                endpoint
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rate_limiter::RateLimitConfig;
    use crate::testing::{default_executor_settings, MockClock, MockTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn build(transport: &Arc<MockTransport>, clock: &MockClock) -> RequestExecutor {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let governor = RateGovernor::uniform(RateLimitConfig::default(), clock.clone()).unwrap();
        RequestExecutor::new(default_executor_settings(), transport.clone(), governor, clock).unwrap()
    }

    fn params() -> QueryParams {
        QueryParams::new().with("query", "AI").with("display", 10)
    }

    #[tokio::test]
    async fn test_success_returns_items_and_records_dispatch() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"total": 2, "items": [{"title": "a"}, {"title": "b"}]}));
        let executor = build(&transport, &clock);

        let payload = executor.execute(EndpointKey::News, &params()).await.unwrap();

        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.total, Some(2));
        assert_eq!(executor.governor().stats(EndpointKey::News).await.window_count, 1);
        assert_eq!(executor.metrics().successes, 1);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url.path(), "/v1/search/news.json");
        assert_eq!(calls[0].query.get("query"), Some("AI"));
    }

    #[tokio::test]
    async fn test_transport_failure_retries_with_backoff_then_gives_up() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.always_fail(TransportError::Connect("refused".into()));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::Blog, &params()).await.unwrap_err();

        match err {
            SearchError::Connectivity { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert_eq!(cause, TransportError::Connect("refused".into()));
            }
            other => panic!("expected connectivity error, got {:?}", other),
        }
        assert_eq!(transport.call_count(), 3);
        // Backoff, then the rest of the 500ms spacing since the failed attempt.
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(400),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
        assert_eq!(executor.metrics().retries, 2);
        assert_eq!(executor.governor().stats(EndpointKey::Blog).await.window_count, 0);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_and_can_recover() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::new(503, "Service Unavailable"));
        transport.push_json(200, json!({"items": []}));
        let executor = build(&transport, &clock);

        let payload = executor.execute(EndpointKey::News, &params()).await.unwrap();

        assert!(payload.items.is_empty());
        assert_eq!(transport.call_count(), 2);
        assert_eq!(executor.metrics().attempts, 2);
    }

    #[tokio::test]
    async fn test_credential_code_is_not_retried_nor_recorded() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.always(Ok(HttpResponse::json(
            401,
            &json!({"errorCode": "024", "errorMessage": "Authentication failed"}),
        )));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::News, &params()).await.unwrap_err();

        assert!(matches!(err, SearchError::Credential(_)));
        assert_eq!(transport.call_count(), 1);
        assert!(clock.sleeps().is_empty());
        let stats = executor.governor().stats(EndpointKey::News).await;
        assert_eq!(stats.window_count, 0);
        assert_eq!(stats.since_last_dispatch, None);
    }

    #[tokio::test]
    async fn test_credential_code_on_success_status() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"errorCode": "025", "errorMessage": "quota key"}));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::News, &params()).await.unwrap_err();
        assert!(matches!(err, SearchError::Credential(_)));
        assert_eq!(executor.metrics().credential_failures, 1);
    }

    #[tokio::test]
    async fn test_other_error_code_is_upstream_error() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.always(Ok(HttpResponse::json(
            400,
            &json!({"errorCode": "SE01", "errorMessage": "Incorrect query request"}),
        )));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::Blog, &params()).await.unwrap_err();

        assert_eq!(
            err,
            SearchError::Upstream {
                code: "SE01".into(),
                message: "Incorrect query request".into()
            }
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_plain_401_is_credential_error() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.always(Ok(HttpResponse::new(401, "Unauthorized")));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::News, &params()).await.unwrap_err();
        assert!(matches!(err, SearchError::Credential(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_body_is_protocol_error_without_retry() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.always(Ok(HttpResponse::new(200, "<html>maintenance</html>")));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::News, &params()).await.unwrap_err();

        assert!(matches!(err, SearchError::Protocol(_)));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(executor.metrics().protocol_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_items_is_protocol_error() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"total": 0}));
        let executor = build(&transport, &clock);

        let err = executor.execute(EndpointKey::News, &params()).await.unwrap_err();
        assert!(matches!(err, SearchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_missing_path_is_config_error() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let mut settings = default_executor_settings();
        settings.endpoint_paths.remove(&EndpointKey::Trending);
        let governor = RateGovernor::uniform(RateLimitConfig::default(), clock_dyn.clone()).unwrap();
        let executor = RequestExecutor::new(settings, transport.clone(), governor, clock_dyn).unwrap();

        let err = executor
            .execute(EndpointKey::Trending, &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_sends_single_item_news_query() {
        let clock = MockClock::new();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"items": []}));
        let executor = build(&transport, &clock);

        executor.probe().await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].endpoint, EndpointKey::News);
        assert_eq!(calls[0].query.get("display"), Some("1"));
    }
}

use crate::api::executor::ExecutorSettings;
use crate::api::rate_limiter::RateLimitConfig;
use crate::api::retry::RetryPolicy;
use crate::api::types::EndpointKey;
use crate::content::HotTopicDetector;
use crate::error::{Result, SearchError};
use crate::utils::parse_level;
use log::{info, warn, LevelFilter};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://openapi.naver.com";
pub const DEFAULT_TRENDING_LIMIT: u32 = 5;
pub const MAX_DISPLAY: u32 = 100;

const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_TRENDING_TTL_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CREDENTIAL_CODES: &str = "024,025";
const DEFAULT_HOT_TOPIC_THRESHOLD: f64 = 1.0;

/// Client id + secret pair sent on every upstream call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();

        if client_id.is_empty() {
            return Err(SearchError::Credential(
                "NAVER_CLIENT_ID is missing or blank".to_string(),
            ));
        }
        if client_secret.is_empty() {
            return Err(SearchError::Credential(
                "NAVER_CLIENT_SECRET is missing or blank".to_string(),
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.client_id.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("client_id", &format!("{}…", prefix))
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// One weighted vocabulary group for hot-topic scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct HotTopicGroup {
    pub name: String,
    pub weight: f64,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub api_base_url: String,
    pub endpoint_paths: HashMap<EndpointKey, String>,
    pub default_rate_limit: RateLimitConfig,
    pub rate_limits: HashMap<EndpointKey, RateLimitConfig>,
    pub cache_ttls: HashMap<EndpointKey, Duration>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub credential_error_codes: HashSet<String>,
    pub hot_topic_terms: Vec<String>,
    pub hot_topic_groups: Vec<HotTopicGroup>,
    pub hot_topic_threshold: f64,
    pub hot_topic_emphasis_bonus: f64,
    pub hot_topic_title_tags: Vec<String>,
    pub hot_topic_tag_bonus: f64,
    pub trending_limit: u32,
    pub log_level: LevelFilter,
}

fn path_var(endpoint: EndpointKey) -> &'static str {
    match endpoint {
        EndpointKey::News => "NEWS_PATH",
        EndpointKey::Blog => "BLOG_PATH",
        EndpointKey::RelatedKeywords => "RELATED_KEYWORDS_PATH",
        EndpointKey::Trending => "TRENDING_PATH",
    }
}

pub fn default_path(endpoint: EndpointKey) -> &'static str {
    match endpoint {
        EndpointKey::News => "/v1/search/news.json",
        EndpointKey::Blog => "/v1/search/blog.json",
        EndpointKey::RelatedKeywords => "/v1/search/related.json",
        EndpointKey::Trending => "/v1/search/trending.json",
    }
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) if value.trim().is_empty() => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("⚠️ Could not parse {}='{}', using default", name, value);
            default
        }),
    }
}

/// `"500"` sets the value for every endpoint, `"news:200,trending:2000"`
/// overrides single endpoints; both forms can be mixed.
fn parse_per_endpoint<T: FromStr + Copy>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> (T, HashMap<EndpointKey, T>) {
    let mut fallback = default;
    let mut overrides = HashMap::new();

    let raw = match raw {
        Some(raw) => raw,
        None => return (fallback, overrides),
    };

    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut kv = part.splitn(2, ':');
        let first = kv.next().unwrap_or_default().trim();
        match kv.next() {
            None => match first.parse::<T>() {
                Ok(value) => fallback = value,
                Err(_) => warn!("⚠️ Ignoring unparseable {} entry '{}'", name, part),
            },
            Some(value) => match (first.parse::<EndpointKey>(), value.trim().parse::<T>()) {
                (Ok(endpoint), Ok(value)) => {
                    overrides.insert(endpoint, value);
                }
                _ => warn!("⚠️ Ignoring unparseable {} entry '{}'", name, part),
            },
        }
    }

    (fallback, overrides)
}

/// `"breaking:2.0:단독|속보;trending:1.5:화제|논란"`: groups separated by
/// `;`, each `name:weight:terms` with terms separated by `|`.
fn parse_term_groups(raw: Option<String>) -> Vec<HotTopicGroup> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Vec::new(),
    };

    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|part| {
            let mut fields = part.splitn(3, ':');
            let name = fields.next().unwrap_or_default().trim();
            let weight = fields
                .next()
                .and_then(|w| w.trim().parse::<f64>().ok())
                .filter(|w| w.is_finite());
            let terms: Vec<String> = fields
                .next()
                .unwrap_or_default()
                .split('|')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();

            match weight {
                Some(weight) if !name.is_empty() && !terms.is_empty() => Some(HotTopicGroup {
                    name: name.to_string(),
                    weight,
                    terms,
                }),
                _ => {
                    warn!("⚠️ Ignoring unparseable HOT_TOPIC_GROUPS entry '{}'", part);
                    None
                }
            }
        })
        .collect()
}

fn split_list(raw: Option<String>, default: &str) -> Vec<String> {
    raw.unwrap_or_else(|| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any name → value lookup; `from_env` passes the process
    /// environment, tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials::new(
            lookup("NAVER_CLIENT_ID").unwrap_or_default(),
            lookup("NAVER_CLIENT_SECRET").unwrap_or_default(),
        )?;

        let api_base_url = lookup("NAVER_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let endpoint_paths = EndpointKey::ALL
            .iter()
            .map(|&endpoint| {
                let path = lookup(path_var(endpoint))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| default_path(endpoint).to_string());
                (endpoint, path)
            })
            .collect();

        let defaults = RateLimitConfig::default();
        let window_secs = parse_or(
            "RATE_WINDOW_SECS",
            lookup("RATE_WINDOW_SECS"),
            defaults.window.as_secs(),
        );
        let (interval_ms, interval_overrides) = parse_per_endpoint(
            "RATE_MIN_INTERVAL_MS",
            lookup("RATE_MIN_INTERVAL_MS"),
            defaults.min_interval.as_millis() as u64,
        );
        let (ceiling, ceiling_overrides) = parse_per_endpoint(
            "RATE_WINDOW_CEILING",
            lookup("RATE_WINDOW_CEILING"),
            defaults.window_ceiling,
        );

        let default_rate_limit = RateLimitConfig {
            min_interval: Duration::from_millis(interval_ms),
            window: Duration::from_secs(window_secs),
            window_ceiling: ceiling,
        };
        let rate_limits = EndpointKey::ALL
            .iter()
            .map(|&endpoint| {
                let config = RateLimitConfig {
                    min_interval: Duration::from_millis(
                        *interval_overrides.get(&endpoint).unwrap_or(&interval_ms),
                    ),
                    window: default_rate_limit.window,
                    window_ceiling: *ceiling_overrides.get(&endpoint).unwrap_or(&ceiling),
                };
                (endpoint, config)
            })
            .collect();

        let raw_ttl = lookup("CACHE_TTL_SECS");
        let (ttl_secs, ttl_overrides) =
            parse_per_endpoint("CACHE_TTL_SECS", raw_ttl.clone(), DEFAULT_CACHE_TTL_SECS);
        // Trending keeps its longer TTL unless a valid bare value applies to everything.
        let has_bare_ttl = raw_ttl
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .any(|p| !p.contains(':') && p.parse::<u64>().is_ok())
            })
            .unwrap_or(false);
        let cache_ttls = EndpointKey::ALL
            .iter()
            .map(|&endpoint| {
                let fallback = if endpoint == EndpointKey::Trending && !has_bare_ttl {
                    DEFAULT_TRENDING_TTL_SECS
                } else {
                    ttl_secs
                };
                let secs = *ttl_overrides.get(&endpoint).unwrap_or(&fallback);
                (endpoint, Duration::from_secs(secs))
            })
            .collect();

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            parse_or(
                "RETRY_MAX_ATTEMPTS",
                lookup("RETRY_MAX_ATTEMPTS"),
                retry_defaults.max_attempts,
            ),
            Duration::from_millis(parse_or(
                "RETRY_BASE_DELAY_MS",
                lookup("RETRY_BASE_DELAY_MS"),
                retry_defaults.base_delay.as_millis() as u64,
            )),
            Duration::from_millis(parse_or(
                "RETRY_MAX_DELAY_MS",
                lookup("RETRY_MAX_DELAY_MS"),
                retry_defaults.max_delay.as_millis() as u64,
            )),
        );

        let config = Config {
            credentials,
            api_base_url,
            endpoint_paths,
            default_rate_limit,
            rate_limits,
            cache_ttls,
            retry,
            request_timeout: Duration::from_millis(parse_or(
                "REQUEST_TIMEOUT_MS",
                lookup("REQUEST_TIMEOUT_MS"),
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            credential_error_codes: split_list(
                lookup("CREDENTIAL_ERROR_CODES"),
                DEFAULT_CREDENTIAL_CODES,
            )
            .into_iter()
            .collect(),
            hot_topic_terms: split_list(lookup("HOT_TOPIC_TERMS"), ""),
            hot_topic_groups: parse_term_groups(lookup("HOT_TOPIC_GROUPS")),
            hot_topic_threshold: parse_or(
                "HOT_TOPIC_THRESHOLD",
                lookup("HOT_TOPIC_THRESHOLD"),
                DEFAULT_HOT_TOPIC_THRESHOLD,
            ),
            hot_topic_emphasis_bonus: parse_or(
                "HOT_TOPIC_EMPHASIS_BONUS",
                lookup("HOT_TOPIC_EMPHASIS_BONUS"),
                0.0,
            ),
            hot_topic_title_tags: split_list(lookup("HOT_TOPIC_TITLE_TAGS"), ""),
            hot_topic_tag_bonus: parse_or("HOT_TOPIC_TAG_BONUS", lookup("HOT_TOPIC_TAG_BONUS"), 0.0),
            trending_limit: parse_or(
                "TRENDING_LIMIT",
                lookup("TRENDING_LIMIT"),
                DEFAULT_TRENDING_LIMIT,
            ),
            log_level: parse_level(&lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base_url)?;
        self.retry.validate()?;
        for endpoint in EndpointKey::ALL {
            self.rate_limit(endpoint).validate(endpoint)?;
        }
        if self.trending_limit == 0 || self.trending_limit > MAX_DISPLAY {
            return Err(SearchError::Config(format!(
                "TRENDING_LIMIT must be between 1 and {}, got {}",
                MAX_DISPLAY, self.trending_limit
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(SearchError::Config(
                "REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        if !self.hot_topic_threshold.is_finite() || self.hot_topic_threshold <= 0.0 {
            return Err(SearchError::Config(format!(
                "HOT_TOPIC_THRESHOLD must be a positive number, got {}",
                self.hot_topic_threshold
            )));
        }
        for (name, bonus) in [
            ("HOT_TOPIC_EMPHASIS_BONUS", self.hot_topic_emphasis_bonus),
            ("HOT_TOPIC_TAG_BONUS", self.hot_topic_tag_bonus),
        ] {
            if !bonus.is_finite() {
                return Err(SearchError::Config(format!("{} must be a finite number", name)));
            }
        }
        Ok(())
    }

    pub fn validate_and_log(&self) -> Result<()> {
        self.validate()?;
        info!("Application Configuration Loaded:");
        info!("  API: {}", self.api_base_url);
        info!("  Credentials: {:?}", self.credentials);
        for endpoint in EndpointKey::ALL {
            let limit = self.rate_limit(endpoint);
            info!(
                "  {}: path {}, min interval {:?}, {} calls per {:?}, cache TTL {:?}",
                endpoint,
                self.endpoint_paths
                    .get(&endpoint)
                    .map(String::as_str)
                    .unwrap_or("<unset>"),
                limit.min_interval,
                limit.window_ceiling,
                limit.window,
                self.cache_ttl(endpoint)
            );
        }
        info!(
            "  Retry: {} attempt(s), base {:?}, max {:?}; timeout {:?}",
            self.retry.max_attempts, self.retry.base_delay, self.retry.max_delay, self.request_timeout
        );
        info!("  Log level: {}", self.log_level);
        if self.hot_topic_terms.is_empty() && self.hot_topic_groups.is_empty() {
            warn!("HOT_TOPIC_TERMS and HOT_TOPIC_GROUPS are empty; no items will be tagged");
        } else {
            info!(
                "  Hot topic: {} term(s), {} weighted group(s), threshold {}",
                self.hot_topic_terms.len(),
                self.hot_topic_groups.len(),
                self.hot_topic_threshold
            );
        }
        Ok(())
    }

    pub fn rate_limit(&self, endpoint: EndpointKey) -> RateLimitConfig {
        self.rate_limits
            .get(&endpoint)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }

    pub fn cache_ttl(&self, endpoint: EndpointKey) -> Duration {
        self.cache_ttls
            .get(&endpoint)
            .copied()
            .unwrap_or(Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    /// Plain terms form a weight-1.0 group next to the weighted groups.
    pub fn hot_topic_detector(&self) -> HotTopicDetector {
        let mut detector = HotTopicDetector::from_terms(&self.hot_topic_terms);
        for group in &self.hot_topic_groups {
            detector = detector.with_group(group.name.clone(), &group.terms, group.weight);
        }
        detector
            .with_threshold(self.hot_topic_threshold)
            .with_emphasis_bonus(self.hot_topic_emphasis_bonus)
            .with_tag_bonus(&self.hot_topic_title_tags, self.hot_topic_tag_bonus)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            api_base_url: self.api_base_url.clone(),
            endpoint_paths: self.endpoint_paths.clone(),
            request_timeout: self.request_timeout,
            retry: self.retry.clone(),
            credential_error_codes: self.credential_error_codes.clone(),
        }
    }
}

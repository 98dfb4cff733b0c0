//! Search facade
//!
//! One named operation per use case. Each one validates input, builds a
//! request signature, serves from the cache when it can, and otherwise goes
//! through the executor and the content filter before caching the result.

use crate::api::executor::{ExecutorMetrics, RequestExecutor};
use crate::api::rate_limiter::{RateGovernor, RateStats};
use crate::api::transport::{ReqwestTransport, Transport};
use crate::api::types::{EndpointKey, QueryParams, RequestSignature};
use crate::cache::{CacheMetrics, CacheStore};
use crate::config::settings::MAX_DISPLAY;
use crate::config::Config;
use crate::content::{ContentFilter, ContentItem};
use crate::error::{Result, SearchError};
use crate::utils::{Clock, Timer, TokioClock};
use log::{debug, info};
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;

struct FacadeInner {
    config: Arc<Config>,
    executor: RequestExecutor,
    cache: CacheStore,
    filter: ContentFilter,
}

/// Cheap to clone; clones share governor, cache and counters.
#[derive(Clone)]
pub struct SearchFacade {
    inner: Arc<FacadeInner>,
}

impl fmt::Debug for SearchFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchFacade")
            .field("executor", &self.inner.executor)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// One facade call, described before anything is fetched.
struct Plan<'a> {
    operation: &'static str,
    endpoint: EndpointKey,
    keyword: &'a str,
    params: QueryParams,
    limit: usize,
}

fn validate_keyword(keyword: &str) -> Result<&str> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(SearchError::InvalidInput(
            "keyword must not be empty".to_string(),
        ));
    }
    Ok(keyword)
}

fn validate_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        return Err(SearchError::InvalidInput(
            "limit must be at least 1".to_string(),
        ));
    }
    Ok(limit)
}

fn display(requested: usize) -> usize {
    requested.min(MAX_DISPLAY as usize)
}

impl SearchFacade {
    /// Production wiring: reqwest transport and the tokio clock.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.credentials)?;
        Self::with_transport(config, Arc::new(transport), Arc::new(TokioClock))
    }

    pub fn with_transport(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let governor = RateGovernor::new(
            config.rate_limits.clone(),
            config.default_rate_limit,
            clock.clone(),
        )?;
        let executor =
            RequestExecutor::new(config.executor_settings(), transport, governor, clock.clone())?;
        let detector = config.hot_topic_detector();
        info!(
            "✅ Search facade ready ({} hot topic group(s), threshold {}, trending limit {})",
            detector.group_names().len(),
            detector.threshold(),
            config.trending_limit
        );
        let filter = ContentFilter::new(detector);

        Ok(Self {
            inner: Arc::new(FacadeInner {
                config,
                executor,
                cache: CacheStore::new(clock),
                filter,
            }),
        })
    }

    /// Run the connection test and hand the facade back only if it passes.
    /// Used at start-up so bad credentials surface before the first search.
    pub async fn verified(self) -> Result<Self> {
        self.probe().await?;
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Latest news, over-fetching so filtering still fills `limit`.
    pub async fn search_news(&self, keyword: &str, limit: usize) -> Result<Vec<ContentItem>> {
        let keyword = validate_keyword(keyword)?;
        let limit = validate_limit(limit)?;
        self.run(Plan {
            operation: "search_news",
            endpoint: EndpointKey::News,
            keyword,
            params: QueryParams::new()
                .with("query", keyword)
                .with("display", display(limit.saturating_mul(2)))
                .with("sort", "date"),
            limit,
        })
        .await
    }

    pub async fn search_blogs(&self, keyword: &str, limit: usize) -> Result<Vec<ContentItem>> {
        let keyword = validate_keyword(keyword)?;
        let limit = validate_limit(limit)?;
        self.run(Plan {
            operation: "search_blogs",
            endpoint: EndpointKey::Blog,
            keyword,
            params: QueryParams::new()
                .with("query", keyword)
                .with("display", display(limit))
                .with("sort", "sim"),
            limit,
        })
        .await
    }

    pub async fn search_related_keywords(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let keyword = validate_keyword(keyword)?;
        let limit = validate_limit(limit)?;
        self.run(Plan {
            operation: "search_related_keywords",
            endpoint: EndpointKey::RelatedKeywords,
            keyword,
            params: QueryParams::new()
                .with("query", keyword)
                .with("display", display(limit.saturating_mul(2))),
            limit,
        })
        .await
    }

    /// Current trending items; no keyword filter.
    pub async fn search_trending(&self) -> Result<Vec<ContentItem>> {
        let limit = self.inner.config.trending_limit as usize;
        self.run(Plan {
            operation: "search_trending",
            endpoint: EndpointKey::Trending,
            keyword: "",
            params: QueryParams::new().with("display", limit),
            limit,
        })
        .await
    }

    /// News and blogs fetched concurrently, then a random sample of at most
    /// `count` items. Either side failing fails the whole call.
    pub async fn search_mixed(&self, keyword: &str, count: usize) -> Result<Vec<ContentItem>> {
        let keyword = validate_keyword(keyword)?;
        let count = validate_limit(count)?;
        let timer = Timer::start(format!("search_mixed '{}'", keyword));

        let (news, blogs) = futures::join!(
            self.search_news(keyword, count),
            self.search_blogs(keyword, count)
        );
        let mut merged = news?;
        merged.extend(blogs?);

        let total = merged.len();
        let sample: Vec<ContentItem> = merged
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect();

        timer.finish(&format!("sampled {}/{} item(s)", sample.len(), total));
        Ok(sample)
    }

    /// Single minimal request to check credentials and connectivity.
    pub async fn probe(&self) -> Result<()> {
        let timer = Timer::start("probe");
        let result = self.inner.executor.probe().await;
        timer.finish(if result.is_ok() { "succeeded" } else { "failed" });
        result
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.inner.cache.metrics()
    }

    pub fn executor_metrics(&self) -> ExecutorMetrics {
        self.inner.executor.metrics()
    }

    pub async fn rate_snapshot(&self) -> Vec<RateStats> {
        self.inner.executor.governor().snapshot().await
    }

    /// Drop expired cache entries; returns how many were removed.
    pub fn purge_expired_cache(&self) -> usize {
        self.inner.cache.purge_expired()
    }

    async fn run(&self, plan: Plan<'_>) -> Result<Vec<ContentItem>> {
        let mut timer = Timer::start(format!("{} '{}'", plan.operation, plan.keyword));
        let signature =
            RequestSignature::new(plan.endpoint, &plan.params.clone().with("limit", plan.limit));

        if let Some(items) = self.inner.cache.get_json::<Vec<ContentItem>>(&signature) {
            timer.finish(&format!("served {} item(s) from cache", items.len()));
            return Ok(items);
        }
        timer.checkpoint("cache miss");

        let payload = match self.inner.executor.execute(plan.endpoint, &plan.params).await {
            Ok(payload) => payload,
            Err(err) => {
                timer.finish(&format!("failed [{}]", err.kind()));
                return Err(err);
            }
        };
        timer.checkpoint("fetched");

        let items = self
            .inner
            .filter
            .filter(&payload.items, plan.keyword, plan.limit);
        debug!(
            "{} kept {}/{} item(s), {} hot",
            plan.operation,
            items.len(),
            payload.items.len(),
            items.iter().filter(|item| item.is_hot()).count()
        );

        self.inner
            .cache
            .put_json(signature, &items, self.inner.config.cache_ttl(plan.endpoint))?;

        timer.finish(&format!("returned {} item(s)", items.len()));
        Ok(items)
    }
}

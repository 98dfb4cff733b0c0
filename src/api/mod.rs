// src/api/mod.rs
//! Upstream API access
//!
//! Everything that touches the network lives here:
//! - per-endpoint rate governing
//! - the HTTP transport seam
//! - retry schedule and attempt state machine
//! - the executor that ties them together and classifies failures

pub mod executor;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod types;

pub use executor::{ExecutorMetrics, ExecutorSettings, RequestExecutor};
pub use rate_limiter::{DispatchPermit, RateGovernor, RateLimitConfig, RateState, RateStats};
pub use retry::{backoff_delay, AttemptState, RetryMachine, RetryPolicy};
pub use transport::{HttpResponse, OutboundRequest, ReqwestTransport, Transport};
pub use types::{ApiPayload, EndpointKey, QueryParams, RawItem, RequestSignature};

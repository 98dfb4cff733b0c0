//! Outbound HTTP seam.

use crate::api::types::{EndpointKey, QueryParams};
use crate::config::Credentials;
use crate::error::{SearchError, TransportError};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use std::fmt;
use std::time::Duration;
use url::Url;

pub const CLIENT_ID_HEADER: &str = "X-Naver-Client-Id";
pub const CLIENT_SECRET_HEADER: &str = "X-Naver-Client-Secret";

/// One GET the executor wants on the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub endpoint: EndpointKey,
    pub url: Url,
    pub query: QueryParams,
    pub timeout: Duration,
}

/// Status and body of a completed exchange; classification happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn get(&self, request: &OutboundRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport carrying the credential headers on every call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(credentials: &Credentials) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();

        let client_id = HeaderValue::from_str(credentials.client_id()).map_err(|_| {
            SearchError::Credential("client id contains characters not allowed in a header".into())
        })?;
        let mut client_secret = HeaderValue::from_str(credentials.client_secret()).map_err(|_| {
            SearchError::Credential(
                "client secret contains characters not allowed in a header".into(),
            )
        })?;
        client_secret.set_sensitive(true);

        headers.insert(CLIENT_ID_HEADER, client_id);
        headers.insert(CLIENT_SECRET_HEADER, client_secret);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("naver-content-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &OutboundRequest) -> Result<HttpResponse, TransportError> {
        debug!("GET {} {:?}", request.url, request.query);

        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::from(err)
            }
        };

        let response = self
            .client
            .get(request.url.clone())
            .query(&request.query.to_pairs())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;

        Ok(HttpResponse { status, body })
    }
}

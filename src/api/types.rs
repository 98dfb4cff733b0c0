//! Wire-level types shared by the governor, cache and executor.

use ahash::AHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Logical upstream route. Partitions both rate state and cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKey {
    News,
    Blog,
    RelatedKeywords,
    Trending,
}

impl EndpointKey {
    pub const ALL: [EndpointKey; 4] = [
        EndpointKey::News,
        EndpointKey::Blog,
        EndpointKey::RelatedKeywords,
        EndpointKey::Trending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKey::News => "news",
            EndpointKey::Blog => "blog",
            EndpointKey::RelatedKeywords => "related-keywords",
            EndpointKey::Trending => "trending",
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(EndpointKey::News),
            "blog" | "blogs" => Ok(EndpointKey::Blog),
            "related-keywords" | "related" => Ok(EndpointKey::RelatedKeywords),
            "trending" => Ok(EndpointKey::Trending),
            other => Err(format!("unknown endpoint key '{}'", other)),
        }
    }
}

/// Outbound query parameters, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(name.into(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(QueryParams::new(), |params, (k, v)| params.with(k, v))
    }
}

/// Cache key: digest of the endpoint plus its parameters in name order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature(u64);

impl RequestSignature {
    pub fn new(endpoint: EndpointKey, params: &QueryParams) -> Self {
        let mut hasher = AHasher::default();
        endpoint.as_str().hash(&mut hasher);
        // BTreeMap iteration is sorted, so insertion order never leaks in.
        for (name, value) in params.iter() {
            name.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        RequestSignature(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One upstream result record before filtering.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: Option<String>,
    #[serde(rename = "postdate", default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub bloggername: Option<String>,
}

/// Top-level upstream response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiEnvelope {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub items: Option<Vec<Value>>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<Value>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

impl ApiEnvelope {
    /// Error codes arrive as strings ("024") but some gateways send numbers.
    pub fn error_code(&self) -> Option<String> {
        match self.error_code.as_ref()? {
            Value::Null => None,
            Value::String(code) => Some(code.trim().to_string()),
            other => Some(other.to_string()),
        }
    }
}

/// Validated successful response. Items are kept as raw JSON so that a single
/// malformed record can be skipped downstream without failing the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiPayload {
    pub endpoint: EndpointKey,
    pub total: Option<u64>,
    pub items: Vec<Value>,
}

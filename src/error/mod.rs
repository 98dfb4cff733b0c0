use std::time::Duration;
use thiserror::Error;

/// Terminal failure of a single engine operation.
///
/// The request executor is the only place that decides retry vs propagate;
/// every variant a caller sees is final for that operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Credentials missing at construction, or rejected by the upstream
    #[error("Credential Error: {0}")]
    Credential(String),

    /// Network/timeout/non-2xx after the retry budget was spent
    #[error("Connectivity Error after {attempts} attempt(s): {cause}")]
    Connectivity { attempts: u32, cause: TransportError },

    /// Response body did not have the expected structure
    #[error("Protocol Error: {0}")]
    Protocol(String),

    /// Well-formed error payload that is not a credential failure
    #[error("Upstream Error [{code}]: {message}")]
    Upstream { code: String, message: String },

    /// Caller passed an out-of-bounds keyword or count
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Non-credential configuration problem
    #[error("Config Error: {0}")]
    Config(String),
}

impl SearchError {
    /// Stable, user-displayable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Credential(_) => "credential",
            SearchError::Connectivity { .. } => "connectivity",
            SearchError::Protocol(_) => "protocol",
            SearchError::Upstream { .. } => "upstream",
            SearchError::InvalidInput(_) => "invalid-input",
            SearchError::Config(_) => "config",
        }
    }

    /// Whether the failure is a configuration problem the user has to fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SearchError::Credential(_) | SearchError::Config(_))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Protocol(format!("JSON decode error: {}", err))
    }
}

impl From<url::ParseError> for SearchError {
    fn from(err: url::ParseError) -> Self {
        SearchError::Config(format!("invalid API URL: {}", err))
    }
}

/// A single failed attempt on the wire. Only ever surfaced wrapped in
/// [`SearchError::Connectivity`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub(crate) fn status(status: u16, body: &str) -> Self {
        // Upstream error pages can be large; keep log lines readable.
        let body: String = body.chars().take(200).collect();
        TransportError::Status { status, body }
    }
}

// Timeouts are mapped by the transport itself, which knows the configured limit.
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

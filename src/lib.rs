pub mod api;
pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod search;
pub mod testing; // Test doubles shared with tests/
pub mod utils;

pub use api::{EndpointKey, QueryParams, RequestSignature};
pub use config::{load_config, Config, Credentials};
pub use content::{ContentItem, ContentTag, HotTopicDetector};
pub use error::{Result, SearchError, TransportError};
pub use search::SearchFacade;

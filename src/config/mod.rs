pub mod settings;

pub use settings::{Config, Credentials, HotTopicGroup};

use crate::error::Result;
use std::sync::Arc;

/// Loads `.env` if present, then the process environment, then validates.
pub fn load_config() -> Result<Arc<Config>> {
    dotenv::dotenv().ok(); // Missing .env is fine

    let config = Config::from_env()?;
    config.validate_and_log()?;

    Ok(Arc::new(config))
}

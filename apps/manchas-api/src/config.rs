//! API server configuration.
//!
//! Configuration is loaded from environment variables with fallback to defaults.
//! Engine settings (aggregator, cash tickets, pricing) live in `CheckoutConfig`.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    pub host: String,

    /// HTTP port
    pub port: u16,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Directory for delivery photos
    pub uploads_dir: PathBuf,

    /// Checkout TOML file (optional)
    pub checkout_config_path: Option<PathBuf>,

    /// Database pool size
    pub max_connections: u32,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = ApiConfig {
            host: env::var("MANCHAS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("MANCHAS_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MANCHAS_PORT".to_string()))?,

            database_path: env::var("MANCHAS_DATABASE_PATH")
                .unwrap_or_else(|_| "manchas.db".to_string())
                .into(),

            uploads_dir: env::var("MANCHAS_UPLOADS_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),

            checkout_config_path: env::var("MANCHAS_CHECKOUT_CONFIG").ok().map(PathBuf::from),

            max_connections: env::var("MANCHAS_DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MANCHAS_DB_MAX_CONNECTIONS".to_string()))?,
        };

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "MANCHAS_DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

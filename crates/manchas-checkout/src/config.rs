//! # Checkout Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MANCHAS_AGGREGATOR_PRIVATE_KEY=prv_test_...                        │
//! │     MANCHAS_MARGIN_MODE=on_cost                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/backoffice/checkout.toml (Linux)                         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Sandbox aggregator, 48h cash tickets, margin on price              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [aggregator]
//! api_url = "https://sandbox.wompi.co/v1"
//! public_key = "pub_test_..."
//! private_key = "prv_test_..."
//! events_secret = "test_events_..."
//! redirect_base_url = "https://tienda.manchasypecas.co"
//! timeout_secs = 15
//!
//! [cash]
//! ticket_validity_hours = 48
//! code_length = 10
//! sweep_interval_secs = 300
//!
//! [pricing]
//! margin_mode = "on_price"  # on_price | on_cost
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use manchas_core::{MarginMode, CURRENCY};

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid checkout configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Aggregator Settings
// =============================================================================

/// Payment aggregator credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// REST base URL, sandbox by default.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Key for public endpoints (bank list).
    #[serde(default)]
    pub public_key: String,

    /// Key for payment links and transaction lookups.
    #[serde(default)]
    pub private_key: String,

    /// Shared secret for webhook checksums.
    #[serde(default)]
    pub events_secret: String,

    /// Storefront base; the customer returns to `<base>/resultado-pago/<reference>`.
    #[serde(default = "default_redirect_base_url")]
    pub redirect_base_url: String,

    /// Hosted checkout base; a link is served at `<base>/l/<link id>`.
    #[serde(default = "default_checkout_base_url")]
    pub checkout_base_url: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Upper bound for each aggregator call (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://sandbox.wompi.co/v1".to_string()
}

fn default_redirect_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_checkout_base_url() -> String {
    "https://checkout.wompi.co".to_string()
}

fn default_currency() -> String {
    CURRENCY.to_string()
}

fn default_timeout() -> u64 {
    15
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        AggregatorSettings {
            api_url: default_api_url(),
            public_key: String::new(),
            private_key: String::new(),
            events_secret: String::new(),
            redirect_base_url: default_redirect_base_url(),
            checkout_base_url: default_checkout_base_url(),
            currency: default_currency(),
            timeout_secs: default_timeout(),
        }
    }
}

impl AggregatorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Cash Settings
// =============================================================================

/// Cash ticket issuance and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSettings {
    #[serde(default = "default_validity_hours")]
    pub ticket_validity_hours: i64,

    /// Digits in a payable code.
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    /// How often the sweeper expires overdue tickets (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_validity_hours() -> i64 {
    48
}

fn default_code_length() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for CashSettings {
    fn default() -> Self {
        CashSettings {
            ticket_validity_hours: default_validity_hours(),
            code_length: default_code_length(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CashSettings {
    pub fn ticket_validity(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ticket_validity_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// =============================================================================
// Pricing Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default)]
    pub margin_mode: MarginMode,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete checkout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub aggregator: AggregatorSettings,

    #[serde(default)]
    pub cash: CashSettings,

    #[serde(default)]
    pub pricing: PricingSettings,
}

impl CheckoutConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (checkout.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading checkout config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load checkout config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    ///
    /// Credentials may be empty: aggregator calls then fail individually,
    /// which keeps cash payments and sales usable without them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agg = &self.aggregator;
        for (name, url) in [
            ("api_url", &agg.api_url),
            ("redirect_base_url", &agg.redirect_base_url),
            ("checkout_base_url", &agg.checkout_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "aggregator.{} must start with http:// or https://, got: {}",
                    name, url
                )));
            }
        }

        if agg.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.cash.ticket_validity_hours <= 0 {
            return Err(ConfigError::Invalid(
                "cash.ticket_validity_hours must be greater than 0".into(),
            ));
        }

        if !(6..=20).contains(&self.cash.code_length) {
            return Err(ConfigError::Invalid(
                "cash.code_length must be between 6 and 20".into(),
            ));
        }

        if self.cash.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cash.sweep_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        let agg = &mut self.aggregator;
        for (var, slot) in [
            ("MANCHAS_AGGREGATOR_URL", &mut agg.api_url),
            ("MANCHAS_AGGREGATOR_PUBLIC_KEY", &mut agg.public_key),
            ("MANCHAS_AGGREGATOR_PRIVATE_KEY", &mut agg.private_key),
            ("MANCHAS_AGGREGATOR_EVENTS_SECRET", &mut agg.events_secret),
            ("MANCHAS_REDIRECT_BASE_URL", &mut agg.redirect_base_url),
            ("MANCHAS_CHECKOUT_BASE_URL", &mut agg.checkout_base_url),
        ] {
            if let Ok(value) = std::env::var(var) {
                debug!(var = var, "Overriding checkout setting from environment");
                *slot = value;
            }
        }

        if let Ok(timeout) = std::env::var("MANCHAS_AGGREGATOR_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse::<u64>() {
                agg.timeout_secs = t;
            }
        }

        if let Ok(hours) = std::env::var("MANCHAS_CASH_VALIDITY_HOURS") {
            if let Ok(h) = hours.parse::<i64>() {
                self.cash.ticket_validity_hours = h;
            }
        }

        if let Ok(secs) = std::env::var("MANCHAS_SWEEP_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.cash.sweep_interval_secs = s;
            }
        }

        if let Ok(mode) = std::env::var("MANCHAS_MARGIN_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding margin mode from environment");
                    self.pricing.margin_mode = parsed;
                }
                Err(e) => warn!(mode = %mode, "{}", e),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "manchas", "backoffice")
            .map(|dirs| dirs.config_dir().join("checkout.toml"))
    }
}

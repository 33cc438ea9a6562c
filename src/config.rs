use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Longest spacing between two orders from one phone that settings may ask for (one week)
pub const MAX_ORDER_INTERVAL_SECS: u64 = 604_800;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_COURIER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Checkout thresholds and fees.
///
/// `AppConfig` carries the process-wide defaults; the per-request copy handed to
/// the checkout service is produced by `SettingsService`, which overlays the
/// `store_settings` table on top of these values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutSettings {
    /// Maximum number of lines accepted in one cart
    #[serde(default = "default_max_cart_items")]
    #[validate(range(min = 1, max = 500))]
    pub max_cart_items: usize,

    /// Maximum orders per phone number in a trailing 24h window
    #[serde(default = "default_max_orders_per_day")]
    #[validate(range(min = 1))]
    pub max_orders_per_day: u32,

    /// Minimum spacing between two orders from the same phone number
    #[serde(default = "default_min_order_interval_secs")]
    #[validate(range(max = 604800))]
    pub min_order_interval_secs: u64,

    /// Shipping fee used when no delivery zone matches the destination
    #[serde(default = "default_shipping_cost")]
    #[validate(custom = "validate_non_negative")]
    pub default_shipping_cost: Decimal,

    /// Subtotal at which the default shipping fee is waived
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub free_shipping_threshold: Option<Decimal>,

    /// Flat surcharge added to cash-on-delivery orders
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub cod_surcharge: Decimal,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            max_cart_items: default_max_cart_items(),
            max_orders_per_day: default_max_orders_per_day(),
            min_order_interval_secs: default_min_order_interval_secs(),
            default_shipping_cost: default_shipping_cost(),
            free_shipping_threshold: None,
            cod_surcharge: Decimal::ZERO,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    #[validate(range(min = 1024, max = 65535))]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub event_channel_capacity: usize,

    /// Timeout applied to every outbound courier HTTP call
    #[serde(default = "default_courier_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub courier_timeout_secs: u64,

    /// Number of single-order courier calls allowed in flight during one dispatch
    #[serde(default = "default_dispatch_concurrency")]
    #[validate(range(min = 1, max = 16))]
    pub dispatch_concurrency: usize,

    /// Upper bound on handling one HTTP request; covers a whole dispatch batch
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub request_timeout_secs: u64,

    /// Optional webhook receiving customer notifications (order confirmed / shipped)
    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    /// Checkout defaults
    #[serde(default)]
    #[validate]
    pub checkout: CheckoutSettings,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            courier_timeout_secs: default_courier_timeout_secs(),
            dispatch_concurrency: default_dispatch_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            notification_webhook_url: None,
            checkout: CheckoutSettings::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn courier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.courier_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        self.checkout.validate()?;

        if self.db_min_connections > self.db_max_connections {
            let mut errors = ValidationErrors::new();
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
            return Err(errors);
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_courier_timeout_secs() -> u64 {
    DEFAULT_COURIER_TIMEOUT_SECS
}

fn default_dispatch_concurrency() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_cart_items() -> usize {
    50
}

fn default_max_orders_per_day() -> u32 {
    5
}

fn default_min_order_interval_secs() -> u64 {
    30
}

fn default_shipping_cost() -> Decimal {
    dec!(120)
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some("log_level must be one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("negative_amount");
        err.message = Some("amount must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

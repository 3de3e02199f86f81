use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const MPESA_SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const MPESA_PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

/// M-Pesa (Daraja) gateway configuration.
///
/// Credentials are validated at call time, not at startup: a deployment
/// without M-Pesa enabled must still boot, and placeholder values must be
/// rejected before any network call is attempted.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MpesaConfig {
    /// Daraja consumer key (basic-auth user for the token endpoint)
    #[serde(default)]
    pub consumer_key: String,

    /// Daraja consumer secret
    #[serde(default)]
    pub consumer_secret: String,

    /// Business shortcode (PartyB / BusinessShortCode)
    #[serde(default)]
    pub shortcode: String,

    /// Lipa na M-Pesa online passkey
    #[serde(default)]
    pub passkey: String,

    /// Gateway environment: "sandbox" or "production"
    #[serde(default = "default_mpesa_environment")]
    pub environment: String,

    /// Publicly reachable URL the gateway posts the STK callback to
    #[serde(default)]
    pub callback_url: String,

    /// Total request timeout for outbound gateway calls (seconds)
    #[serde(default = "default_mpesa_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connect timeout for outbound gateway calls (seconds)
    #[serde(default = "default_mpesa_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Bounded retries for connection-level failures only
    #[serde(default = "default_mpesa_max_retries")]
    pub max_retries: u32,

    /// Fixed backoff between retries (seconds)
    #[serde(default = "default_mpesa_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            shortcode: String::new(),
            passkey: String::new(),
            environment: default_mpesa_environment(),
            callback_url: String::new(),
            request_timeout_secs: default_mpesa_timeout_secs(),
            connect_timeout_secs: default_mpesa_connect_timeout_secs(),
            max_retries: default_mpesa_max_retries(),
            retry_backoff_secs: default_mpesa_retry_backoff_secs(),
        }
    }
}

impl MpesaConfig {
    /// Gateway base URL for the configured environment.
    pub fn base_url(&self) -> &'static str {
        if self.environment.eq_ignore_ascii_case("production") {
            MPESA_PRODUCTION_BASE_URL
        } else {
            MPESA_SANDBOX_BASE_URL
        }
    }
}

/// Returns true for values operators left at their documented placeholders.
/// A placeholder credential must be treated the same as a missing one.
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty()
        || v.to_ascii_lowercase().starts_with("your_")
        || v.eq_ignore_ascii_case("changeme")
}

/// Application configuration structure
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
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
    pub event_channel_capacity: usize,

    /// Default currency code for sales and payments
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// M-Pesa gateway configuration
    #[serde(default)]
    pub mpesa: MpesaConfig,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration with defaults for everything beyond the basics
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
            default_currency: default_currency(),
            mpesa: MpesaConfig::default(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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
    1024
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_mpesa_environment() -> String {
    "sandbox".to_string()
}

fn default_mpesa_timeout_secs() -> u64 {
    30
}

fn default_mpesa_connect_timeout_secs() -> u64 {
    10
}

fn default_mpesa_max_retries() -> u32 {
    2
}

fn default_mpesa_retry_backoff_secs() -> u64 {
    1
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("stockflow_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*, e.g. APP__MPESA__CONSUMER_KEY)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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
        .set_default("database_url", "sqlite://stockflow.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    Ok(config.try_deserialize::<AppConfig>()?)
}

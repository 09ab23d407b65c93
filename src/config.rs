use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_MAIL_API_BASE: &str = "https://api.resend.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment name (development, test, production)
    pub environment: String,

    /// Base log level for the service's own spans
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit log records as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Payment provider secret key. Absence is a fatal configuration error,
    /// distinct from the request-level error taxonomy.
    #[validate(length(min = 1))]
    pub stripe_secret_key: String,

    /// Payment provider API base URL (overridden in tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Webhook signing secret; when unset, webhook signatures are not verified
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Maximum accepted webhook timestamp skew
    #[serde(default = "default_webhook_tolerance")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Outbound email API key; when unset, notification dispatch logs and skips
    #[serde(default)]
    pub mail_api_key: Option<String>,

    /// Outbound email API base URL
    #[serde(default = "default_mail_api_base")]
    pub mail_api_base: String,

    /// From address for confirmation emails
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Internal address receiving order notifications
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Database pool sizing
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Provider HTTP call timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Comma-separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}
fn default_mail_api_base() -> String {
    DEFAULT_MAIL_API_BASE.to_string()
}
fn default_mail_from() -> String {
    "noreply@example.com".to_string()
}
fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_provider_timeout() -> u64 {
    15
}

impl AppConfig {
    /// Minimal constructor used by the test harness.
    pub fn new(
        database_url: String,
        stripe_secret_key: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            stripe_secret_key,
            stripe_api_base: default_stripe_api_base(),
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance(),
            mail_api_key: None,
            mail_api_base: default_mail_api_base(),
            mail_from: default_mail_from(),
            admin_email: None,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            provider_timeout_secs: default_provider_timeout(),
            cors_allowed_origins: None,
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("checkout_api={},tower_http=debug", level);
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

pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // RUN_ENV or APP_ENV selects the config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "no '{}' directory; using built-in defaults plus environment overrides",
            CONFIG_DIR
        );
    }

    // NOTE: stripe_secret_key has no default - it MUST be provided via
    // environment variable or config file.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Check for the provider credential before deserialization to give a clear
    // startup failure instead of a request-time one.
    if config.get_string("stripe_secret_key").is_err() {
        error!("Payment provider credential is not configured. Set APP__STRIPE_SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "stripe_secret_key is required but not configured. Set APP__STRIPE_SECRET_KEY."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("configuration rejected by validation: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.stripe_webhook_secret.is_none() && !app_config.is_development() {
        warn!("No webhook signing secret configured; inbound webhooks will not be verified");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_constructor_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "sk_test_123".into(),
            "127.0.0.1".into(),
            18080,
            "test".into(),
        );
        assert_eq!(cfg.stripe_api_base, DEFAULT_STRIPE_API_BASE);
        assert_eq!(cfg.stripe_webhook_tolerance_secs, 300);
        assert!(cfg.is_development());
        assert!(cfg.mail_api_key.is_none());
    }
}

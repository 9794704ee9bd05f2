//! Application configuration loaded from environment variables.
//!
//! Required variables must be present and valid, or the application exits
//! with a clear error message.

use std::env;
use std::time::Duration;

use notify_webhooks::WebhookConfig;
use thiserror::Error;

/// Default WEBHOOK_ENCRYPTION_KEY: 64 hex '4' characters.
pub const INSECURE_WEBHOOK_KEY: &str =
    "4444444444444444444444444444444444444444444444444444444444444444";

/// Application environment mode.
///
/// In `Production` the insecure default encryption key refuses startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse from the `APP_ENV` environment variable value.
    /// Defaults to `Development` if unset or unrecognized.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server and delivery engine settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: AppEnvironment,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub webhook_encryption_key: [u8; 32],
    pub webhook: WebhookConfig,
}

impl AppConfig {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let app_env = AppEnvironment::from_env_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let webhook_encryption_key = parse_hex_encryption_key(
            "WEBHOOK_ENCRYPTION_KEY",
            &env::var("WEBHOOK_ENCRYPTION_KEY")
                .unwrap_or_else(|_| INSECURE_WEBHOOK_KEY.to_string()),
        )?;

        let defaults = WebhookConfig::default();
        let webhook = defaults
            .clone()
            .with_request_timeout(Duration::from_secs(parse_var(
                "WEBHOOK_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?))
            .with_disable_threshold(parse_var(
                "WEBHOOK_DISABLE_THRESHOLD",
                defaults.disable_threshold,
            )?)
            .with_max_endpoints(parse_var(
                "WEBHOOK_MAX_ENDPOINTS",
                defaults.max_endpoints_per_tenant,
            )?)
            .with_worker_concurrency(parse_var(
                "WEBHOOK_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?)
            .with_allow_http(parse_var("WEBHOOK_ALLOW_HTTP", false)?)
            .with_allow_internal_hosts(parse_var("WEBHOOK_ALLOW_INTERNAL_HOSTS", false)?);

        Ok(Self {
            app_env,
            database_url,
            host,
            port,
            rust_log,
            webhook_encryption_key,
            webhook,
        })
    }

    /// Check for insecure settings.
    ///
    /// Returns warnings in development; in production any finding is an error.
    pub fn validate_security_config(&self) -> Result<Vec<String>, Vec<String>> {
        let mut issues = Vec::new();

        if self.webhook_encryption_key == [0x44u8; 32] {
            issues.push(
                "WEBHOOK_ENCRYPTION_KEY is using the default insecure value (all 0x44)".to_string(),
            );
        }
        if self.webhook.url_policy.allow_internal_hosts {
            issues.push("WEBHOOK_ALLOW_INTERNAL_HOSTS disables SSRF protection".to_string());
        }

        if self.app_env.is_production() && !issues.is_empty() {
            Err(issues)
        } else {
            Ok(issues)
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T>(var_name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var_name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse hex-encoded 32-byte encryption key
fn parse_hex_encryption_key(var_name: &str, hex_str: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_str).map_err(|_| ConfigError::InvalidValue {
        var: var_name.to_string(),
        message: "Must be 64 hex characters (32 bytes)".to_string(),
    })?;

    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::InvalidValue {
        var: var_name.to_string(),
        message: format!("Expected 32 bytes, got {}", bytes.len()),
    })
}

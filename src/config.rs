use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Channel;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// None runs the service on the in-memory record store
    pub database: Option<DatabaseConfig>,
    pub security: SecurityConfig,
    pub notification: NotificationConfig,
    pub mcb: McbConfig,
}

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Security configuration for the trigger API
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Bearer token required on /api routes. When unset every /api call is rejected.
    pub admin_token: Option<String>,
}

/// Notification dispatch configuration
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Channels enabled installation-wide
    pub enabled_channels: Vec<Channel>,
    /// Attempts per channel, including the first one
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Random extra delay as a fraction of the computed backoff (0.0 disables)
    pub backoff_jitter: f64,
    /// Timeout for a single provider HTTP call
    pub sender_timeout: Duration,
    /// Upper bound for a whole dispatch across all channels
    pub dispatch_deadline: Duration,
}

/// MyClassBoard sync configuration (installation-wide fallback; sites may override)
#[derive(Debug, Clone)]
pub struct McbConfig {
    pub base_url: Option<String>,
    pub path: String,
    pub organisation_id: Option<String>,
    pub branch_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

/// Reads an environment variable, falling back to the default when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Reads a fraction in `[0, 1]`; NaN and infinities count as unparsable
fn env_ratio(key: &str, default: f64) -> f64 {
    Some(env_or(key, default))
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(0.0, 1.0)
}

/// Reads an optional, non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            database: DatabaseConfig::from_env(),
            security: SecurityConfig::from_env(),
            notification: NotificationConfig::from_env()?,
            mcb: McbConfig::from_env(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database: None,
            security: SecurityConfig::default(),
            notification: NotificationConfig::default(),
            mcb: McbConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Load database configuration from environment variables.
    ///
    /// Returns None when DATABASE_URL is not set.
    pub fn from_env() -> Option<Self> {
        let url = env_opt("DATABASE_URL")?;

        Some(Self {
            url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", 1),
            acquire_timeout: Duration::from_secs(env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)),
            idle_timeout: Duration::from_secs(env_or("DATABASE_IDLE_TIMEOUT_SECS", 600)),
            max_lifetime: Duration::from_secs(env_or("DATABASE_MAX_LIFETIME_SECS", 1800)),
        })
    }
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        Self {
            admin_token: env_opt("ADMIN_API_TOKEN"),
        }
    }
}

impl NotificationConfig {
    /// Load dispatch configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled_channels = match env_opt("NOTIFY_CHANNELS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<Channel>().map_err(ConfigError::InvalidChannel))
                .collect::<Result<Vec<_>, _>>()?,
            None => Channel::ALL.to_vec(),
        };

        let defaults = Self::default();

        Ok(Self {
            enabled_channels,
            max_attempts: env_or("NOTIFY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            backoff_base: Duration::from_millis(env_or("NOTIFY_BACKOFF_BASE_MS", 2000)),
            backoff_max: Duration::from_millis(env_or("NOTIFY_BACKOFF_MAX_MS", 30_000)),
            backoff_jitter: env_ratio("NOTIFY_BACKOFF_JITTER", defaults.backoff_jitter),
            sender_timeout: Duration::from_secs(env_or("SENDER_TIMEOUT_SECS", 30)),
            dispatch_deadline: Duration::from_secs(env_or("DISPATCH_DEADLINE_SECS", 120)),
        })
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled_channels: Channel::ALL.to_vec(),
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: 0.1,
            sender_timeout: Duration::from_secs(30),
            dispatch_deadline: Duration::from_secs(120),
        }
    }
}

impl McbConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("MCB_BASE_URL"),
            path: env_opt("MCB_PATH").unwrap_or_else(|| "/api/enquiry/create".to_string()),
            organisation_id: env_opt("MCB_ORGANISATION_ID"),
            branch_id: env_opt("MCB_BRANCH_ID"),
            api_key: env_opt("MCB_API_KEY"),
            timeout: Duration::from_secs(env_or("MCB_TIMEOUT_SECS", 30)),
            max_attempts: env_or("MCB_MAX_ATTEMPTS", 3u32).max(1),
        }
    }
}

impl Default for McbConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path: "/api/enquiry/create".to_string(),
            organisation_id: None,
            branch_id: None,
            api_key: None,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PORT must be a valid number")]
    InvalidPort,
    #[error("NOTIFY_CHANNELS is invalid: {0}")]
    InvalidChannel(String),
}

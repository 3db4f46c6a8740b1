//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which document store implementation backs the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("'{}' is not one of postgres, memory", other)),
        }
    }
}

/// Base URLs of the third-party services. An absent URL disables that provider.
#[derive(Clone, Debug, Default)]
pub struct ProviderUrls {
    pub auth: Option<String>,
    pub calendar: Option<String>,
    pub meetings: Option<String>,
    pub email: Option<String>,
    pub email_api_key: Option<String>,
    pub push: Option<String>,
    pub billing: Option<String>,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub app_base_url: String,
    pub cors_origin: String,
    pub providers: ProviderUrls,
    pub rollback_delay: Duration,
    pub page_size: usize,
    pub invitation_ttl_days: i64,
}

impl Default for Config {
    /// Development defaults: in-memory store, every provider disabled.
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store_backend: StoreBackend::Memory,
            database_url: None,
            log_level: Level::INFO,
            app_base_url: "http://localhost:3000".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            providers: ProviderUrls::default(),
            rollback_delay: Duration::from_millis(300),
            page_size: 25,
            invitation_ttl_days: 14,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Store Settings ---
        let bind_address = parsed_var("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let store_backend = parsed_var("STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = optional_var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let app_base_url =
            optional_var("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        let cors_origin =
            optional_var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Provider Endpoints (as optional) ---
        let providers = ProviderUrls {
            auth: optional_var("AUTH_SERVICE_URL"),
            calendar: optional_var("CALENDAR_SERVICE_URL"),
            meetings: optional_var("MEETING_SERVICE_URL"),
            email: optional_var("EMAIL_SERVICE_URL"),
            email_api_key: optional_var("EMAIL_API_KEY"),
            push: optional_var("PUSH_SERVICE_URL"),
            billing: optional_var("BILLING_SERVICE_URL"),
        };

        // --- Load Sync Tuning ---
        let rollback_delay = Duration::from_millis(parsed_var("ROLLBACK_DELAY_MS", 300u64)?);
        let page_size = parsed_var("PAGE_SIZE", 25usize)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "PAGE_SIZE".to_string(),
                "must be positive".to_string(),
            ));
        }
        let invitation_ttl_days = parsed_var("INVITATION_TTL_DAYS", 14i64)?;

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            app_base_url,
            cors_origin,
            providers,
            rollback_delay,
            page_size,
            invitation_ttl_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_names_are_case_insensitive() {
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}

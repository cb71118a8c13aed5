//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the email delivery adapter. Present only when an API key is configured.
#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub api_key: String,
    pub from: String,
    pub to: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` selects the in-memory session store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub feed_capacity: usize,
    pub cors_origin: String,
    pub delivery: Option<DeliveryConfig>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", &lookup, 5u32)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Change Feed and HTTP Settings ---
        let feed_capacity = parse_or("FEED_CAPACITY", &lookup, 64usize)?;
        if feed_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "FEED_CAPACITY".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:8080".to_string());

        // --- Delivery Settings (optional) ---
        let delivery = match lookup("RESEND_API_KEY") {
            Some(api_key) => Some(DeliveryConfig {
                api_key,
                from: lookup("DELIVERY_FROM").unwrap_or_else(|| {
                    "Gravador de Áudio <onboarding@resend.dev>".to_string()
                }),
                to: lookup("DELIVERY_TO")
                    .ok_or_else(|| ConfigError::MissingVar("DELIVERY_TO".to_string()))?,
            }),
            None => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            feed_capacity,
            cors_origin,
            delivery,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_select_the_in_memory_store() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000".parse().unwrap());
        assert!(config.database_url.is_none());
        assert_eq!(config.feed_capacity, 64);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.delivery.is_none());
    }

    #[test]
    fn delivery_requires_a_recipient() {
        let err = Config::from_lookup(lookup_from(&[("RESEND_API_KEY", "re_123")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "DELIVERY_TO"));

        let config = Config::from_lookup(lookup_from(&[
            ("RESEND_API_KEY", "re_123"),
            ("DELIVERY_TO", "someone@example.com"),
        ]))
        .unwrap();
        let delivery = config.delivery.unwrap();
        assert_eq!(delivery.to, "someone@example.com");
        assert!(delivery.from.contains("onboarding@resend.dev"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("BIND_ADDRESS", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("FEED_CAPACITY", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("RUST_LOG", "chatty")])).is_err());
    }
}

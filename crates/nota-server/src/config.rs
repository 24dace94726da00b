use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    /// Redis URL for the cross-instance change channel; in-process fan-out
    /// when unset
    pub redis_url: Option<String>,
    pub ping_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("redis_url", &self.redis_url)
            .field("ping_interval", &self.ping_interval)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "NOTA_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "NOTA_DATABASE_PATH", "nota-server.db");

        let jwt_secret = required_trimmed(&lookup, "NOTA_JWT_SECRET")?;

        let redis_url = lookup("NOTA_REDIS_URL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if let Some(url) = &redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::Invalid(
                    "NOTA_REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }

        let ping_interval_secs = match lookup("NOTA_PING_INTERVAL_SECS") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                ConfigError::Invalid("NOTA_PING_INTERVAL_SECS must be a positive integer".to_string())
            })?,
            None => 30,
        };
        if ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "NOTA_PING_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            redis_url,
            ping_interval: Duration::from_secs(ping_interval_secs),
        })
    }
}

fn value_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

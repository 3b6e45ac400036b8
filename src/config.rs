use std::{env, path::PathBuf, str::FromStr};

use thiserror::Error;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub http: HttpConfig,
    /// Unset means bookings and listings live in process memory.
    pub database: Option<DatabaseConfig>,
    /// JSON array of listings loaded into the in-memory catalog.
    pub catalog_seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let http = HttpConfig {
            host: lookup("HTTP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: parse_or("HTTP_PORT", lookup("HTTP_PORT"), DEFAULT_PORT)?,
        };
        let database = match lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    lookup("DATABASE_MAX_CONNECTIONS"),
                    DEFAULT_MAX_CONNECTIONS,
                )?,
            }),
            None => None,
        };
        let catalog_seed = lookup("CATALOG_SEED_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            http,
            database,
            catalog_seed,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_owned(),
            value: raw,
        }),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for environment variable {key}")]
    Invalid { key: String, value: String },
}

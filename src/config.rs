use std::env;

use time::UtcOffset;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Url,
    pub max_connections: u32,
    /// Offset class times are shown in. Bangkok by default.
    pub display_offset: UtcOffset,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let database_url = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
            name: "DATABASE_URL",
            reason: e.to_string(),
        })?;
        if !matches!(database_url.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::Invalid {
                name: "DATABASE_URL",
                reason: format!("unsupported scheme '{}'", database_url.scheme()),
            });
        }

        let max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: "DB_MAX_CONNECTIONS",
                reason: format!("'{v}' is not a number"),
            })?,
            None => 5,
        };

        let hours: i8 = match get("DISPLAY_UTC_OFFSET_HOURS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: "DISPLAY_UTC_OFFSET_HOURS",
                reason: format!("'{v}' is not a whole number of hours"),
            })?,
            None => 7,
        };
        let display_offset = UtcOffset::from_hms(hours, 0, 0).map_err(|e| ConfigError::Invalid {
            name: "DISPLAY_UTC_OFFSET_HOURS",
            reason: e.to_string(),
        })?;

        Ok(Config { database_url, max_connections, display_offset })
    }

    /// Database location safe for logs.
    pub fn redacted_database_url(&self) -> String {
        let mut url = self.database_url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }
}

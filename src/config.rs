use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::notifier::NotifierConfig;
use crate::remote::{DEFAULT_BASE_URL, RemoteConfig};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://chore_sync.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub remote: RemoteConfig,
    pub notifier: Option<NotifierConfig>,
    pub sync_interval_secs: u64,
    pub probe_interval: Duration,
    pub listen_addr: SocketAddr,
}

impl AppConfig {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?);
        let remote = RemoteConfig {
            base_url: get("API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_token: get("API_TOKEN"),
            timeout,
        };

        let notifier = match get("NOTIFIER_URL") {
            Some(url) => {
                let user_id = get("USER_ID").ok_or_else(|| {
                    AppError::BadRequest("USER_ID is required when NOTIFIER_URL is set".to_string())
                })?;
                let user_id = user_id
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("USER_ID is not a number: {}", user_id)))?;
                Some(NotifierConfig::new(url, user_id))
            }
            None => None,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            remote,
            notifier,
            sync_interval_secs: parse_or(&get, "SYNC_INTERVAL_SECS", 900)?,
            probe_interval: Duration::from_secs(parse_or(&get, "PROBE_INTERVAL_SECS", 20)?),
            listen_addr: parse_or(&get, "LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 3030)))?,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REFRESH_SECS: u64 = 30;

/// Process settings read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    /// JSON acquisition config; built-in defaults when unset.
    pub acquisition_path: Option<PathBuf>,
    /// `json` or `text`.
    pub log_format: String,
    pub refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let acquisition_path = std::env::var("LIMITUP_CONFIG").ok().map(PathBuf::from);
        let log_format =
            std::env::var("LIMITUP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
        let refresh_secs = std::env::var("LIMITUP_SNAPSHOT_REFRESH_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REFRESH_SECS);

        Self {
            acquisition_path,
            log_format,
            refresh_interval: Duration::from_secs(refresh_secs),
        }
    }
}

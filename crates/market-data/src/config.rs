//! Acquisition layer configuration.
//!
//! Loaded once at startup and injected into [`AcquisitionService`](crate::AcquisitionService).
//! Every field has a default so a partial JSON document is enough.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Bounds applied to configured per-minute ceilings.
const MIN_MINUTE_CEILING: u32 = 1;
const MAX_MINUTE_CEILING: u32 = 100_000;

/// Cooldown window for one failure domain, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownWindow {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl CooldownWindow {
    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}

impl Default for CooldownWindow {
    fn default() -> Self {
        Self {
            base_secs: 3600,
            max_secs: 86_400,
        }
    }
}

/// Failure cooldown settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownSettings {
    /// Window used by domains without an explicit entry.
    pub default: CooldownWindow,

    /// Per-domain overrides.
    pub domains: BTreeMap<String, CooldownWindow>,

    /// After recovering from a failure streak, keep the grown cooldown as
    /// the new base instead of returning to the configured one.
    pub ratchet_base_on_recovery: bool,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        let mut domains = BTreeMap::new();
        domains.insert(
            "minute_bars".to_string(),
            CooldownWindow {
                base_secs: 1800,
                max_secs: 3600,
            },
        );
        Self {
            default: CooldownWindow::default(),
            domains,
            ratchet_base_on_recovery: true,
        }
    }
}

impl CooldownSettings {
    pub fn window_for(&self, domain: &str) -> CooldownWindow {
        self.domains.get(domain).copied().unwrap_or(self.default)
    }
}

/// Cache freshness settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub snapshot_ttl_secs: u64,
    pub quotes_ttl_secs: u64,
    pub base_info_ttl_secs: u64,
    /// Minimum spacing between refreshes of same-day minute bars.
    pub minute_bars_refresh_secs: u64,
    /// Minimum spacing between refreshes of daily bars before the close.
    pub daily_bars_refresh_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: 900,
            quotes_ttl_secs: 30,
            base_info_ttl_secs: 3600,
            minute_bars_refresh_secs: 600,
            daily_bars_refresh_secs: 3600,
        }
    }
}

/// One trading window, `HH:MM` local exchange time, inclusive on both ends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindowConfig {
    pub start: String,
    pub end: String,
}

impl SessionWindowConfig {
    pub fn parse(&self) -> Result<(NaiveTime, NaiveTime), MarketDataError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| MarketDataError::Config(format!("invalid session time '{}': {}", s, e)))
        };
        let (start, end) = (parse(&self.start)?, parse(&self.end)?);
        if start > end {
            return Err(MarketDataError::Config(format!(
                "session window {}-{} ends before it starts",
                self.start, self.end
            )));
        }
        Ok((start, end))
    }
}

/// Trading session calendar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub trading_days: Vec<Weekday>,
    pub windows: Vec<SessionWindowConfig>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            trading_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            windows: vec![
                SessionWindowConfig {
                    start: "09:15".to_string(),
                    end: "11:35".to_string(),
                },
                SessionWindowConfig {
                    start: "12:55".to_string(),
                    end: "15:05".to_string(),
                },
            ],
        }
    }
}

/// Endpoint URL templates of an HTTP provider, one per dataset.
///
/// Placeholders: `{codes}` (comma-joined bare codes), `{prefixed_codes}`,
/// `{code}`, `{prefixed}`, `{date}` (`YYYY-MM-DD`), `{days}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEndpoints {
    pub full_market_snapshot: Option<String>,
    pub quotes: Option<String>,
    pub minute_bars: Option<String>,
    pub daily_bars: Option<String>,
    pub indices: Option<String>,
    pub base_info: Option<String>,
}

/// Definition of an upstream reachable over HTTP with a JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Throttle channel; defaults to the lowercased id.
    #[serde(default)]
    pub channel: Option<String>,

    /// Failure domain; defaults to the lowercased id.
    #[serde(default)]
    pub cooldown_domain: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Per-minute ceiling for metered providers.
    #[serde(default)]
    pub minute_ceiling: Option<u32>,

    #[serde(default)]
    pub endpoints: HttpEndpoints,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    10
}

fn default_timeout_ms() -> u64 {
    6000
}

/// Top-level configuration of the acquisition layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// IANA timezone of the exchange (session gate and quota minute keys).
    pub timezone: String,

    pub session: SessionSettings,

    /// Minimum spacing between calls per throttle channel, in milliseconds.
    pub channel_intervals_ms: BTreeMap<String, u64>,

    /// Per-minute call ceilings per metered provider id.
    pub minute_ceilings: BTreeMap<String, u32>,

    pub cooldowns: CooldownSettings,

    pub cache: CacheSettings,

    /// Maximum codes per upstream quotes request.
    pub quote_batch_size: usize,

    /// Minimum spacing between repeated skip/failure log lines.
    pub log_throttle_secs: u64,

    pub providers: Vec<HttpProviderConfig>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let channel_intervals_ms = [
            ("biying", 25),
            ("akshare", 1200),
            ("sina", 250),
            ("eastmoney", 300),
            ("tushare", 1000),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let mut minute_ceilings = BTreeMap::new();
        minute_ceilings.insert("biying".to_string(), 3000);

        Self {
            timezone: "Asia/Shanghai".to_string(),
            session: SessionSettings::default(),
            channel_intervals_ms,
            minute_ceilings,
            cooldowns: CooldownSettings::default(),
            cache: CacheSettings::default(),
            quote_batch_size: 50,
            log_throttle_secs: 60,
            providers: Vec::new(),
        }
    }
}

impl AcquisitionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, MarketDataError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MarketDataError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MarketDataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MarketDataError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        self.tz()?;

        for window in &self.session.windows {
            window.parse()?;
        }

        let windows = std::iter::once(("<default>", &self.cooldowns.default))
            .chain(self.cooldowns.domains.iter().map(|(k, v)| (k.as_str(), v)));
        for (domain, window) in windows {
            if window.base_secs == 0 || window.base_secs > window.max_secs {
                return Err(MarketDataError::Config(format!(
                    "cooldown for '{}' must satisfy 0 < base ({}) <= max ({})",
                    domain, window.base_secs, window.max_secs
                )));
            }
        }

        if self.quote_batch_size == 0 {
            return Err(MarketDataError::Config(
                "quote_batch_size must be positive".to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(MarketDataError::Config("provider id is empty".to_string()));
            }
        }

        Ok(())
    }

    /// Exchange timezone.
    pub fn tz(&self) -> Result<Tz, MarketDataError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| MarketDataError::Config(format!("unknown timezone '{}': {}", self.timezone, e)))
    }

    /// Configured spacing for a channel, if any.
    pub fn channel_interval(&self, channel: &str) -> Option<Duration> {
        self.channel_intervals_ms
            .get(&channel.to_ascii_lowercase())
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Configured ceiling for a metered provider, clamped to a sane range.
    pub fn minute_ceiling(&self, provider: &str) -> Option<u32> {
        self.minute_ceilings
            .get(&provider.to_ascii_lowercase())
            .map(|c| (*c).clamp(MIN_MINUTE_CEILING, MAX_MINUTE_CEILING))
    }

    pub fn log_throttle(&self) -> Duration {
        Duration::from_secs(self.log_throttle_secs)
    }
}

//! Trading session gate.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::AcquisitionConfig;
use crate::errors::MarketDataError;

/// Decides whether network work is allowed right now.
pub trait SessionGate: Send + Sync {
    fn is_open(&self) -> bool;
}

/// Gate that never closes, for datasets fetched around the clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOpen;

impl SessionGate for AlwaysOpen {
    fn is_open(&self) -> bool {
        true
    }
}

/// Weekday plus time-of-day windows in the exchange timezone.
///
/// Windows are inclusive at both ends. Exchange holidays are not modelled;
/// on a weekday holiday the gate is open and providers simply return the
/// previous session's data.
#[derive(Clone, Debug)]
pub struct TradingSessionWindow {
    tz: Tz,
    trading_days: Vec<Weekday>,
    windows: Vec<(NaiveTime, NaiveTime)>,
}

impl TradingSessionWindow {
    pub fn new(tz: Tz, trading_days: Vec<Weekday>, windows: Vec<(NaiveTime, NaiveTime)>) -> Self {
        Self {
            tz,
            trading_days,
            windows,
        }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Result<Self, MarketDataError> {
        let windows = config
            .session
            .windows
            .iter()
            .map(|w| w.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config.tz()?, config.session.trading_days.clone(), windows))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Whether the market is open at `at`.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        if !self.trading_days.contains(&local.weekday()) {
            return false;
        }
        let time = local.time();
        self.windows
            .iter()
            .any(|(start, end)| time >= *start && time <= *end)
    }
}

impl TradingSessionWindow {
    /// When trading on `date` is over: the end of its last window, or the
    /// following midnight when no windows are configured.
    pub fn session_close(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = match self.windows.iter().map(|(_, end)| *end).max() {
            Some(end) => date.and_time(end),
            None => date.succ_opt()?.and_time(NaiveTime::MIN),
        };
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
    }

    /// Whether data fetched at `fetched_at` already covers all of `date`.
    pub fn is_settled(&self, date: NaiveDate, fetched_at: DateTime<Utc>) -> bool {
        self.session_close(date).is_some_and(|close| fetched_at > close)
    }
}

impl SessionGate for TradingSessionWindow {
    fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}

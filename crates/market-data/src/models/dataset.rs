use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::instrument::InstrumentCode;
use super::quote::{BaseInfo, DailyBar, IndexQuote, MarketSnapshot, MinuteBar};

/// Kinds of dataset a provider may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    FullMarketSnapshot,
    Quotes,
    MinuteBars,
    DailyBars,
    Indices,
    BaseInfo,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullMarketSnapshot => "full_market_snapshot",
            Self::Quotes => "quotes",
            Self::MinuteBars => "minute_bars",
            Self::DailyBars => "daily_bars",
            Self::Indices => "indices",
            Self::BaseInfo => "base_info",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request handed to a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    FullMarketSnapshot,
    Quotes { codes: Vec<InstrumentCode> },
    MinuteBars { code: InstrumentCode, date: NaiveDate },
    /// The most recent `days` daily bars.
    DailyBars { code: InstrumentCode, days: u32 },
    /// The major market indices.
    Indices,
    BaseInfo,
}

impl DataRequest {
    pub fn kind(&self) -> DatasetKind {
        match self {
            Self::FullMarketSnapshot => DatasetKind::FullMarketSnapshot,
            Self::Quotes { .. } => DatasetKind::Quotes,
            Self::MinuteBars { .. } => DatasetKind::MinuteBars,
            Self::DailyBars { .. } => DatasetKind::DailyBars,
            Self::Indices => DatasetKind::Indices,
            Self::BaseInfo => DatasetKind::BaseInfo,
        }
    }

    /// Quota cost of the request: one upstream call per request.
    pub fn cost(&self) -> u32 {
        1
    }
}

/// A normalized provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    Snapshot(MarketSnapshot),
    Bars(Vec<MinuteBar>),
    DailyBars(Vec<DailyBar>),
    Indices(Vec<IndexQuote>),
    BaseInfo(BaseInfo),
}

impl DataPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Snapshot(s) => s.is_empty(),
            Self::Bars(b) => b.is_empty(),
            Self::DailyBars(b) => b.is_empty(),
            Self::Indices(i) => i.is_empty(),
            Self::BaseInfo(b) => b.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Snapshot(s) => s.len(),
            Self::Bars(b) => b.len(),
            Self::DailyBars(b) => b.len(),
            Self::Indices(i) => i.len(),
            Self::BaseInfo(b) => b.len(),
        }
    }

    pub fn into_snapshot(self) -> Option<MarketSnapshot> {
        match self {
            Self::Snapshot(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_bars(self) -> Option<Vec<MinuteBar>> {
        match self {
            Self::Bars(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_daily_bars(self) -> Option<Vec<DailyBar>> {
        match self {
            Self::DailyBars(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_indices(self) -> Option<Vec<IndexQuote>> {
        match self {
            Self::Indices(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_base_info(self) -> Option<BaseInfo> {
        match self {
            Self::BaseInfo(b) => Some(b),
            _ => None,
        }
    }
}

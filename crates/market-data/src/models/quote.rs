use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::instrument::InstrumentCode;

/// One instrument's row in a market snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub code: InstrumentCode,

    #[serde(default)]
    pub name: String,

    /// Latest traded price
    pub price: Decimal,

    /// Previous session's close
    pub prev_close: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,

    /// Traded volume in shares
    #[serde(default)]
    pub volume: Decimal,

    /// Turnover rate in percent (volume / free-float shares)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turnover_rate: Option<Decimal>,

    /// Free-float market value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_market_value: Option<Decimal>,
}

impl SnapshotRow {
    /// Percent change against the previous close, rounded to 2 dp.
    pub fn change_percent(&self) -> Decimal {
        if self.prev_close <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.price - self.prev_close) / self.prev_close * Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Daily upper price limit: +20% on growth boards, +10% elsewhere.
    pub fn limit_up_price(&self) -> Decimal {
        let ratio = if self.code.is_growth_board() {
            Decimal::new(12, 1)
        } else {
            Decimal::new(11, 1)
        };
        (self.prev_close * ratio).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Whether the price has reached the upper limit (one-tick tolerance).
    pub fn is_at_limit_up(&self) -> bool {
        if self.prev_close <= Decimal::ZERO {
            return false;
        }
        self.price >= self.limit_up_price() - Decimal::new(1, 2)
    }

    /// Fill turnover rate and free-float value from circulating shares
    /// when the provider didn't supply them.
    pub fn enrich(&mut self, circ_shares: Decimal) {
        if circ_shares <= Decimal::ZERO {
            return;
        }
        if self.turnover_rate.is_none() {
            self.turnover_rate =
                Some((self.volume / circ_shares * Decimal::ONE_HUNDRED).round_dp(2));
        }
        if self.float_market_value.is_none() {
            self.float_market_value = Some(circ_shares * self.price);
        }
    }
}

/// Market-wide (or partial) snapshot table keyed by instrument code.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub rows: BTreeMap<InstrumentCode, SnapshotRow>,
}

impl MarketSnapshot {
    pub fn from_rows(rows: impl IntoIterator<Item = SnapshotRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.code, r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, code: &InstrumentCode) -> Option<&SnapshotRow> {
        self.rows.get(code)
    }

    /// Copy of just the requested codes that are present.
    pub fn subset(&self, codes: &[InstrumentCode]) -> Self {
        Self {
            rows: codes
                .iter()
                .filter_map(|c| self.rows.get(c).map(|r| (*c, r.clone())))
                .collect(),
        }
    }

    /// Apply [`SnapshotRow::enrich`] from reference data.
    pub fn enrich_with(&mut self, base: &BaseInfo) {
        for (code, row) in self.rows.iter_mut() {
            if let Some(entry) = base.entries.get(code) {
                row.enrich(entry.circ_shares);
            }
        }
    }
}

/// One-minute bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinuteBar {
    /// Local exchange time at the start of the minute
    pub time: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

/// One daily (session) bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

/// Latest level of a market index.
///
/// Index symbols keep their exchange prefix (`sh000001`, `sz399001`) because
/// the bare digits collide with listed instruments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub price: Decimal,
    pub prev_close: Decimal,
    /// Traded amount for the session
    #[serde(default)]
    pub turnover: Decimal,
}

impl IndexQuote {
    /// Percent change versus the previous close, two decimals.
    pub fn change_percent(&self) -> Decimal {
        if self.prev_close <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.price - self.prev_close) / self.prev_close * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

/// Reference data for one instrument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseInfoEntry {
    pub code: InstrumentCode,
    #[serde(default)]
    pub name: String,
    /// Circulating (free-float) shares
    #[serde(default)]
    pub circ_shares: Decimal,
}

/// Reference data table (names and circulating shares).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseInfo {
    pub entries: HashMap<InstrumentCode, BaseInfoEntry>,
}

impl BaseInfo {
    pub fn from_entries(entries: impl IntoIterator<Item = BaseInfoEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.code, e)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

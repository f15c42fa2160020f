//! Payload validation.
//!
//! Rows quoted before the first trade carry a zero price; those are repaired
//! to the previous close. Rows that still cannot be right (no previous close,
//! inverted high/low, negative volume) are dropped, and a payload with nothing
//! usable left is rejected so the failover chain moves on to the next provider.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{
    BaseInfo, DailyBar, DataPayload, IndexQuote, MarketSnapshot, MinuteBar, SnapshotRow,
};

/// Validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Maximum allowed price value (sanity check).
    pub max_price: Option<Decimal>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(100_000i64)),
        }
    }
}

/// Validator for provider payloads.
pub struct SnapshotValidator {
    config: ValidatorConfig,
}

impl SnapshotValidator {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Filter a payload down to its valid rows.
    ///
    /// Returns `EmptyResponse` for an empty payload and `MalformedResponse`
    /// when every row was rejected.
    pub fn validate(&self, provider: &str, payload: DataPayload) -> Result<DataPayload, MarketDataError> {
        if payload.is_empty() {
            return Err(MarketDataError::EmptyResponse {
                provider: provider.to_string(),
            });
        }

        let original = payload.len();
        let validated = match payload {
            DataPayload::Snapshot(snapshot) => DataPayload::Snapshot(MarketSnapshot {
                rows: snapshot
                    .rows
                    .into_iter()
                    .filter_map(|(code, row)| {
                        let row = repair_row(row);
                        self.check_row(&row).ok().map(|_| (code, row))
                    })
                    .collect(),
            }),
            DataPayload::Bars(bars) => DataPayload::Bars(self.clean_bars(bars)),
            DataPayload::DailyBars(bars) => DataPayload::DailyBars(self.clean_daily_bars(bars)),
            DataPayload::Indices(indices) => DataPayload::Indices(
                indices
                    .into_iter()
                    .map(repair_index)
                    .filter(|i| i.prev_close > Decimal::ZERO && i.turnover >= Decimal::ZERO)
                    .collect(),
            ),
            DataPayload::BaseInfo(info) => DataPayload::BaseInfo(BaseInfo {
                entries: info
                    .entries
                    .into_iter()
                    .filter(|(_, e)| e.circ_shares >= Decimal::ZERO)
                    .collect(),
            }),
        };

        let dropped = original - validated.len();
        if validated.is_empty() {
            return Err(MarketDataError::MalformedResponse {
                provider: provider.to_string(),
                message: format!("all {} rows failed validation", original),
            });
        }
        if dropped > 0 {
            warn!(
                "Dropped {} of {} invalid rows from '{}'",
                dropped, original, provider
            );
        }
        Ok(validated)
    }

    /// Check a single snapshot row. Expects [`repair_row`] to have run.
    pub fn check_row(&self, row: &SnapshotRow) -> Result<(), String> {
        if row.price <= Decimal::ZERO {
            return Err(format!("{}: non-positive price {}", row.code, row.price));
        }
        if row.prev_close <= Decimal::ZERO {
            return Err(format!("{}: non-positive previous close {}", row.code, row.prev_close));
        }
        if let (Some(high), Some(low)) = (row.high, row.low) {
            if high < low {
                return Err(format!("{}: high ({}) below low ({})", row.code, high, low));
            }
        }
        if row.volume < Decimal::ZERO {
            return Err(format!("{}: negative volume {}", row.code, row.volume));
        }
        if let Some(max) = self.config.max_price {
            if row.price > max {
                return Err(format!("{}: price {} exceeds sanity limit {}", row.code, row.price, max));
            }
        }
        Ok(())
    }

    /// Keep well-formed bars in time order, dropping duplicates.
    fn clean_bars(&self, mut bars: Vec<MinuteBar>) -> Vec<MinuteBar> {
        bars.retain(|b| {
            b.low > Decimal::ZERO
                && b.high >= b.low
                && b.close >= b.low
                && b.close <= b.high
                && b.volume >= Decimal::ZERO
        });
        bars.sort_by_key(|b| b.time);
        bars.dedup_by_key(|b| b.time);
        bars
    }

    fn clean_daily_bars(&self, mut bars: Vec<DailyBar>) -> Vec<DailyBar> {
        bars.retain(|b| {
            b.low > Decimal::ZERO
                && b.high >= b.low
                && b.close >= b.low
                && b.close <= b.high
                && b.volume >= Decimal::ZERO
        });
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        bars
    }
}

/// A row with no trade yet is quoted at its previous close.
///
/// Missing or zero open/high/low collapse onto the repaired price.
pub fn repair_row(mut row: SnapshotRow) -> SnapshotRow {
    if row.price > Decimal::ZERO || row.prev_close <= Decimal::ZERO {
        return row;
    }
    let anchor = row.prev_close;
    row.price = anchor;
    for field in [&mut row.open, &mut row.high, &mut row.low] {
        if field.map_or(true, |v| v <= Decimal::ZERO) {
            *field = Some(anchor);
        }
    }
    row
}

fn repair_index(mut index: IndexQuote) -> IndexQuote {
    if index.price <= Decimal::ZERO && index.prev_close > Decimal::ZERO {
        index.price = index.prev_close;
    }
    index
}

impl Default for SnapshotValidator {
    fn default() -> Self {
        Self::new()
    }
}

//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for identifiers (ProviderId, ChannelName, DomainName)
//! - `instrument` - Instrument codes (InstrumentCode) and listing exchange
//! - `quote` - Snapshot rows, snapshot tables, bars, index levels and reference data
//! - `dataset` - The provider boundary: requests, payloads and dataset kinds

mod dataset;
mod instrument;
mod quote;
mod types;

pub use dataset::{DataPayload, DataRequest, DatasetKind};
pub use instrument::{Exchange, InstrumentCode};
pub use quote::{
    BaseInfo, BaseInfoEntry, DailyBar, IndexQuote, MarketSnapshot, MinuteBar, SnapshotRow,
};
pub use types::{ChannelName, DomainName, ProviderId};

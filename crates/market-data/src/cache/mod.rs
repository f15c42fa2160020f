//! Dataset caching and trading-session gating.

mod session;
mod snapshot_cache;

pub use session::{AlwaysOpen, SessionGate, TradingSessionWindow};
pub use snapshot_cache::{CachedDataset, DatasetView, Freshness, SnapshotCache};

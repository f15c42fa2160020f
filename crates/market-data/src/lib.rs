//! LimitUp Market Data Crate
//!
//! This crate is the acquisition layer between unreliable, rate-limited
//! equity data providers and the consumers that need a stable view of the
//! market (the limit-up scanner and the history syncer).
//!
//! # Overview
//!
//! The acquisition layer provides:
//! - Per-channel request throttling and per-minute quota metering
//! - Hard/soft failure classification driving exponential cooldowns
//! - Priority-ordered failover across providers
//! - A last-known-good cache with single-flight refresh
//! - Trading-session gating so nothing is fetched while the market is closed
//!
//! # Architecture
//!
//! ```text
//! +----------------------+
//! | AcquisitionService   |  snapshot / quotes / minute + daily bars / indices
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |   SnapshotCache      |  freshness check, session gate, per-key refresh lock
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |   FailoverChain      |  priority order; cooldown -> quota -> throttle per provider
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |  MarketDataProvider  |  one upstream call
//! +----------------------+
//! ```
//!
//! # Core Types
//!
//! - [`AcquisitionService`] - The consumer API
//! - [`AcquisitionConfig`] - Configuration loaded once at startup
//! - [`DatasetView`] - Fresh, stale or empty result with provenance
//! - [`MarketSnapshot`] / [`SnapshotRow`] - Quote tables keyed by [`InstrumentCode`]
//! - [`MinuteBar`] / [`DailyBar`] - OHLCV bars
//! - [`IndexQuote`] - Market index level

pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod service;

// Re-export all public types from models
pub use models::{
    BaseInfo, BaseInfoEntry, ChannelName, DailyBar, DataPayload, DataRequest, DatasetKind,
    DomainName, Exchange, IndexQuote, InstrumentCode, MarketSnapshot, MinuteBar, ProviderId,
    SnapshotRow,
};

pub use cache::{AlwaysOpen, CachedDataset, DatasetView, Freshness, SessionGate, TradingSessionWindow};
pub use config::{AcquisitionConfig, HttpProviderConfig};
pub use errors::{FailureClass, MarketDataError};
pub use service::AcquisitionService;

// Re-export provider types
pub use provider::{HttpJsonProvider, MarketDataProvider, ProviderCapabilities, RateLimit};

// Re-export registry types
pub use registry::{
    ChainOutcome, CooldownController, CooldownMetrics, CooldownStatus, FailoverChain,
    FetchDiagnostics, QuotaMeter, QuotaUsage, RequestThrottle, SkipReason,
};

//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all upstream adapters implement
//! - Provider capabilities and pacing contract
//! - `HttpJsonProvider`, a configurable adapter for JSON-over-HTTP upstreams
//!
//! Adapters only perform a single request and report the outcome. Pacing,
//! metering, cooldowns and failover live in the registry module.

mod capabilities;
mod traits;

pub mod http_json;

// Re-exports
pub use capabilities::{ProviderCapabilities, RateLimit};
pub use http_json::HttpJsonProvider;
pub use traits::MarketDataProvider;

//! Provider capabilities and rate limiting configuration.
//!
//! This module defines structures for describing what a market data provider
//! can do and how it should be paced.

use std::time::Duration;

use crate::models::DatasetKind;

/// Describes the capabilities of a market data provider.
///
/// Used by the failover chain to skip providers that cannot serve a
/// dataset at all.
#[derive(Clone, Debug, Default)]
pub struct ProviderCapabilities {
    /// Datasets this provider serves.
    pub datasets: Vec<DatasetKind>,
}

impl ProviderCapabilities {
    pub fn new(datasets: impl IntoIterator<Item = DatasetKind>) -> Self {
        Self {
            datasets: datasets.into_iter().collect(),
        }
    }

    pub fn supports(&self, kind: DatasetKind) -> bool {
        self.datasets.contains(&kind)
    }
}

/// Rate limiting contract declared by a provider.
///
/// Controls how aggressively we can call a provider to avoid
/// hitting their rate limits and getting blocked. Configuration may
/// override both values per channel / provider.
#[derive(Clone, Debug)]
pub struct RateLimit {
    /// Minimum spacing between two calls on the provider's channel.
    pub min_interval: Duration,

    /// Per-minute call ceiling for metered providers.
    pub minute_ceiling: Option<u32>,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
            minute_ceiling: None,
        }
    }
}

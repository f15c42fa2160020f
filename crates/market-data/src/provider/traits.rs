//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! upstream adapters must implement.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{ChannelName, DataPayload, DataRequest, DomainName};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Trait for upstream market data providers.
///
/// Implement this trait to add support for a new market data source.
/// The failover chain uses the provider's priority, channel, failure
/// domain and rate limit to decide when and how to call it; the adapter
/// itself only performs one request and reports the outcome.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use limitup_market_data::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities::new([DatasetKind::Quotes])
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit::default()
///     }
///
///     async fn fetch(&self, request: &DataRequest) -> Result<DataPayload, MarketDataError> {
///         // ... call upstream
///     }
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Usually a constant string like "SINA", "BIYING"; configured
    /// adapters take it from their configuration.
    /// Used for logging, diagnostics and quota metering.
    fn id(&self) -> &str;

    /// Provider priority for ordering.
    ///
    /// Lower values = tried earlier. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    /// Throttle channel this provider's calls are serialized on.
    ///
    /// Providers hitting the same upstream host should share a channel.
    /// Defaults to the lowercased provider id.
    fn channel(&self) -> ChannelName {
        ChannelName::Owned(self.id().to_ascii_lowercase())
    }

    /// Failure domain whose cooldown gates this provider.
    ///
    /// Several adapters backed by the same upstream may share a domain so
    /// that a block detected through one also pauses the others.
    /// Defaults to the lowercased provider id.
    fn cooldown_domain(&self) -> DomainName {
        DomainName::Owned(self.id().to_ascii_lowercase())
    }

    /// Describes which datasets this provider can serve.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Pacing contract for this provider.
    fn rate_limit(&self) -> RateLimit;

    /// Perform a single upstream request.
    ///
    /// Implementations attach their own per-request timeout and map
    /// transport and HTTP failures to [`MarketDataError`] variants so
    /// the chain can classify them.
    async fn fetch(&self, request: &DataRequest) -> Result<DataPayload, MarketDataError>;
}

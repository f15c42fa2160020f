//! Error types and failure classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The error enum used at the provider boundary
//! - [`FailureClass`]: Hard/soft classification that drives cooldown severity

mod failure;

pub use failure::{classify_message, FailureClass};

use thiserror::Error;

/// Errors that can occur while talking to an upstream provider.
///
/// These never reach consumers of the acquisition service: every failure
/// is absorbed by the failover chain and turned into a cooldown update.
/// Each variant maps to a [`FailureClass`] via
/// [`failure_class`](Self::failure_class).
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The remote end aborted or reset the connection.
    #[error("Connection reset: {provider} - {message}")]
    ConnectionReset {
        /// The provider whose connection dropped
        provider: String,
        /// Transport error text
        message: String,
    },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited (too many requests): {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The provider refused the request (HTTP 403 or an explicit block page).
    #[error("Forbidden: {provider}")]
    Forbidden {
        /// The provider that blocked us
        provider: String,
    },

    /// A network failure that does not look like active blocking.
    #[error("Transient network error: {provider} - {message}")]
    Transient {
        /// The provider being called
        provider: String,
        /// Transport error text
        message: String,
    },

    /// The provider answered with nothing usable.
    #[error("Empty response: {provider}")]
    EmptyResponse {
        /// The provider that returned an empty payload
        provider: String,
    },

    /// The provider answered with a payload we could not decode or validate.
    #[error("Malformed response: {provider} - {message}")]
    MalformedResponse {
        /// The provider that returned the payload
        provider: String,
        /// What was wrong with it
        message: String,
    },

    /// The local per-minute budget for a metered provider is spent.
    /// This is not an upstream failure; the provider is simply skipped.
    #[error("Quota exceeded: {provider}")]
    QuotaExceeded {
        /// The metered provider
        provider: String,
    },

    /// The provider does not serve the requested dataset.
    #[error("Operation '{operation}' not supported by provider '{provider}'")]
    NotSupported {
        /// The dataset or operation requested
        operation: String,
        /// The provider that doesn't support it
        provider: String,
    },

    /// Any other provider-specific failure.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// An instrument code could not be parsed.
    #[error("Invalid instrument code: {0}")]
    InvalidCode(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Returns the failure classification for this error.
    ///
    /// Typed variants map directly; untyped ones (`ProviderError`,
    /// `Transient`, `Network`) fall back to a keyword match on their
    /// description so that e.g. a "connection reset by peer" buried in a
    /// provider message still counts as a hard failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use limitup_market_data::errors::{FailureClass, MarketDataError};
    ///
    /// let error = MarketDataError::RateLimited { provider: "SINA".to_string() };
    /// assert_eq!(error.failure_class(), FailureClass::Hard);
    ///
    /// let error = MarketDataError::EmptyResponse { provider: "SINA".to_string() };
    /// assert_eq!(error.failure_class(), FailureClass::Soft);
    /// ```
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionReset { .. }
            | Self::RateLimited { .. }
            | Self::Forbidden { .. } => FailureClass::Hard,

            Self::EmptyResponse { .. }
            | Self::MalformedResponse { .. }
            | Self::QuotaExceeded { .. }
            | Self::NotSupported { .. }
            | Self::InvalidCode(_)
            | Self::Config(_) => FailureClass::Soft,

            Self::Transient { .. } | Self::ProviderError { .. } | Self::Network(_) => {
                classify_message(&self.to_string())
            }
        }
    }

    /// Whether this error should move the provider's failure domain
    /// toward cooling. Local skips (quota, unsupported) do not.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            Self::QuotaExceeded { .. } | Self::NotSupported { .. } | Self::InvalidCode(_)
        )
    }
}

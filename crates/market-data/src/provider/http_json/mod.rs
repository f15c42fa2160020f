//! Configurable HTTP provider for upstreams that speak plain JSON.
//!
//! Each dataset maps to one URL template (see
//! [`HttpEndpoints`](crate::config::HttpEndpoints)). The body must be a
//! JSON array of rows, or an object carrying that array under `data`.
//! Vendor-specific wire formats are adapted in front of this provider,
//! typically by a small proxy, and are not parsed here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::HttpProviderConfig;
use crate::errors::{classify_message, FailureClass, MarketDataError};
use crate::models::{
    BaseInfo, BaseInfoEntry, ChannelName, DailyBar, DataPayload, DataRequest, DatasetKind,
    DomainName, IndexQuote, InstrumentCode, MarketSnapshot, MinuteBar, SnapshotRow,
};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

/// Rows either at the top level or wrapped in `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Bare(Vec<T>),
    Wrapped { data: Option<Vec<T>> },
}

impl<T> Envelope<T> {
    fn into_rows(self) -> Vec<T> {
        match self {
            Self::Bare(rows) => rows,
            Self::Wrapped { data } => data.unwrap_or_default(),
        }
    }
}

/// Provider backed by a set of JSON endpoints.
pub struct HttpJsonProvider {
    id: String,
    priority: u8,
    channel: Option<String>,
    cooldown_domain: Option<String>,
    minute_ceiling: Option<u32>,
    config: HttpProviderConfig,
    client: Client,
}

impl HttpJsonProvider {
    /// Build a provider from its configuration.
    pub fn new(config: HttpProviderConfig) -> Result<Self, MarketDataError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                MarketDataError::Config(format!("provider {}: bad header name '{}': {}", config.id, name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                MarketDataError::Config(format!("provider {}: bad header value: {}", config.id, e))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                MarketDataError::Config(format!("provider {}: failed to build HTTP client: {}", config.id, e))
            })?;

        Ok(Self {
            id: config.id.clone(),
            priority: config.priority,
            channel: config.channel.clone(),
            cooldown_domain: config.cooldown_domain.clone(),
            minute_ceiling: config.minute_ceiling,
            config,
            client,
        })
    }

    fn template_for(&self, kind: DatasetKind) -> Option<&str> {
        let endpoints = &self.config.endpoints;
        match kind {
            DatasetKind::FullMarketSnapshot => endpoints.full_market_snapshot.as_deref(),
            DatasetKind::Quotes => endpoints.quotes.as_deref(),
            DatasetKind::MinuteBars => endpoints.minute_bars.as_deref(),
            DatasetKind::DailyBars => endpoints.daily_bars.as_deref(),
            DatasetKind::Indices => endpoints.indices.as_deref(),
            DatasetKind::BaseInfo => endpoints.base_info.as_deref(),
        }
    }

    fn build_url(&self, request: &DataRequest) -> Result<String, MarketDataError> {
        let template = self
            .template_for(request.kind())
            .ok_or_else(|| MarketDataError::NotSupported {
                operation: request.kind().to_string(),
                provider: self.id.clone(),
            })?;
        Ok(expand_template(template, request))
    }

    /// GET the URL and return the body text.
    async fn get(&self, url: &str) -> Result<String, MarketDataError> {
        debug!("{} request: {}", self.id, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: self.id.clone(),
            });
        }

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(MarketDataError::Forbidden {
                provider: self.id.clone(),
            });
        }

        if !status.is_success() {
            return Err(MarketDataError::ProviderError {
                provider: self.id.clone(),
                message: format!("HTTP {}", status),
            });
        }

        response.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, error: reqwest::Error) -> MarketDataError {
        if error.is_timeout() {
            return MarketDataError::Timeout {
                provider: self.id.clone(),
            };
        }
        // reqwest's top-level message hides the cause, which is what
        // keyword classification needs to see.
        let mut message = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        if classify_message(&message) == FailureClass::Hard {
            MarketDataError::ConnectionReset {
                provider: self.id.clone(),
                message,
            }
        } else {
            MarketDataError::Transient {
                provider: self.id.clone(),
                message,
            }
        }
    }

    fn parse_rows<T: DeserializeOwned>(&self, body: &str) -> Result<Vec<T>, MarketDataError> {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(MarketDataError::EmptyResponse {
                provider: self.id.clone(),
            });
        }

        let rows = serde_json::from_str::<Envelope<T>>(trimmed)
            .map_err(|e| {
                warn!("{} returned an undecodable body: {}", self.id, e);
                MarketDataError::MalformedResponse {
                    provider: self.id.clone(),
                    message: e.to_string(),
                }
            })?
            .into_rows();

        if rows.is_empty() {
            return Err(MarketDataError::EmptyResponse {
                provider: self.id.clone(),
            });
        }
        Ok(rows)
    }
}

/// Substitute request parameters into a URL template.
fn expand_template(template: &str, request: &DataRequest) -> String {
    let join = |codes: &[InstrumentCode], prefixed: bool| {
        codes
            .iter()
            .map(|c| if prefixed { c.prefixed() } else { c.as_str().to_string() })
            .collect::<Vec<_>>()
            .join(",")
    };

    match request {
        DataRequest::Quotes { codes } => template
            .replace("{prefixed_codes}", &join(codes, true))
            .replace("{codes}", &join(codes, false)),
        DataRequest::MinuteBars { code, date } => template
            .replace("{prefixed}", &code.prefixed())
            .replace("{code}", code.as_str())
            .replace("{date}", &date.format("%Y-%m-%d").to_string()),
        DataRequest::DailyBars { code, days } => template
            .replace("{prefixed}", &code.prefixed())
            .replace("{code}", code.as_str())
            .replace("{days}", &days.to_string()),
        DataRequest::FullMarketSnapshot | DataRequest::Indices | DataRequest::BaseInfo => {
            template.to_string()
        }
    }
}

#[async_trait]
impl MarketDataProvider for HttpJsonProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn channel(&self) -> ChannelName {
        match &self.channel {
            Some(channel) => ChannelName::Owned(channel.to_ascii_lowercase()),
            None => ChannelName::Owned(self.id.to_ascii_lowercase()),
        }
    }

    fn cooldown_domain(&self) -> DomainName {
        match &self.cooldown_domain {
            Some(domain) => DomainName::Owned(domain.to_ascii_lowercase()),
            None => DomainName::Owned(self.id.to_ascii_lowercase()),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new(
            [
                DatasetKind::FullMarketSnapshot,
                DatasetKind::Quotes,
                DatasetKind::MinuteBars,
                DatasetKind::DailyBars,
                DatasetKind::Indices,
                DatasetKind::BaseInfo,
            ]
            .into_iter()
            .filter(|kind| self.template_for(*kind).is_some()),
        )
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            minute_ceiling: self.minute_ceiling,
            ..RateLimit::default()
        }
    }

    async fn fetch(&self, request: &DataRequest) -> Result<DataPayload, MarketDataError> {
        let url = self.build_url(request)?;
        let body = self.get(&url).await?;

        match request {
            DataRequest::FullMarketSnapshot | DataRequest::Quotes { .. } => {
                let rows: Vec<SnapshotRow> = self.parse_rows(&body)?;
                Ok(DataPayload::Snapshot(MarketSnapshot::from_rows(rows)))
            }
            DataRequest::MinuteBars { .. } => {
                let mut bars: Vec<MinuteBar> = self.parse_rows(&body)?;
                bars.sort_by_key(|b| b.time);
                Ok(DataPayload::Bars(bars))
            }
            DataRequest::DailyBars { .. } => {
                let mut bars: Vec<DailyBar> = self.parse_rows(&body)?;
                bars.sort_by_key(|b| b.date);
                Ok(DataPayload::DailyBars(bars))
            }
            DataRequest::Indices => {
                let indices: Vec<IndexQuote> = self.parse_rows(&body)?;
                Ok(DataPayload::Indices(indices))
            }
            DataRequest::BaseInfo => {
                let entries: Vec<BaseInfoEntry> = self.parse_rows(&body)?;
                Ok(DataPayload::BaseInfo(BaseInfo::from_entries(entries)))
            }
        }
    }
}

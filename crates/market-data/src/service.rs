//! The acquisition service consumers talk to.
//!
//! One instance is built at startup and shared by `Arc`. Every public
//! method returns a [`DatasetView`]: fresh data, visibly stale data with
//! its fetch time, or nothing. Errors never reach the caller.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};

use crate::cache::{
    AlwaysOpen, CachedDataset, DatasetView, SessionGate, SnapshotCache, TradingSessionWindow,
};
use crate::config::AcquisitionConfig;
use crate::errors::{FailureClass, MarketDataError};
use crate::models::{
    BaseInfo, DailyBar, DataPayload, DataRequest, IndexQuote, InstrumentCode, MarketSnapshot,
    MinuteBar, ProviderId, SnapshotRow,
};
use crate::provider::{HttpJsonProvider, MarketDataProvider};
use crate::registry::{
    CooldownController, CooldownMetrics, CooldownStatus, FailoverChain, LogThrottle, QuotaMeter,
    QuotaUsage,
};

/// Failure domain guarding the whole full-market chain.
pub const MARKET_SNAPSHOT_DOMAIN: &str = "market_snapshot";
/// Failure domain guarding reference data.
pub const BASE_INFO_DOMAIN: &str = "base_info";
/// Failure domain guarding minute-bar history.
pub const MINUTE_BARS_DOMAIN: &str = "minute_bars";
/// Failure domain guarding daily-bar history.
pub const DAILY_BARS_DOMAIN: &str = "daily_bars";
/// Failure domain guarding index levels.
pub const INDICES_DOMAIN: &str = "indices";

const FULL_SNAPSHOT_KEY: &str = "full_market_snapshot";
const INDICES_KEY: &str = "indices";
const BASE_INFO_KEY: &str = "base_info";
const QUOTES_REFRESH_LOCK: &str = "quotes";

/// Process-wide acquisition layer.
pub struct AcquisitionService {
    config: AcquisitionConfig,
    tz: Tz,
    gate: Arc<dyn SessionGate>,
    calendar: TradingSessionWindow,
    chain: FailoverChain,
    cooldowns: Arc<CooldownController>,
    snapshots: SnapshotCache<MarketSnapshot>,
    quotes: SnapshotCache<SnapshotRow>,
    bars: SnapshotCache<Vec<MinuteBar>>,
    daily_bars: SnapshotCache<Vec<DailyBar>>,
    indices: SnapshotCache<Vec<IndexQuote>>,
    base_info: SnapshotCache<BaseInfo>,
    log_throttle: LogThrottle,
}

impl AcquisitionService {
    /// Build the service over explicit providers.
    pub fn new(
        config: AcquisitionConfig,
        providers: Vec<Arc<dyn MarketDataProvider>>,
    ) -> Result<Self, MarketDataError> {
        config.validate()?;
        let tz = config.tz()?;
        let calendar = TradingSessionWindow::from_config(&config)?;
        let gate: Arc<dyn SessionGate> = Arc::new(calendar.clone());
        let cooldowns = Arc::new(CooldownController::new(config.cooldowns.clone()));
        let quota = Arc::new(QuotaMeter::with_log_throttle(tz, config.log_throttle()));
        let chain = FailoverChain::new(providers, &config, cooldowns.clone(), quota);

        info!(
            "Acquisition service ready with {} provider(s), timezone {}",
            chain.providers().len(),
            tz
        );

        Ok(Self {
            tz,
            gate,
            calendar,
            chain,
            cooldowns,
            snapshots: SnapshotCache::new("snapshot"),
            quotes: SnapshotCache::new("quotes"),
            bars: SnapshotCache::new("minute_bars"),
            daily_bars: SnapshotCache::new("daily_bars"),
            indices: SnapshotCache::new("indices"),
            base_info: SnapshotCache::new("base_info"),
            log_throttle: LogThrottle::new(config.log_throttle()),
            config,
        })
    }

    /// Build the service with an [`HttpJsonProvider`] per enabled provider
    /// definition in the configuration.
    pub fn from_config(config: AcquisitionConfig) -> Result<Self, MarketDataError> {
        let providers = config
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                HttpJsonProvider::new(p.clone())
                    .map(|provider| Arc::new(provider) as Arc<dyn MarketDataProvider>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(config, providers)
    }

    /// Replace the trading-session gate.
    pub fn with_session_gate(mut self, gate: Arc<dyn SessionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Whether the market is currently in session.
    pub fn is_trading_session(&self) -> bool {
        self.gate.is_open()
    }

    /// Cooldown state of every failure domain seen so far.
    pub fn channel_health(&self) -> Vec<CooldownMetrics> {
        self.cooldowns.metrics()
    }

    /// Current-minute usage of every metered provider.
    pub fn quota_usage(&self) -> Vec<QuotaUsage> {
        self.chain.quota().usage_all()
    }

    /// Full-market snapshot, enriched with reference data when available.
    pub async fn get_full_market_snapshot(&self) -> DatasetView<MarketSnapshot> {
        let ttl = Duration::from_secs(self.config.cache.snapshot_ttl_secs);
        self.snapshots
            .get_or_refresh(FULL_SNAPSHOT_KEY, ttl, self.gate.as_ref(), || async {
                let (payload, source) = self
                    .fetch_in_domain(MARKET_SNAPSHOT_DOMAIN, DataRequest::FullMarketSnapshot)
                    .await?;
                let mut snapshot = payload.into_snapshot()?;
                if let Some(base) = self.get_base_info().await.payload() {
                    snapshot.enrich_with(base);
                }
                Some((snapshot, source))
            })
            .await
    }

    /// Reference data (names, circulating shares).
    pub async fn get_base_info(&self) -> DatasetView<BaseInfo> {
        let ttl = Duration::from_secs(self.config.cache.base_info_ttl_secs);
        self.base_info
            .get_or_refresh(BASE_INFO_KEY, ttl, self.gate.as_ref(), || async {
                let (payload, source) = self
                    .fetch_in_domain(BASE_INFO_DOMAIN, DataRequest::BaseInfo)
                    .await?;
                payload.into_base_info().map(|info| (info, source))
            })
            .await
    }

    /// Quotes for just `codes`.
    ///
    /// Each code is cached on its own with the short quotes TTL; only
    /// missing or stale codes are fetched, in batches, under one refresh
    /// lock. Codes no quote provider returned fall back to the full-market
    /// snapshot cache.
    pub async fn get_quotes(&self, codes: &[InstrumentCode]) -> DatasetView<MarketSnapshot> {
        let wanted: Vec<InstrumentCode> = codes
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if wanted.is_empty() {
            return DatasetView::empty();
        }

        let ttl = Duration::from_secs(self.config.cache.quotes_ttl_secs);
        if self.stale_quote_codes(&wanted, ttl).is_empty() {
            return self.assemble_quotes(&wanted, ttl);
        }

        if !self.gate.is_open() {
            debug!("Session closed, serving cached quotes for {} code(s)", wanted.len());
            return self.assemble_quotes(&wanted, ttl);
        }

        {
            let _guard = self.quotes.lock_key(QUOTES_REFRESH_LOCK).await;
            let stale = self.stale_quote_codes(&wanted, ttl);
            for batch in stale.chunks(self.config.quote_batch_size) {
                let request = DataRequest::Quotes {
                    codes: batch.to_vec(),
                };
                let outcome = self.chain.fetch(&request).await;
                match outcome.payload {
                    Some((DataPayload::Snapshot(snapshot), source)) => {
                        for (code, row) in snapshot.rows {
                            self.quotes.insert(code.as_str(), row, source.clone());
                        }
                    }
                    _ => {
                        if self.log_throttle.should_log("quotes:exhausted") {
                            info!(
                                "No quotes for a batch of {} code(s): {}",
                                batch.len(),
                                outcome.diagnostics.summary()
                            );
                        }
                    }
                }
            }
        }

        self.assemble_quotes(&wanted, ttl)
    }

    /// Minute bars for one instrument and day.
    ///
    /// Bars fetched after that day's session close are complete and never
    /// refetched. A prior day cached before its close is refetched on the
    /// next call; the current day at most every `minute_bars_refresh_secs`.
    /// All of it sits behind the minute-bar failure domain and none of it
    /// is session gated.
    pub async fn get_minute_bars(
        &self,
        code: InstrumentCode,
        date: NaiveDate,
    ) -> DatasetView<Vec<MinuteBar>> {
        let today = self.today();
        if date > today {
            return DatasetView::empty();
        }

        let key = format!("{}:{}", code, date.format("%Y-%m-%d"));
        let refresh = Duration::from_secs(self.config.cache.minute_bars_refresh_secs);
        let ttl = self.history_ttl(self.bars.peek(&key), date, today, refresh);

        self.bars
            .get_or_refresh(&key, ttl, &AlwaysOpen, || async {
                let (payload, source) = self
                    .fetch_in_domain(MINUTE_BARS_DOMAIN, DataRequest::MinuteBars { code, date })
                    .await?;
                payload.into_bars().map(|bars| (bars, source))
            })
            .await
    }

    /// The most recent `days` daily bars for one instrument, oldest first.
    ///
    /// Cached per trading day: once fetched after today's close the set is
    /// final until tomorrow. Before that it is refreshed at most every
    /// `daily_bars_refresh_secs`.
    pub async fn get_daily_bars(&self, code: InstrumentCode, days: u32) -> DatasetView<Vec<DailyBar>> {
        let days = days.max(1);
        let today = self.today();
        let key = format!("{}:{}:{}", code, days, today.format("%Y-%m-%d"));
        let refresh = Duration::from_secs(self.config.cache.daily_bars_refresh_secs);
        let ttl = self.history_ttl(self.daily_bars.peek(&key), today, today, refresh);

        self.daily_bars
            .get_or_refresh(&key, ttl, &AlwaysOpen, || async {
                let (payload, source) = self
                    .fetch_in_domain(DAILY_BARS_DOMAIN, DataRequest::DailyBars { code, days })
                    .await?;
                payload.into_daily_bars().map(|bars| (bars, source))
            })
            .await
    }

    /// Levels of the major market indices.
    ///
    /// Shares the quotes TTL and the trading-session gate: outside the
    /// session the last levels are served without network work.
    pub async fn get_indices(&self) -> DatasetView<Vec<IndexQuote>> {
        let ttl = Duration::from_secs(self.config.cache.quotes_ttl_secs);
        self.indices
            .get_or_refresh(INDICES_KEY, ttl, self.gate.as_ref(), || async {
                let (payload, source) = self
                    .fetch_in_domain(INDICES_DOMAIN, DataRequest::Indices)
                    .await?;
                payload.into_indices().map(|indices| (indices, source))
            })
            .await
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// TTL for history covering `date`.
    fn history_ttl<T>(
        &self,
        cached: Option<CachedDataset<T>>,
        date: NaiveDate,
        today: NaiveDate,
        refresh: Duration,
    ) -> Duration {
        match cached {
            Some(entry) if self.calendar.is_settled(date, entry.fetched_at) => Duration::MAX,
            Some(_) if date < today => Duration::ZERO,
            _ => refresh,
        }
    }

    /// Run the chain behind a dataset-wide failure domain.
    ///
    /// While the domain cools the chain is not run at all. Exhaustion with
    /// at least one counted provider failure extends the domain's cooldown.
    async fn fetch_in_domain(
        &self,
        domain: &str,
        request: DataRequest,
    ) -> Option<(DataPayload, ProviderId)> {
        if let CooldownStatus::Cooling { remaining } = self.cooldowns.check(domain) {
            if self.log_throttle.should_log(&format!("dataset:{}", domain)) {
                info!(
                    "'{}' cooling for another {:?}, serving cached data",
                    domain, remaining
                );
            }
            return None;
        }

        let outcome = self.chain.fetch(&request).await;
        if outcome.payload.is_some() {
            self.cooldowns.record_success(domain);
            return outcome.payload;
        }

        if outcome.diagnostics.worst_failure().is_some() {
            let record = self.cooldowns.record_failure(domain, FailureClass::Soft);
            if record.should_log {
                warn!(
                    "All providers failed for '{}' ({}); pausing for {:?}",
                    domain,
                    outcome.diagnostics.summary(),
                    record.cooldown
                );
            }
        } else if self.log_throttle.should_log(&format!("unavailable:{}", domain)) {
            info!(
                "No provider available for '{}': {}",
                domain,
                outcome.diagnostics.summary()
            );
        }
        None
    }

    fn stale_quote_codes(&self, wanted: &[InstrumentCode], ttl: Duration) -> Vec<InstrumentCode> {
        wanted
            .iter()
            .filter(|code| {
                self.quotes
                    .peek(code.as_str())
                    .map_or(true, |entry| !entry.is_fresh(ttl))
            })
            .copied()
            .collect()
    }

    /// Build a quotes view from the per-code cache, falling back to the
    /// full-market snapshot for codes never quoted.
    fn assemble_quotes(&self, wanted: &[InstrumentCode], ttl: Duration) -> DatasetView<MarketSnapshot> {
        let market = self.snapshots.peek(FULL_SNAPSHOT_KEY);
        let mut rows = Vec::with_capacity(wanted.len());
        let mut sources = BTreeSet::new();
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut all_fresh = true;

        for code in wanted {
            let hit = self
                .quotes
                .peek(code.as_str())
                .map(|entry| {
                    let fresh = entry.is_fresh(ttl);
                    (entry.payload.as_ref().clone(), entry.fetched_at, entry.source, fresh)
                })
                .or_else(|| {
                    market.as_ref().and_then(|m| {
                        m.payload
                            .get(code)
                            .map(|row| (row.clone(), m.fetched_at, m.source.clone(), m.is_fresh(ttl)))
                    })
                });

            match hit {
                Some((row, fetched_at, source, fresh)) => {
                    rows.push(row);
                    sources.insert(source);
                    oldest = Some(oldest.map_or(fetched_at, |o| o.min(fetched_at)));
                    all_fresh &= fresh;
                }
                None => all_fresh = false,
            }
        }

        let Some(fetched_at) = oldest else {
            return DatasetView::empty();
        };

        let mut snapshot = MarketSnapshot::from_rows(rows);
        if let Some(base) = self.base_info.peek(BASE_INFO_KEY) {
            snapshot.enrich_with(&base.payload);
        }

        let source: ProviderId = if sources.len() == 1 {
            sources.into_iter().next().unwrap_or(Cow::Borrowed("cache"))
        } else {
            Cow::Borrowed("mixed")
        };

        let entry = CachedDataset {
            key: format!(
                "quotes:{}",
                wanted.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
            ),
            payload: Arc::new(snapshot),
            fetched_at,
            source,
        };

        if all_fresh {
            DatasetView::fresh(entry)
        } else {
            DatasetView::stale(entry)
        }
    }
}

//! Failover chain over the configured providers.
//!
//! For a given request the chain walks providers in priority order and,
//! for each one:
//! 1. Skips it if it cannot serve the dataset
//! 2. Skips it while its failure domain is cooling down
//! 3. Reserves quota if the provider is metered, skipping it when spent
//! 4. Waits for its throttle channel and performs the call
//! 5. Validates the payload
//! 6. Records success or a classified failure against the domain
//!
//! The first success ends the run. The chain never returns an error;
//! exhaustion is an outcome with no payload.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::{
    CooldownController, CooldownStatus, FetchDiagnostics, LogThrottle, QuotaMeter, RequestThrottle,
    SkipReason, SnapshotValidator,
};
use crate::config::AcquisitionConfig;
use crate::models::{DataPayload, DataRequest, ProviderId};
use crate::provider::MarketDataProvider;

/// Result of one failover run.
#[derive(Debug)]
pub struct ChainOutcome {
    /// The payload and the provider that served it.
    pub payload: Option<(DataPayload, ProviderId)>,
    pub diagnostics: FetchDiagnostics,
}

impl ChainOutcome {
    pub fn is_success(&self) -> bool {
        self.payload.is_some()
    }
}

/// Ordered providers plus the shared pacing and health state.
pub struct FailoverChain {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    throttle: RequestThrottle,
    quota: Arc<QuotaMeter>,
    cooldowns: Arc<CooldownController>,
    validator: SnapshotValidator,
    channel_intervals: HashMap<String, Duration>,
    minute_ceilings: HashMap<String, u32>,
    log_throttle: LogThrottle,
}

impl FailoverChain {
    /// Create a chain over `providers`.
    ///
    /// Providers are ordered by priority (lower first); ties keep the
    /// given order. Configured channel intervals and minute ceilings take
    /// precedence over what providers declare.
    pub fn new(
        mut providers: Vec<Arc<dyn MarketDataProvider>>,
        config: &AcquisitionConfig,
        cooldowns: Arc<CooldownController>,
        quota: Arc<QuotaMeter>,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());

        let mut channel_intervals = HashMap::new();
        let mut minute_ceilings = HashMap::new();
        for provider in &providers {
            let declared = provider.rate_limit();
            let channel = provider.channel().to_string();
            let interval = config
                .channel_interval(&channel)
                .unwrap_or(declared.min_interval);
            // Providers sharing a channel are paced by the strictest one.
            let entry = channel_intervals.entry(channel).or_insert(interval);
            *entry = (*entry).max(interval);

            let ceiling = config
                .minute_ceiling(provider.id())
                .or(declared.minute_ceiling.map(|c| c.max(1)));
            if let Some(ceiling) = ceiling {
                minute_ceilings.insert(provider.id().to_string(), ceiling);
            }
        }

        debug!(
            "Failover chain: {} providers in order [{}]",
            providers.len(),
            providers.iter().map(|p| p.id()).collect::<Vec<_>>().join(", ")
        );

        Self {
            providers,
            throttle: RequestThrottle::new(),
            quota,
            cooldowns,
            validator: SnapshotValidator::new(),
            channel_intervals,
            minute_ceilings,
            log_throttle: LogThrottle::new(config.log_throttle()),
        }
    }

    /// Providers in the order they are tried.
    pub fn providers(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    pub fn cooldowns(&self) -> &Arc<CooldownController> {
        &self.cooldowns
    }

    pub fn quota(&self) -> &Arc<QuotaMeter> {
        &self.quota
    }

    fn min_interval(&self, channel: &str) -> Duration {
        self.channel_intervals
            .get(channel)
            .copied()
            .unwrap_or_else(|| Duration::from_millis(200))
    }

    /// Try providers in order until one returns a valid payload.
    pub async fn fetch(&self, request: &DataRequest) -> ChainOutcome {
        let kind = request.kind();
        let mut diagnostics = FetchDiagnostics::new();

        for provider in &self.providers {
            let provider_id: ProviderId = Cow::Owned(provider.id().to_string());

            if !provider.capabilities().supports(kind) {
                diagnostics.skipped(provider_id, SkipReason::NotSupported);
                continue;
            }

            let domain = provider.cooldown_domain();
            if let CooldownStatus::Cooling { remaining } = self.cooldowns.check(&domain) {
                if self.log_throttle.should_log(&format!("cooling:{}", domain)) {
                    info!(
                        "Skipping '{}' for {}: domain '{}' cooling for another {:?}",
                        provider_id, kind, domain, remaining
                    );
                } else {
                    debug!("Skipping '{}' for {}: domain '{}' cooling", provider_id, kind, domain);
                }
                diagnostics.skipped(provider_id, SkipReason::CoolingDown { remaining });
                continue;
            }

            if let Some(ceiling) = self.minute_ceilings.get(&*provider_id) {
                if !self.quota.reserve(&provider_id, *ceiling, request.cost()) {
                    diagnostics.skipped(
                        provider_id,
                        SkipReason::QuotaExhausted { ceiling: *ceiling },
                    );
                    continue;
                }
            }

            let channel = provider.channel();
            let interval = self.min_interval(&channel);
            let result = self
                .throttle
                .run(&channel, interval, provider.fetch(request))
                .await
                .and_then(|payload| self.validator.validate(&provider_id, payload));

            match result {
                Ok(payload) => {
                    self.cooldowns.record_success(&domain);
                    debug!(
                        "Fetched {} ({} rows) from '{}'",
                        kind,
                        payload.len(),
                        provider_id
                    );
                    diagnostics.served(provider_id.clone());
                    return ChainOutcome {
                        payload: Some((payload, provider_id)),
                        diagnostics,
                    };
                }
                Err(e) if !e.counts_as_failure() => {
                    debug!("Provider '{}' passed on {}: {}", provider_id, kind, e);
                    diagnostics.failed(provider_id, e.to_string(), None);
                }
                Err(e) => {
                    let class = e.failure_class();
                    let record = self.cooldowns.record_failure(&domain, class);
                    if record.should_log {
                        warn!(
                            "Provider '{}' failed on {} ({} failure, streak {}): {}; cooling '{}' for {:?}",
                            provider_id, kind, class, record.streak, e, domain, record.cooldown
                        );
                    } else {
                        debug!("Provider '{}' failed on {}: {}", provider_id, kind, e);
                    }
                    diagnostics.failed(provider_id, e.to_string(), Some(class));
                }
            }
        }

        debug!("Failover exhausted for {}: {}", kind, diagnostics.summary());
        ChainOutcome {
            payload: None,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CooldownSettings, CooldownWindow};
    use crate::errors::MarketDataError;
    use crate::models::{ChannelName, DatasetKind, DomainName, InstrumentCode, MarketSnapshot, SnapshotRow};
    use crate::provider::{ProviderCapabilities, RateLimit};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail(fn(&str) -> MarketDataError),
    }

    struct MockProvider {
        id: &'static str,
        priority: u8,
        domain: Option<&'static str>,
        ceiling: Option<u32>,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(id: &'static str, priority: u8, behavior: Behavior) -> Self {
            Self {
                id,
                priority,
                domain: None,
                ceiling: None,
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn channel(&self) -> ChannelName {
            Cow::Owned(self.id.to_ascii_lowercase())
        }

        fn cooldown_domain(&self) -> DomainName {
            Cow::Owned(self.domain.unwrap_or(self.id).to_ascii_lowercase())
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::new([DatasetKind::FullMarketSnapshot])
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                min_interval: Duration::from_millis(1),
                minute_ceiling: self.ceiling,
            }
        }

        async fn fetch(&self, _request: &DataRequest) -> Result<DataPayload, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(DataPayload::Snapshot(MarketSnapshot::from_rows(vec![
                    SnapshotRow {
                        code: InstrumentCode::parse("600519").unwrap(),
                        name: self.id.to_string(),
                        price: dec!(10.5),
                        prev_close: dec!(10),
                        open: None,
                        high: None,
                        low: None,
                        volume: dec!(100),
                        turnover_rate: None,
                        float_market_value: None,
                    },
                ]))),
                Behavior::Fail(make) => Err(make(self.id)),
            }
        }
    }

    fn timeout(provider: &str) -> MarketDataError {
        MarketDataError::Timeout {
            provider: provider.to_string(),
        }
    }

    fn empty(provider: &str) -> MarketDataError {
        MarketDataError::EmptyResponse {
            provider: provider.to_string(),
        }
    }

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            channel_intervals_ms: BTreeMap::new(),
            minute_ceilings: BTreeMap::new(),
            cooldowns: CooldownSettings {
                default: CooldownWindow {
                    base_secs: 60,
                    max_secs: 600,
                },
                domains: BTreeMap::new(),
                ratchet_base_on_recovery: true,
            },
            ..AcquisitionConfig::default()
        }
    }

    fn chain(providers: Vec<Arc<dyn MarketDataProvider>>) -> FailoverChain {
        let config = config();
        FailoverChain::new(
            providers,
            &config,
            Arc::new(CooldownController::new(config.cooldowns.clone())),
            Arc::new(QuotaMeter::new(chrono_tz::Asia::Shanghai)),
        )
    }

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let a = Arc::new(MockProvider::new("A", 1, Behavior::Succeed));
        let b = Arc::new(MockProvider::new("B", 2, Behavior::Succeed));
        let chain = chain(vec![b.clone(), a.clone()]);

        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        let (_, source) = outcome.payload.unwrap();
        assert_eq!(source, "A");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_moves_on_and_cools_domain() {
        let a = Arc::new(MockProvider::new("A", 1, Behavior::Fail(timeout)));
        let b = Arc::new(MockProvider::new("B", 2, Behavior::Succeed));
        let chain = chain(vec![a.clone(), b.clone()]);

        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        assert_eq!(outcome.payload.unwrap().1, "B");
        assert!(chain.cooldowns().check("a").is_cooling());
        assert!(!chain.cooldowns().check("b").is_cooling());
        let metrics = chain.cooldowns().metrics();
        let cooled = metrics.iter().find(|m| m.domain == "a").unwrap();
        assert_eq!(cooled.fail_streak, 1);
        assert!(cooled.remaining.is_some());
        assert_eq!(outcome.diagnostics.worst_failure(), Some(crate::errors::FailureClass::Hard));

        // A is cooling: second run goes straight to B.
        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        assert!(outcome.is_success());
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_shared_domain_skips_sibling() {
        let mut a = MockProvider::new("EM_PUSH", 1, Behavior::Fail(empty));
        a.domain = Some("eastmoney");
        let mut b = MockProvider::new("EM_WEB", 2, Behavior::Succeed);
        b.domain = Some("eastmoney");
        let (a, b) = (Arc::new(a), Arc::new(b));
        let c = Arc::new(MockProvider::new("SINA", 3, Behavior::Succeed));
        let chain = chain(vec![a.clone(), b.clone(), c.clone()]);

        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        assert_eq!(outcome.payload.unwrap().1, "SINA");
        assert_eq!(b.calls(), 0);
        assert_eq!(outcome.diagnostics.skip_reasons().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_skips_without_cooling() {
        let mut a = MockProvider::new("BIYING", 1, Behavior::Succeed);
        a.ceiling = Some(1);
        let a = Arc::new(a);
        let b = Arc::new(MockProvider::new("SINA", 2, Behavior::Succeed));
        let chain = chain(vec![a.clone(), b.clone()]);

        assert_eq!(chain.fetch(&DataRequest::FullMarketSnapshot).await.payload.unwrap().1, "BIYING");
        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        // The minute may roll over between the two calls; either way no cooldown.
        assert!(outcome.is_success());
        assert!(!chain.cooldowns().check("biying").is_cooling());
        assert!(chain
            .cooldowns()
            .metrics()
            .iter()
            .filter(|m| m.domain == "biying")
            .all(|m| m.fail_streak == 0 && m.remaining.is_none()));
        assert_eq!(a.calls() + b.calls(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_dataset_is_skipped() {
        let a = Arc::new(MockProvider::new("A", 1, Behavior::Succeed));
        let chain = chain(vec![a.clone()]);
        let outcome = chain.fetch(&DataRequest::BaseInfo).await;
        assert!(!outcome.is_success());
        assert_eq!(a.calls(), 0);
        assert_eq!(
            outcome.diagnostics.skip_reasons()[0].1,
            &SkipReason::NotSupported
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_no_payload() {
        let a = Arc::new(MockProvider::new("A", 1, Behavior::Fail(empty)));
        let b = Arc::new(MockProvider::new("B", 2, Behavior::Fail(timeout)));
        let chain = chain(vec![a, b]);
        let outcome = chain.fetch(&DataRequest::FullMarketSnapshot).await;
        assert!(outcome.payload.is_none());
        assert_eq!(outcome.diagnostics.errors().len(), 2);
        assert!(!outcome.diagnostics.has_success());
    }
}

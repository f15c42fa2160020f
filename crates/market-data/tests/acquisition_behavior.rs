//! End-to-end behaviour of the acquisition layer through its public API.
//!
//! Providers are scripted in-process; no network is involved.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Asia::Shanghai;
use rust_decimal_macros::dec;

use limitup_market_data::config::{CooldownSettings, CooldownWindow};
use limitup_market_data::{
    AcquisitionConfig, AcquisitionService, AlwaysOpen, ChannelName, CooldownController,
    DataPayload, DataRequest, DatasetKind, FailoverChain, FailureClass, Freshness,
    InstrumentCode, MarketDataError, MarketDataProvider, MarketSnapshot, ProviderCapabilities,
    QuotaMeter, RateLimit, RequestThrottle, SessionGate, SkipReason, SnapshotRow,
};

// =============================================================================
// Fixtures
// =============================================================================

struct ScriptedProvider {
    id: &'static str,
    priority: u8,
    fail: AtomicBool,
    /// Quote every row with a zero price, as before the first trade.
    untraded: AtomicBool,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(id: &'static str, priority: u8) -> Arc<Self> {
        Arc::new(Self {
            id,
            priority,
            fail: AtomicBool::new(false),
            untraded: AtomicBool::new(false),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            priority: 10,
            fail: AtomicBool::new(false),
            untraded: AtomicBool::new(false),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(id: &'static str, priority: u8) -> Arc<Self> {
        let provider = Self::new(id, priority);
        provider.fail.store(true, Ordering::SeqCst);
        provider
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new([DatasetKind::FullMarketSnapshot, DatasetKind::Quotes])
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            min_interval: Duration::from_millis(1),
            minute_ceiling: None,
        }
    }

    async fn fetch(&self, request: &DataRequest) -> Result<DataPayload, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketDataError::Transient {
                provider: self.id.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let codes = match request {
            DataRequest::Quotes { codes } => codes.clone(),
            _ => vec![code("600519"), code("000001")],
        };
        let untraded = self.untraded.load(Ordering::SeqCst);
        Ok(DataPayload::Snapshot(MarketSnapshot::from_rows(
            codes.into_iter().map(row).map(|mut r| {
                if untraded {
                    r.price = dec!(0);
                }
                r
            }),
        )))
    }
}

/// Gate that tests can open and close.
struct ToggleGate(AtomicBool);

impl SessionGate for ToggleGate {
    fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn code(raw: &str) -> InstrumentCode {
    InstrumentCode::parse(raw).unwrap()
}

fn row(code: InstrumentCode) -> SnapshotRow {
    SnapshotRow {
        code,
        name: String::new(),
        price: dec!(11),
        prev_close: dec!(10),
        open: None,
        high: None,
        low: None,
        volume: dec!(5000),
        turnover_rate: None,
        float_market_value: None,
    }
}

fn config() -> AcquisitionConfig {
    AcquisitionConfig {
        cooldowns: CooldownSettings {
            default: CooldownWindow {
                base_secs: 60,
                max_secs: 3600,
            },
            domains: BTreeMap::new(),
            ratchet_base_on_recovery: true,
        },
        ..AcquisitionConfig::default()
    }
}

fn chain(providers: Vec<Arc<dyn MarketDataProvider>>, config: &AcquisitionConfig) -> FailoverChain {
    FailoverChain::new(
        providers,
        config,
        Arc::new(CooldownController::new(config.cooldowns.clone())),
        Arc::new(QuotaMeter::with_log_throttle(Shanghai, config.log_throttle())),
    )
}

fn quotes_request() -> DataRequest {
    DataRequest::Quotes {
        codes: vec![code("600519")],
    }
}

// =============================================================================
// Failover
// =============================================================================

#[tokio::test]
async fn cooling_provider_is_skipped_and_next_success_stops_the_chain() {
    let a = ScriptedProvider::new("A", 1);
    let b = ScriptedProvider::new("B", 2);
    let c = ScriptedProvider::new("C", 3);
    let chain = chain(vec![c.clone(), a.clone(), b.clone()], &config());

    chain.cooldowns().record_failure("a", FailureClass::Hard);

    let outcome = chain.fetch(&quotes_request()).await;

    let (_, source) = outcome.payload.expect("B should serve the request");
    assert_eq!(source, "B");
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);

    let first = &outcome.diagnostics.attempts[0];
    assert_eq!(first.provider_id, "A");
    assert!(matches!(first.skip_reason(), Some(SkipReason::CoolingDown { .. })));
}

#[tokio::test]
async fn failed_provider_cools_its_domain_for_later_calls() {
    let a = ScriptedProvider::failing("A", 1);
    let b = ScriptedProvider::new("B", 2);
    let chain = chain(vec![a.clone(), b.clone()], &config());

    assert!(chain.fetch(&quotes_request()).await.is_success());
    assert!(chain.fetch(&quotes_request()).await.is_success());

    // The second run never reaches A.
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 2);
    assert!(chain.cooldowns().check("a").is_cooling());
}

#[tokio::test]
async fn quota_exhaustion_skips_without_cooling() {
    let mut cfg = config();
    cfg.minute_ceilings.insert("a".to_string(), 1);
    let a = ScriptedProvider::new("A", 1);
    let b = ScriptedProvider::new("B", 2);
    let chain = chain(vec![a.clone(), b.clone()], &cfg);

    let minute = chain.quota().current_minute_key();
    chain.fetch(&quotes_request()).await;
    let outcome = chain.fetch(&quotes_request()).await;
    if chain.quota().current_minute_key() != minute {
        // Crossed a minute boundary mid-test; the budget legitimately reset.
        return;
    }

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert!(outcome.diagnostics.attempts.iter().any(|attempt| matches!(
        attempt.skip_reason(),
        Some(SkipReason::QuotaExhausted { ceiling: 1 })
    )));
    assert!(!chain.cooldowns().check("a").is_cooling());
}

#[test]
fn quota_resets_when_the_minute_rolls_over() {
    let meter = QuotaMeter::new(Shanghai);
    for _ in 0..3000 {
        assert!(meter.reserve_in_minute("BIYING", 3000, 1, "202401011205"));
    }
    assert!(!meter.reserve_in_minute("BIYING", 3000, 1, "202401011205"));
    assert!(meter.reserve_in_minute("BIYING", 3000, 1, "202401011206"));

    let usage = meter.usage("BIYING").unwrap();
    assert_eq!(usage.minute_key, "202401011206");
    assert_eq!(usage.count, 1);
}

// =============================================================================
// Throttle
// =============================================================================

#[tokio::test]
async fn channel_calls_are_spaced_across_callers() {
    let throttle = Arc::new(RequestThrottle::new());
    let interval = Duration::from_millis(60);
    let channel: ChannelName = Cow::Borrowed("sina");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let throttle = throttle.clone();
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            throttle
                .run(&channel, interval, async { tokio::time::Instant::now() })
                .await
        }));
    }

    let mut starts = Vec::new();
    for handle in handles {
        starts.push(handle.await.unwrap());
    }
    starts.sort();

    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= interval);
    }
}

// =============================================================================
// Service
// =============================================================================

#[tokio::test]
async fn closed_session_serves_cache_without_calling_providers() {
    let p = ScriptedProvider::new("P", 1);
    let gate = Arc::new(ToggleGate(AtomicBool::new(true)));
    let mut cfg = config();
    cfg.cache.snapshot_ttl_secs = 0;
    let service = AcquisitionService::new(cfg, vec![p.clone() as Arc<dyn MarketDataProvider>])
        .unwrap()
        .with_session_gate(gate.clone());

    let open_view = service.get_full_market_snapshot().await;
    assert_eq!(open_view.freshness(), Freshness::Fresh);
    assert_eq!(p.calls(), 1);

    gate.0.store(false, Ordering::SeqCst);
    assert!(!service.is_trading_session());

    for _ in 0..3 {
        let closed_view = service.get_full_market_snapshot().await;
        assert_eq!(closed_view.freshness(), Freshness::Stale);
        assert!(Arc::ptr_eq(
            &closed_view.shared().unwrap(),
            &open_view.shared().unwrap()
        ));
        assert_eq!(closed_view.fetched_at(), open_view.fetched_at());
    }
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let p = ScriptedProvider::slow("P", Duration::from_millis(50));
    let service = Arc::new(
        AcquisitionService::new(config(), vec![p.clone() as Arc<dyn MarketDataProvider>])
            .unwrap()
            .with_session_gate(Arc::new(AlwaysOpen)),
    );

    let mut handles = Vec::new();
    for _ in 0..12 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.get_full_market_snapshot().await.shared().unwrap()
        }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap());
    }

    assert_eq!(p.calls(), 1);
    assert!(payloads.iter().all(|p| Arc::ptr_eq(p, &payloads[0])));
}

#[tokio::test]
async fn total_failure_without_cache_is_empty() {
    let a = ScriptedProvider::failing("A", 1);
    let b = ScriptedProvider::failing("B", 2);
    let service = AcquisitionService::new(
        config(),
        vec![
            a.clone() as Arc<dyn MarketDataProvider>,
            b.clone() as Arc<dyn MarketDataProvider>,
        ],
    )
    .unwrap()
    .with_session_gate(Arc::new(AlwaysOpen));

    let snapshot = service.get_full_market_snapshot().await;
    assert_eq!(snapshot.freshness(), Freshness::Empty);
    assert!(snapshot.payload().is_none());

    let quotes = service.get_quotes(&[code("600519")]).await;
    assert!(quotes.is_empty());

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    let health = service.channel_health();
    assert!(health.iter().any(|m| m.domain == "a" && m.remaining.is_some()));
    assert!(health.iter().any(|m| m.domain == "b" && m.remaining.is_some()));
}

#[tokio::test]
async fn failed_refresh_keeps_last_good_snapshot() {
    let p = ScriptedProvider::new("P", 1);
    let mut cfg = config();
    cfg.cache.snapshot_ttl_secs = 0;
    let service = AcquisitionService::new(cfg, vec![p.clone() as Arc<dyn MarketDataProvider>])
        .unwrap()
        .with_session_gate(Arc::new(AlwaysOpen));

    let good = service.get_full_market_snapshot().await;
    p.fail.store(true, Ordering::SeqCst);

    let view = service.get_full_market_snapshot().await;
    assert_eq!(view.freshness(), Freshness::Stale);
    assert_eq!(view.source(), Some("P"));
    assert!(Arc::ptr_eq(&view.shared().unwrap(), &good.shared().unwrap()));
}

#[tokio::test]
async fn quotes_before_the_first_trade_use_previous_close() {
    let p = ScriptedProvider::new("P", 1);
    p.untraded.store(true, Ordering::SeqCst);
    let service = AcquisitionService::new(config(), vec![p.clone() as Arc<dyn MarketDataProvider>])
        .unwrap()
        .with_session_gate(Arc::new(AlwaysOpen));

    let view = service.get_quotes(&[code("600519"), code("000001")]).await;
    assert_eq!(view.freshness(), Freshness::Fresh);
    let quotes = view.payload().unwrap();
    assert_eq!(quotes.len(), 2);
    for row in quotes.rows.values() {
        assert_eq!(row.price, dec!(10));
        assert_eq!(row.change_percent(), dec!(0));
    }
    assert!(service.channel_health().iter().all(|m| m.remaining.is_none()));

    let snapshot = service.get_full_market_snapshot().await;
    assert_eq!(snapshot.payload().unwrap().len(), 2);
    assert_eq!(p.calls(), 2);
}

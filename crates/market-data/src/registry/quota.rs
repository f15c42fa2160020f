//! Per-minute call budget for metered providers.
//!
//! Buckets are keyed by provider and by the wall-clock minute in the
//! exchange timezone (`YYYYMMDDHHMM`). Reservations never block: when the
//! budget is spent the caller skips the provider for this cycle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use log::{info, warn};

use super::LogThrottle;

/// State of one provider's current minute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaUsage {
    pub provider: String,
    pub minute_key: String,
    pub count: u32,
    pub ceiling: u32,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.count)
    }
}

#[derive(Debug)]
struct QuotaBucket {
    minute_key: String,
    count: u32,
    ceiling: u32,
}

/// Thread-safe per-minute quota meter.
pub struct QuotaMeter {
    tz: Tz,
    buckets: Mutex<HashMap<String, QuotaBucket>>,
    log_throttle: LogThrottle,
}

impl QuotaMeter {
    pub fn new(tz: Tz) -> Self {
        Self::with_log_throttle(tz, LogThrottle::default().window())
    }

    /// Meter whose "quota exhausted" line repeats at most once per `window`
    /// for each provider.
    pub fn with_log_throttle(tz: Tz, window: Duration) -> Self {
        Self {
            tz,
            buckets: Mutex::new(HashMap::new()),
            log_throttle: LogThrottle::new(window),
        }
    }

    pub fn log_window(&self) -> Duration {
        self.log_throttle.window()
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, QuotaBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Quota meter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Current minute key in the exchange timezone.
    pub fn current_minute_key(&self) -> String {
        Utc::now().with_timezone(&self.tz).format("%Y%m%d%H%M").to_string()
    }

    /// Reserve `cost` calls against `limit` for the current minute.
    pub fn reserve(&self, provider: &str, limit: u32, cost: u32) -> bool {
        let minute_key = self.current_minute_key();
        self.reserve_in_minute(provider, limit, cost, &minute_key)
    }

    /// Reserve against an explicit minute key.
    ///
    /// A key different from the bucket's stored one starts a new minute
    /// with a zero count before the reservation is evaluated.
    pub fn reserve_in_minute(&self, provider: &str, limit: u32, cost: u32, minute_key: &str) -> bool {
        let mut buckets = self.lock_buckets();
        let bucket = buckets
            .entry(provider.to_string())
            .or_insert_with(|| QuotaBucket {
                minute_key: minute_key.to_string(),
                count: 0,
                ceiling: limit,
            });

        if bucket.minute_key != minute_key {
            bucket.minute_key = minute_key.to_string();
            bucket.count = 0;
        }
        bucket.ceiling = limit;

        if bucket.count.saturating_add(cost) > limit {
            if self.log_throttle.should_log(provider) {
                info!(
                    "Quota exhausted for '{}' in minute {} ({}/{} used, {} remaining)",
                    provider,
                    minute_key,
                    bucket.count,
                    limit,
                    limit.saturating_sub(bucket.count)
                );
            }
            return false;
        }

        bucket.count += cost;
        true
    }

    /// Usage of one provider's current bucket, if it has been used.
    pub fn usage(&self, provider: &str) -> Option<QuotaUsage> {
        self.lock_buckets().get(provider).map(|b| QuotaUsage {
            provider: provider.to_string(),
            minute_key: b.minute_key.clone(),
            count: b.count,
            ceiling: b.ceiling,
        })
    }

    /// Usage of every metered provider seen so far.
    pub fn usage_all(&self) -> Vec<QuotaUsage> {
        let mut all: Vec<_> = self
            .lock_buckets()
            .iter()
            .map(|(provider, b)| QuotaUsage {
                provider: provider.clone(),
                minute_key: b.minute_key.clone(),
                count: b.count,
                ceiling: b.ceiling,
            })
            .collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_then_rollover() {
        let meter = QuotaMeter::new(chrono_tz::Asia::Shanghai);

        for _ in 0..3000 {
            assert!(meter.reserve_in_minute("BIYING", 3000, 1, "202401011205"));
        }
        assert!(!meter.reserve_in_minute("BIYING", 3000, 1, "202401011205"));
        assert!(!meter.reserve_in_minute("BIYING", 3000, 1, "202401011205"));

        assert!(meter.reserve_in_minute("BIYING", 3000, 1, "202401011206"));
        let usage = meter.usage("BIYING").unwrap();
        assert_eq!(usage.minute_key, "202401011206");
        assert_eq!(usage.count, 1);
        assert_eq!(usage.remaining(), 2999);
    }

    #[test]
    fn test_rejected_reservation_does_not_consume() {
        let meter = QuotaMeter::new(chrono_tz::Asia::Shanghai);
        assert!(meter.reserve_in_minute("P", 5, 4, "202401011205"));
        assert!(!meter.reserve_in_minute("P", 5, 2, "202401011205"));
        assert!(meter.reserve_in_minute("P", 5, 1, "202401011205"));
        assert_eq!(meter.usage("P").unwrap().count, 5);
    }

    #[test]
    fn test_providers_are_isolated() {
        let meter = QuotaMeter::new(chrono_tz::Asia::Shanghai);
        assert!(meter.reserve_in_minute("A", 1, 1, "202401011205"));
        assert!(!meter.reserve_in_minute("A", 1, 1, "202401011205"));
        assert!(meter.reserve_in_minute("B", 1, 1, "202401011205"));
        assert_eq!(meter.usage_all().len(), 2);
        assert!(meter.usage("C").is_none());
    }

    #[test]
    fn test_log_window_is_configurable() {
        assert_eq!(
            QuotaMeter::new(chrono_tz::Asia::Shanghai).log_window(),
            Duration::from_secs(60)
        );
        let meter = QuotaMeter::with_log_throttle(chrono_tz::Asia::Shanghai, Duration::from_secs(5));
        assert_eq!(meter.log_window(), Duration::from_secs(5));
        assert!(meter.reserve_in_minute("P", 1, 1, "202401011205"));
        assert!(!meter.reserve_in_minute("P", 1, 1, "202401011205"));
    }

    #[test]
    fn test_current_minute_key_shape() {
        let meter = QuotaMeter::new(chrono_tz::Asia::Shanghai);
        let key = meter.current_minute_key();
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_digit()));
        assert!(meter.reserve("LIVE", 10, 1));
    }
}

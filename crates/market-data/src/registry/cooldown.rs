//! Failure cooldown controller.
//!
//! Tracks one state machine per failure domain (a provider, a group of
//! providers sharing an upstream, or a whole dataset):
//!
//! - **Healthy**: calls proceed.
//! - **Cooling**: the domain failed recently and is skipped until its
//!   retry deadline passes.
//!
//! Soft failures grow the window as `base * 2^(streak - 1)`, capped at the
//! domain maximum. Hard failures (resets, timeouts, 429/403) jump straight
//! to the maximum. State is in-memory and resets on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::CooldownSettings;
use crate::errors::FailureClass;

/// What the controller says about a domain right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownStatus {
    /// Calls may proceed.
    Healthy,
    /// Calls must be skipped for `remaining`.
    Cooling { remaining: Duration },
}

impl CooldownStatus {
    pub fn is_cooling(&self) -> bool {
        matches!(self, Self::Cooling { .. })
    }
}

/// Result of recording a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    /// Window the domain now cools for.
    pub cooldown: Duration,
    /// Consecutive failures including this one.
    pub streak: u32,
    /// False when this window was already reported.
    pub should_log: bool,
}

#[derive(Debug)]
struct CooldownState {
    fail_streak: u32,
    base: Duration,
    current: Duration,
    max: Duration,
    next_retry_at: Option<Instant>,
    /// End of the window most recently reported in the logs.
    logged_until: Option<Instant>,
}

impl CooldownState {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            fail_streak: 0,
            base,
            current: base,
            max,
            next_retry_at: None,
            logged_until: None,
        }
    }

    /// `min(base * 2^(streak - 1), max)`.
    fn doubled(&self) -> Duration {
        let exponent = self.fail_streak.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Snapshot of one domain for health reporting.
#[derive(Clone, Debug)]
pub struct CooldownMetrics {
    pub domain: String,
    pub fail_streak: u32,
    pub base: Duration,
    pub current: Duration,
    pub max: Duration,
    /// Time left in the current window, if cooling.
    pub remaining: Option<Duration>,
}

/// Per-domain cooldown state machines.
pub struct CooldownController {
    settings: CooldownSettings,
    states: Mutex<HashMap<String, CooldownState>>,
}

impl CooldownController {
    pub fn new(settings: CooldownSettings) -> Self {
        Self {
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the states mutex, recovering from poison if necessary.
    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, CooldownState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Cooldown controller mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn state_mut<'a>(
        &self,
        states: &'a mut HashMap<String, CooldownState>,
        domain: &str,
    ) -> &'a mut CooldownState {
        states.entry(domain.to_string()).or_insert_with(|| {
            let window = self.settings.window_for(domain);
            CooldownState::new(window.base(), window.max())
        })
    }

    /// Whether `domain` may be called now.
    pub fn check(&self, domain: &str) -> CooldownStatus {
        let states = self.lock_states();
        let now = Instant::now();
        match states.get(domain).and_then(|s| s.next_retry_at) {
            Some(at) if at > now => CooldownStatus::Cooling {
                remaining: at - now,
            },
            _ => CooldownStatus::Healthy,
        }
    }

    /// Return `domain` to Healthy.
    ///
    /// With ratcheting enabled, the window reached during the preceding
    /// streak becomes the new base.
    pub fn record_success(&self, domain: &str) {
        let mut states = self.lock_states();
        let state = self.state_mut(&mut states, domain);

        if state.fail_streak > 0 {
            if self.settings.ratchet_base_on_recovery {
                state.base = state.current.min(state.max);
            } else {
                state.base = self.settings.window_for(domain).base();
            }
            info!(
                "Cooldown: '{}' recovered after {} failure(s), base cooldown now {:?}",
                domain, state.fail_streak, state.base
            );
        }

        state.fail_streak = 0;
        state.current = state.base;
        state.next_retry_at = None;
        state.logged_until = None;
    }

    /// Register a failed attempt and start (or extend) the cooldown.
    pub fn record_failure(&self, domain: &str, class: FailureClass) -> FailureRecord {
        let mut states = self.lock_states();
        let state = self.state_mut(&mut states, domain);
        let now = Instant::now();

        state.fail_streak = state.fail_streak.saturating_add(1);
        state.current = match class {
            FailureClass::Hard => state.max,
            FailureClass::Soft => state.doubled(),
        };
        let until = now + state.current;
        state.next_retry_at = Some(until);

        let should_log = state.logged_until.map_or(true, |at| now >= at);
        if should_log {
            state.logged_until = Some(until);
        }

        debug!(
            "Cooldown: '{}' {} failure, streak {}, cooling {:?}",
            domain, class, state.fail_streak, state.current
        );

        FailureRecord {
            cooldown: state.current,
            streak: state.fail_streak,
            should_log,
        }
    }

    /// Forget all state for a domain.
    pub fn reset(&self, domain: &str) {
        if self.lock_states().remove(domain).is_some() {
            info!("Cooldown: manually reset '{}'", domain);
        }
    }

    /// Metrics for all tracked domains, sorted by name.
    pub fn metrics(&self) -> Vec<CooldownMetrics> {
        let now = Instant::now();
        let mut metrics: Vec<_> = self
            .lock_states()
            .iter()
            .map(|(domain, s)| CooldownMetrics {
                domain: domain.clone(),
                fail_streak: s.fail_streak,
                base: s.base,
                current: s.current,
                max: s.max,
                remaining: s.next_retry_at.filter(|at| *at > now).map(|at| at - now),
            })
            .collect();
        metrics.sort_by(|a, b| a.domain.cmp(&b.domain));
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CooldownWindow;
    use std::collections::BTreeMap;

    fn controller(base_secs: u64, max_secs: u64, ratchet: bool) -> CooldownController {
        CooldownController::new(CooldownSettings {
            default: CooldownWindow { base_secs, max_secs },
            domains: BTreeMap::new(),
            ratchet_base_on_recovery: ratchet,
        })
    }

    #[test]
    fn test_starts_healthy() {
        let cd = controller(60, 600, true);
        assert_eq!(cd.check("sina"), CooldownStatus::Healthy);
        assert!(cd.metrics().is_empty());
    }

    #[test]
    fn test_soft_failures_double_up_to_max() {
        let cd = controller(60, 600, true);
        let expected = [60, 120, 240, 480, 600, 600];
        for (n, secs) in expected.iter().enumerate() {
            let record = cd.record_failure("sina", FailureClass::Soft);
            assert_eq!(record.streak, n as u32 + 1);
            assert_eq!(record.cooldown, Duration::from_secs(*secs));
        }
        assert!(cd.check("sina").is_cooling());
    }

    #[test]
    fn test_long_streak_does_not_overflow() {
        let cd = controller(3600, 86_400, true);
        for _ in 0..200 {
            cd.record_failure("d", FailureClass::Soft);
        }
        let record = cd.record_failure("d", FailureClass::Soft);
        assert_eq!(record.cooldown, Duration::from_secs(86_400));
    }

    #[test]
    fn test_hard_failure_jumps_to_max() {
        let cd = controller(60, 600, true);
        let record = cd.record_failure("eastmoney", FailureClass::Hard);
        assert_eq!(record.streak, 1);
        assert_eq!(record.cooldown, Duration::from_secs(600));
        match cd.check("eastmoney") {
            CooldownStatus::Cooling { remaining } => assert!(remaining > Duration::from_secs(590)),
            other => panic!("expected cooling, got {:?}", other),
        }
    }

    #[test]
    fn test_success_ratchets_base() {
        let cd = controller(60, 600, true);
        cd.record_failure("sina", FailureClass::Soft);
        cd.record_failure("sina", FailureClass::Soft);
        cd.record_failure("sina", FailureClass::Soft);
        cd.record_success("sina");

        assert_eq!(cd.check("sina"), CooldownStatus::Healthy);
        let m = &cd.metrics()[0];
        assert_eq!(m.fail_streak, 0);
        assert_eq!(m.base, Duration::from_secs(240));
        assert_eq!(m.current, Duration::from_secs(240));

        // Next streak starts from the ratcheted base.
        let record = cd.record_failure("sina", FailureClass::Soft);
        assert_eq!(record.cooldown, Duration::from_secs(240));
    }

    #[test]
    fn test_success_without_ratchet_restores_configured_base() {
        let cd = controller(60, 600, false);
        cd.record_failure("sina", FailureClass::Hard);
        cd.record_success("sina");
        let record = cd.record_failure("sina", FailureClass::Soft);
        assert_eq!(record.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_failure_logged_once_per_window() {
        let cd = controller(60, 600, true);
        assert!(cd.record_failure("sina", FailureClass::Soft).should_log);
        assert!(!cd.record_failure("sina", FailureClass::Soft).should_log);
        cd.record_success("sina");
        assert!(cd.record_failure("sina", FailureClass::Soft).should_log);
    }

    #[test]
    fn test_domain_overrides_and_isolation() {
        let mut domains = BTreeMap::new();
        domains.insert(
            "minute_bars".to_string(),
            CooldownWindow {
                base_secs: 5,
                max_secs: 10,
            },
        );
        let cd = CooldownController::new(CooldownSettings {
            default: CooldownWindow {
                base_secs: 60,
                max_secs: 600,
            },
            domains,
            ratchet_base_on_recovery: true,
        });

        assert_eq!(
            cd.record_failure("minute_bars", FailureClass::Soft).cooldown,
            Duration::from_secs(5)
        );
        assert_eq!(cd.check("sina"), CooldownStatus::Healthy);
    }

    #[test]
    fn test_reset() {
        let cd = controller(60, 600, true);
        cd.record_failure("sina", FailureClass::Hard);
        cd.reset("sina");
        assert_eq!(cd.check("sina"), CooldownStatus::Healthy);
        assert!(cd.metrics().is_empty());
    }
}

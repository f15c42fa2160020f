//! Per-attempt trace of one failover run.

use std::fmt;
use std::time::Duration;

use crate::errors::FailureClass;
use crate::models::ProviderId;

/// Why a provider was passed over without being called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Its failure domain is cooling down.
    CoolingDown { remaining: Duration },
    /// Its per-minute budget is spent.
    QuotaExhausted { ceiling: u32 },
    /// It does not serve the requested dataset.
    NotSupported,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoolingDown { remaining } => write!(f, "cooling {}s", remaining.as_secs()),
            Self::QuotaExhausted { ceiling } => write!(f, "quota {}/min spent", ceiling),
            Self::NotSupported => f.write_str("unsupported"),
        }
    }
}

/// What happened to one provider during a run.
#[derive(Clone, Debug)]
pub enum AttemptOutcome {
    Skipped(SkipReason),
    /// Called and failed. `class` is `None` for errors that do not count
    /// toward the cooldown.
    Failed {
        error: String,
        class: Option<FailureClass>,
    },
    Served,
}

#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub outcome: AttemptOutcome,
}

impl ProviderAttempt {
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.outcome {
            AttemptOutcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether the upstream was actually contacted.
    pub fn was_called(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Skipped(_))
    }
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Skipped(reason) => write!(f, "{} skipped ({})", self.provider_id, reason),
            AttemptOutcome::Failed { error, class: Some(class) } => {
                write!(f, "{} failed [{}] ({})", self.provider_id, class, error)
            }
            AttemptOutcome::Failed { error, class: None } => {
                write!(f, "{} passed ({})", self.provider_id, error)
            }
            AttemptOutcome::Served => write!(f, "{} ok", self.provider_id),
        }
    }
}

/// Ordered list of attempts made by the chain.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, provider_id: ProviderId, outcome: AttemptOutcome) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome,
        });
    }

    pub fn skipped(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.push(provider_id, AttemptOutcome::Skipped(reason));
    }

    pub fn failed(&mut self, provider_id: ProviderId, error: String, class: Option<FailureClass>) {
        self.push(provider_id, AttemptOutcome::Failed { error, class });
    }

    pub fn served(&mut self, provider_id: ProviderId) {
        self.push(provider_id, AttemptOutcome::Served);
    }

    /// One line for logs, e.g. `em skipped (cooling 30s) -> sina ok`.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no eligible providers".to_string();
        }
        self.attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| matches!(a.outcome, AttemptOutcome::Served))
    }

    /// Providers whose upstream was contacted, in order.
    pub fn called(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.was_called())
            .map(|a| a.provider_id.as_ref())
            .collect()
    }

    pub fn skip_reasons(&self) -> Vec<(&str, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skip_reason().map(|r| (a.provider_id.as_ref(), r)))
            .collect()
    }

    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Failed { error, .. } => Some((a.provider_id.as_ref(), error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Most severe class among the counted failures, if any.
    pub fn worst_failure(&self) -> Option<FailureClass> {
        self.attempts
            .iter()
            .filter_map(|a| match a.outcome {
                AttemptOutcome::Failed { class, .. } => class,
                _ => None,
            })
            .max_by_key(|c| *c == FailureClass::Hard)
    }
}

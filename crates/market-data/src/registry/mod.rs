//! Acquisition registry module.
//!
//! This module provides the resilience primitives and their orchestration:
//! - Per-channel request throttling
//! - Per-minute quota metering for metered providers
//! - Failure cooldowns per domain
//! - Payload validation
//! - The failover chain tying them together

mod cooldown;
mod diagnostics;
mod failover;
mod log_throttle;
mod quota;
mod throttle;
mod validator;

pub use cooldown::{CooldownController, CooldownMetrics, CooldownStatus, FailureRecord};
pub use diagnostics::{AttemptOutcome, FetchDiagnostics, ProviderAttempt, SkipReason};
pub use failover::{ChainOutcome, FailoverChain};
pub use log_throttle::LogThrottle;
pub use quota::{QuotaMeter, QuotaUsage};
pub use throttle::{RequestThrottle, ThrottlePermit};
pub use validator::{repair_row, SnapshotValidator, ValidatorConfig};

//! Per-channel request throttle.
//!
//! Every channel owns one async lock guarding its last-call timestamp.
//! A caller holds the lock from the moment it is allowed to call until the
//! upstream call finishes, so concurrent callers on a channel are
//! serialized and spaced globally, not per caller. Different channels
//! never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::models::ChannelName;

/// Last-call bookkeeping for one channel.
#[derive(Debug, Default)]
struct ChannelState {
    last_call: Option<Instant>,
}

/// Exclusive right to call a channel.
///
/// Dropping the permit stamps the channel with the completion time, so
/// the next caller's spacing is measured from the end of this call.
pub struct ThrottlePermit {
    guard: OwnedMutexGuard<ChannelState>,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.guard.last_call = Some(Instant::now());
    }
}

/// Minimum-spacing throttle keyed by channel name.
#[derive(Default)]
pub struct RequestThrottle {
    channels: Mutex<HashMap<String, Arc<AsyncMutex<ChannelState>>>>,
}

impl RequestThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the channel map, recovering from poison if necessary.
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<ChannelState>>>> {
        self.channels.lock().unwrap_or_else(|poisoned| {
            warn!("Throttle channel map mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn channel(&self, channel: &ChannelName) -> Arc<AsyncMutex<ChannelState>> {
        self.lock_channels()
            .entry(channel.to_string())
            .or_default()
            .clone()
    }

    /// Wait until `min_interval` has passed since the channel's last call,
    /// then return a permit that keeps the channel locked until dropped.
    pub async fn acquire(&self, channel: &ChannelName, min_interval: Duration) -> ThrottlePermit {
        let mut guard = self.channel(channel).lock_owned().await;

        if let Some(last) = guard.last_call {
            let ready_at = last + min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(
                    "Throttle: waiting {:?} on channel '{}'",
                    ready_at - now,
                    channel
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        guard.last_call = Some(Instant::now());
        ThrottlePermit { guard }
    }

    /// Run `call` while holding the channel's permit.
    pub async fn run<F, T>(&self, channel: &ChannelName, min_interval: Duration, call: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self.acquire(channel, min_interval).await;
        call.await
    }
}

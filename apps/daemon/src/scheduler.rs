//! Background refresh of the full-market snapshot and index levels.
//!
//! Ticks at a fixed interval; outside the trading session each tick just
//! reports what the cache already holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use limitup_market_data::{AcquisitionService, Freshness};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Starts the background snapshot refresher.
pub fn start_snapshot_scheduler(service: Arc<AcquisitionService>, every: Duration) {
    tokio::spawn(async move {
        info!("Snapshot scheduler started ({:?} interval)", every);

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            run_refresh(&service).await;
        }
    });
}

/// Runs a single refresh and reports the outcome.
async fn run_refresh(service: &AcquisitionService) {
    let in_session = service.is_trading_session();
    let view = service.get_full_market_snapshot().await;

    match (view.freshness(), view.payload()) {
        (Freshness::Empty, _) | (_, None) => {
            if in_session {
                warn!("No market snapshot available yet");
            } else {
                debug!("Market closed and no snapshot cached");
            }
        }
        (freshness, Some(snapshot)) => {
            let limit_up = snapshot
                .rows
                .values()
                .filter(|row| row.is_at_limit_up())
                .count();
            let age = view
                .fetched_at()
                .map(|at| (Utc::now() - at).num_seconds())
                .unwrap_or_default();
            info!(
                "Snapshot: {} rows, {} at limit up, {:?} from {} ({}s old)",
                snapshot.len(),
                limit_up,
                freshness,
                view.source().unwrap_or("-"),
                age
            );
        }
    }

    if in_session {
        if let Some(indices) = service.get_indices().await.payload() {
            for index in indices {
                debug!(
                    "Index {} {}: {} ({}%)",
                    index.symbol,
                    index.name,
                    index.price,
                    index.change_percent()
                );
            }
        }
    }

    for domain in service.channel_health() {
        if let Some(remaining) = domain.remaining {
            info!(
                "Domain '{}' cooling: streak {}, {:?} left of {:?}",
                domain.domain, domain.fail_streak, remaining, domain.current
            );
        }
    }
    for usage in service.quota_usage() {
        debug!(
            "Quota '{}' minute {}: {}/{} used",
            usage.provider, usage.minute_key, usage.count, usage.ceiling
        );
    }
}

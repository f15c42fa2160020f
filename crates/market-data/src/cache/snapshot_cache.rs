//! Last-known-good dataset cache with single-flight refresh.
//!
//! `get_or_refresh` resolves a key in three steps:
//! 1. A fresh entry is returned without locking beyond the read lock.
//! 2. While the session gate is closed, whatever is cached (however old)
//!    is returned, or an empty view; no network work happens.
//! 3. Otherwise the key's refresh lock is taken, freshness is re-checked,
//!    and only then is the fetch run. Concurrent callers queue on the lock
//!    and read the refreshed entry.
//!
//! Entries are never evicted. They are the last-resort fallback when every
//! provider fails.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::SessionGate;
use crate::models::ProviderId;

/// One cached dataset.
#[derive(Debug)]
pub struct CachedDataset<T> {
    pub key: String,
    pub payload: Arc<T>,
    pub fetched_at: DateTime<Utc>,
    /// Provider that served the payload
    pub source: ProviderId,
}

impl<T> Clone for CachedDataset<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            payload: Arc::clone(&self.payload),
            fetched_at: self.fetched_at,
            source: self.source.clone(),
        }
    }
}

impl<T> CachedDataset<T> {
    /// Time since the payload was fetched.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// How current a returned view is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Within its TTL, or just refreshed.
    Fresh,
    /// Older than its TTL; returned because no refresh was possible.
    Stale,
    /// Nothing has ever been fetched for this key.
    Empty,
}

/// What consumers receive: a payload with provenance, or nothing.
#[derive(Debug)]
pub struct DatasetView<T> {
    freshness: Freshness,
    entry: Option<CachedDataset<T>>,
}

impl<T> Clone for DatasetView<T> {
    fn clone(&self) -> Self {
        Self {
            freshness: self.freshness,
            entry: self.entry.clone(),
        }
    }
}

impl<T> DatasetView<T> {
    pub fn fresh(entry: CachedDataset<T>) -> Self {
        Self {
            freshness: Freshness::Fresh,
            entry: Some(entry),
        }
    }

    pub fn stale(entry: CachedDataset<T>) -> Self {
        Self {
            freshness: Freshness::Stale,
            entry: Some(entry),
        }
    }

    pub fn empty() -> Self {
        Self {
            freshness: Freshness::Empty,
            entry: None,
        }
    }

    /// Stale view of `entry` if there is one, empty otherwise.
    pub fn fallback(entry: Option<CachedDataset<T>>) -> Self {
        entry.map_or_else(Self::empty, Self::stale)
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn payload(&self) -> Option<&T> {
        self.entry.as_ref().map(|e| e.payload.as_ref())
    }

    /// Shared handle to the payload.
    pub fn shared(&self) -> Option<Arc<T>> {
        self.entry.as_ref().map(|e| Arc::clone(&e.payload))
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|e| e.fetched_at)
    }

    pub fn source(&self) -> Option<&str> {
        self.entry.as_ref().map(|e| e.source.as_ref())
    }

    pub fn entry(&self) -> Option<&CachedDataset<T>> {
        self.entry.as_ref()
    }
}

/// Keyed dataset cache with per-key refresh locks.
pub struct SnapshotCache<T> {
    name: &'static str,
    entries: RwLock<HashMap<String, CachedDataset<T>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<T: Send + Sync> SnapshotCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| {
            warn!("{} cache lock map mutex was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }

    /// Current entry for `key`, regardless of age.
    pub fn peek(&self, key: &str) -> Option<CachedDataset<T>> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).cloned()
    }

    /// Store a freshly fetched payload, replacing any previous entry.
    pub fn insert(&self, key: &str, payload: T, source: ProviderId) -> CachedDataset<T> {
        self.insert_at(key, payload, source, Utc::now())
    }

    /// Store a payload fetched at a known time (e.g. restored from disk).
    pub fn insert_at(
        &self,
        key: &str,
        payload: T,
        source: ProviderId,
        fetched_at: DateTime<Utc>,
    ) -> CachedDataset<T> {
        let entry = CachedDataset {
            key: key.to_string(),
            payload: Arc::new(payload),
            fetched_at,
            source,
        };
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the refresh lock for `key`.
    ///
    /// Callers assembling a view from several keys hold one shared lock
    /// name while they refresh.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_locks().entry(key.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Return the entry for `key`, refreshing it through `fetch` if it is
    /// older than `ttl` and the gate is open.
    ///
    /// `fetch` returns `None` when no provider produced data; the previous
    /// entry is then returned as stale.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        gate: &dyn SessionGate,
        fetch: F,
    ) -> DatasetView<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<(T, ProviderId)>>,
    {
        if let Some(entry) = self.peek(key).filter(|e| e.is_fresh(ttl)) {
            return DatasetView::fresh(entry);
        }

        if !gate.is_open() {
            debug!("{} cache: session closed, serving cached '{}'", self.name, key);
            return DatasetView::fallback(self.peek(key));
        }

        let _guard = self.lock_key(key).await;

        // Another caller may have refreshed while we waited.
        if let Some(entry) = self.peek(key).filter(|e| e.is_fresh(ttl)) {
            return DatasetView::fresh(entry);
        }

        match fetch().await {
            Some((payload, source)) => {
                debug!("{} cache: refreshed '{}' from '{}'", self.name, key, source);
                DatasetView::fresh(self.insert(key, payload, source))
            }
            None => DatasetView::fallback(self.peek(key)),
        }
    }
}

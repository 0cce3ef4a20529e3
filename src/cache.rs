//! Result memoization.
//!
//! The cache is advisory: every backend fault is caught and treated as a
//! miss (on read) or a no-op (on write), so a broken store can never fail
//! an analysis. The store itself is a trait seam; the in-memory backend is
//! the default and anything with get/put-with-expiry semantics can replace
//! it.

use crate::models::ConsensusResult;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Key prefix for analysis results.
const KEY_PREFIX: &str = "analysis:";

/// A key/value store with expiry semantics.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

/// In-process store with deadline-based expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("store lock poisoned");

        let expired = entries
            .get(key)
            .is_some_and(|(deadline, _)| *deadline <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(_, value)| value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }
}

/// Cache-aside wrapper around a [`ResultStore`].
pub struct ResultCache {
    store: Arc<dyn ResultStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn ResultStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(study_id: &str) -> String {
        format!("{KEY_PREFIX}{study_id}")
    }

    /// Look up a cached result. Store faults and corrupt entries are
    /// logged and reported as a miss.
    pub async fn get(&self, study_id: &str) -> Option<ConsensusResult> {
        let key = Self::key(study_id);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(result) => {
                debug!("Cache hit for {}", key);
                Some(result)
            }
            Err(e) => {
                warn!("Corrupt cache entry for {}: {}", key, e);
                None
            }
        }
    }

    /// Store a result. Serialization or store faults are logged and
    /// swallowed; the analysis outcome is already in hand.
    pub async fn put(&self, result: &ConsensusResult) {
        let key = Self::key(&result.study_id);
        let serialized = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize result for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.store.put(&key, serialized, self.ttl).await {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }
}

/// Per-key async locks enforcing single-flight computation.
///
/// Concurrent callers for the same key serialize on one lock, so the
/// second caller observes the first caller's cached result instead of
/// repeating the orchestration.
#[derive(Default)]
pub struct SingleFlight {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, waiting behind any in-flight holder.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("flight lock poisoned");
            // Drop locks nobody holds or awaits anymore.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

//! In-memory TTL cache for tool results.

use crate::tool_registry::{
    domain::{CacheKey, CachedResult},
    ports::ToolResultCache,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct CacheEntry {
    result: CachedResult,
    stored_at: DateTime<Utc>,
}

/// Bounded in-memory result cache with a fixed time-to-live.
///
/// When full, the oldest entry is evicted.
#[derive(Debug)]
pub struct InMemoryToolResultCache {
    ttl: TimeDelta,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryToolResultCache {
    /// Creates a cache.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.stored_at) < self.ttl
    }
}

#[async_trait]
impl ToolResultCache for InMemoryToolResultCache {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CachedResult> {
        let mut entries = self.lock();
        let fresh = entries.get(key).map(|entry| self.is_fresh(entry, now))?;
        if fresh {
            entries.get(key).map(|entry| entry.result.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    async fn put(&self, key: CacheKey, result: CachedResult, now: DateTime<Utc>) {
        let mut entries = self.lock();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        if entries.len() >= self.capacity
            && !entries.contains_key(&key)
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(oldest_key, _)| oldest_key.clone())
        {
            entries.remove(&oldest);
        }
        entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: now,
            },
        );
    }
}

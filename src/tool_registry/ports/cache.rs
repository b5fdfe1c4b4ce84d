//! Result cache port.

use crate::tool_registry::domain::{CacheKey, CachedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage for results of read-only tools.
///
/// Cache failures are never fatal to an invocation, so the contract is
/// infallible: an unreachable cache behaves as a miss.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolResultCache: Send + Sync {
    /// Returns a result stored for `key` that is still fresh at `now`.
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CachedResult>;

    /// Stores a result.
    async fn put(&self, key: CacheKey, result: CachedResult, now: DateTime<Utc>);
}

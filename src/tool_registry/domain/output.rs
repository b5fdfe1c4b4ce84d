//! Tool results and cache keys.

use super::QualifiedToolName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Successful result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Tool that produced the value.
    pub tool: QualifiedToolName,
    /// Returned value.
    pub value: Value,
    /// When the tool actually executed. For cache hits this is the time of
    /// the original execution.
    pub executed_at: DateTime<Utc>,
    /// Whether the value came from the result cache.
    pub served_from_cache: bool,
    /// Time spent serving this invocation.
    pub elapsed: Duration,
}

/// Result cache key: tool plus argument fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Qualified tool name.
    pub tool: QualifiedToolName,
    /// SHA-256 of the canonical argument encoding.
    pub fingerprint: String,
}

/// A cached tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Returned value.
    pub value: Value,
    /// When the tool executed.
    pub executed_at: DateTime<Utc>,
}

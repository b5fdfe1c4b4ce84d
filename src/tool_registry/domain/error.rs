//! Error types for tool registry validation and tool invocation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned while constructing tool registry domain values.
///
/// These are configuration errors raised at registration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryDomainError {
    /// The source name is empty after trimming.
    #[error("tool source name must not be empty")]
    EmptySourceName,

    /// The source name contains characters outside `[a-z0-9_-]`.
    #[error(
        "tool source name '{0}' contains invalid characters (only lowercase alphanumeric, '_' and '-' allowed)"
    )]
    InvalidSourceName(String),

    /// The tool name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// The tool name contains characters outside `[A-Za-z0-9_.-]`.
    #[error("tool name '{0}' contains invalid characters")]
    InvalidToolName(String),

    /// A source or tool name exceeds the 100-character limit.
    #[error("name exceeds 100 character limit: {0}")]
    NameTooLong(String),

    /// A qualified name was expected but no `source:` prefix was given.
    #[error("tool name '{0}' is not qualified with a source")]
    MissingQualifier(String),

    /// A tool description is empty after trimming.
    #[error("description of tool '{0}' must not be empty")]
    EmptyToolDescription(String),

    /// A parameter schema could not be parsed.
    #[error("invalid parameter schema: {0}")]
    InvalidSchema(String),
}

/// Typed failure of a tool lookup or invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ToolError {
    /// The context's policy or caller role forbids the call.
    #[error("permission denied for tool '{tool}': {reason}")]
    PermissionDenied {
        /// Tool name.
        tool: String,
        /// Why the call was refused.
        reason: String,
    },

    /// No registered tool matches the name.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// Several equally ranked sources offer the bare name.
    #[error("tool name '{name}' is ambiguous; qualify it with one of: {}", .candidates.join(", "))]
    Ambiguous {
        /// Bare name as requested.
        name: String,
        /// Qualified names of the tied candidates.
        candidates: Vec<String>,
    },

    /// The call did not finish in time and was abandoned.
    #[error("tool '{tool}' timed out after {after:?}")]
    TimedOut {
        /// Qualified tool name.
        tool: String,
        /// Time allowed for the call.
        after: Duration,
    },

    /// The tool's source is disconnected or withdrew the tool.
    #[error("tool '{tool}' is unavailable: {reason}")]
    SourceUnavailable {
        /// Qualified tool name.
        tool: String,
        /// Availability detail.
        reason: String,
    },

    /// The tool ran and reported a failure.
    #[error("tool '{tool}' failed: {detail}")]
    ExecutionFailed {
        /// Qualified tool name.
        tool: String,
        /// Failure detail.
        detail: String,
    },

    /// Arguments did not match the parameter schema.
    #[error("invalid arguments for tool '{tool}': {detail}")]
    InvalidArguments {
        /// Qualified tool name.
        tool: String,
        /// Validation detail.
        detail: String,
    },

    /// The request was cancelled before the tool finished.
    #[error("tool '{0}' cancelled")]
    Cancelled(String),
}

impl ToolError {
    /// Returns whether the executor retries this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. })
    }
}

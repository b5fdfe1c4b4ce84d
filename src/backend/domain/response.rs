//! Backend replies, attempt logs and the caller-facing response.

use super::{BackendError, BackendName};
use crate::tool_registry::domain::{ToolError, ToolOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A tool call requested by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Bare or source-qualified tool name.
    pub name: String,
    /// Arguments as produced by the model.
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Creates a tool call request.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// What a backend adapter returns for a one-shot invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    /// Generated content.
    pub content: String,
    /// Model that produced the content.
    pub model: String,
    /// Tool calls the backend asked for.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl BackendReply {
    /// Creates a reply without tool calls.
    #[must_use]
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Appends a requested tool call.
    #[must_use]
    pub fn with_tool_call(mut self, call: ToolCallRequest) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// Why a candidate was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The circuit is open.
    CircuitOpen,
    /// Another request is already probing the half-open backend.
    ProbeInFlight,
    /// The attempt budget ran out before this candidate.
    AttemptBudgetExhausted,
}

/// Outcome of one candidate in the fallback walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The backend served the request.
    Succeeded,
    /// The backend failed.
    Failed(BackendError),
    /// The backend was not called.
    Skipped(SkipReason),
}

/// One entry of the attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Candidate backend.
    pub backend: BackendName,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Time spent on the attempt.
    pub elapsed: Duration,
}

impl AttemptRecord {
    /// Returns whether the attempt called the backend and failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed(_))
    }
}

/// A tool call made while serving a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Name as requested.
    pub name: String,
    /// Arguments as requested.
    pub arguments: Value,
    /// Tool output or typed tool error.
    pub result: Result<ToolOutput, ToolError>,
}

/// Terminal result of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated content.
    pub content: String,
    /// Backend that served the request.
    pub chosen_backend: BackendName,
    /// Model that produced the content.
    pub model: String,
    /// Tool calls executed for this turn.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Every candidate considered, in order.
    pub attempts: Vec<AttemptRecord>,
    /// When the request started.
    pub started_at: DateTime<Utc>,
    /// Total time spent.
    pub elapsed: Duration,
}

//! Caller-facing request shape.

use super::BackendName;
use crate::execution::{CachePolicy, ToolPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Input payload of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RequestInput {
    /// Plain prompt text.
    Text(String),
    /// Structured input such as a message list.
    Structured(Value),
}

/// A generation or streaming request as submitted by a caller.
///
/// Optional fields override the corresponding policy of the execution
/// context for this request only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    input: RequestInput,
    requested_backend: Option<BackendName>,
    model: Option<String>,
    tool_policy: Option<ToolPolicy>,
    timeout: Option<Duration>,
    cache_policy: Option<CachePolicy>,
}

impl GenerationRequest {
    /// Creates a text request.
    #[must_use]
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::new(RequestInput::Text(prompt.into()))
    }

    /// Creates a structured request.
    #[must_use]
    pub const fn structured(value: Value) -> Self {
        Self::new(RequestInput::Structured(value))
    }

    const fn new(input: RequestInput) -> Self {
        Self {
            input,
            requested_backend: None,
            model: None,
            tool_policy: None,
            timeout: None,
            cache_policy: None,
        }
    }

    /// Names the backend the caller prefers.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendName) -> Self {
        self.requested_backend = Some(backend);
        self
    }

    /// Overrides the backend's default model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Overrides the context's tool policy.
    #[must_use]
    pub fn with_tool_policy(mut self, tool_policy: ToolPolicy) -> Self {
        self.tool_policy = Some(tool_policy);
        self
    }

    /// Shortens the request deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the context's cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = Some(cache_policy);
        self
    }

    /// Returns the input payload.
    #[must_use]
    pub const fn input(&self) -> &RequestInput {
        &self.input
    }

    /// Returns the requested backend.
    #[must_use]
    pub const fn requested_backend(&self) -> Option<&BackendName> {
        self.requested_backend.as_ref()
    }

    /// Returns the model override.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Returns the tool policy override.
    #[must_use]
    pub const fn tool_policy(&self) -> Option<&ToolPolicy> {
        self.tool_policy.as_ref()
    }

    /// Returns the timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the cache policy override.
    #[must_use]
    pub const fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }
}

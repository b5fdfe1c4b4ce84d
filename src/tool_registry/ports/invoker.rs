//! Transport port for invoking tools offered by a source.

use crate::execution::ExecutionContext;
use crate::tool_registry::domain::{ToolArguments, ToolName};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Result type for tool invocations.
pub type ToolInvocationResult<T> = Result<T, ToolInvocationError>;

/// Calls tools on one source: a remote tool server, a child process, or the
/// compiled-in tool table.
///
/// Implementations are expected to honour the context's cancellation token;
/// the executor enforces the deadline regardless.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes `tool` with validated arguments.
    async fn call(
        &self,
        tool: &ToolName,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> ToolInvocationResult<Value>;
}

/// Errors returned by tool invokers.
#[derive(Debug, Clone, Error)]
pub enum ToolInvocationError {
    /// The source cannot serve calls right now.
    #[error("tool source unavailable: {0}")]
    Unavailable(String),

    /// The tool ran and reported a failure.
    #[error("tool execution failed: {0}")]
    Failed(String),

    /// Generic transport failure.
    #[error("tool transport error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl ToolInvocationError {
    /// Wraps a transport error from the invoker.
    #[must_use]
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }
}

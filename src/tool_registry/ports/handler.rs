//! Port for compiled-in tools.

use super::ToolInvocationResult;
use crate::execution::ExecutionContext;
use crate::tool_registry::domain::{ToolArguments, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;

/// A tool implemented inside the process.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Returns the published spec.
    fn spec(&self) -> &ToolSpec;

    /// Runs the tool.
    async fn call(
        &self,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> ToolInvocationResult<Value>;
}

//! Invoker for compiled-in tools.

use crate::execution::ExecutionContext;
use crate::tool_registry::{
    domain::{ToolArguments, ToolName, ToolSpec},
    ports::{ToolHandler, ToolInvocationError, ToolInvocationResult, ToolInvoker},
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Dispatch table of compiled-in tool handlers.
///
/// Registered with the tool registry as the `builtin` source.
#[derive(Default)]
pub struct BuiltinTools {
    handlers: RwLock<HashMap<ToolName, Arc<dyn ToolHandler>>>,
}

impl BuiltinTools {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a handler.
    pub fn insert(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.spec().name().clone();
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handler);
    }

    /// Returns the specs of every handler.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|handler| handler.spec().clone())
            .collect()
    }

    fn handler(&self, tool: &ToolName) -> Option<Arc<dyn ToolHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
            .cloned()
    }
}

#[async_trait]
impl ToolInvoker for BuiltinTools {
    async fn call(
        &self,
        tool: &ToolName,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> ToolInvocationResult<Value> {
        let handler = self
            .handler(tool)
            .ok_or_else(|| ToolInvocationError::Unavailable(format!("no builtin tool '{tool}'")))?;
        handler.call(arguments, context).await
    }
}

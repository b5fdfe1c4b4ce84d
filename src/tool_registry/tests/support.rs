//! Shared fixtures for tool registry tests.

use crate::execution::ExecutionContext;
use crate::tool_registry::{
    domain::{SideEffectClass, ToolArguments, ToolSpec},
    ports::{ToolHandler, ToolInvocationResult},
};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Compiled-in tool answering a fixed value.
pub struct StaticTool {
    spec: ToolSpec,
    value: Value,
}

impl StaticTool {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            spec: spec(name, SideEffectClass::ReadOnly),
            value,
        }
    }
}

#[async_trait]
impl ToolHandler for StaticTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(
        &self,
        _arguments: &ToolArguments,
        _context: &ExecutionContext,
    ) -> ToolInvocationResult<Value> {
        Ok(self.value.clone())
    }
}

pub fn spec(name: &str, side_effect: SideEffectClass) -> ToolSpec {
    ToolSpec::new(
        name,
        format!("{name} tool"),
        &json!({
            "type": "object",
            "properties": {"q": {"type": "string"}},
        }),
        side_effect,
    )
    .expect("valid tool spec")
}

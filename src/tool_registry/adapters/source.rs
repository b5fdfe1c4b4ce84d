//! In-memory stand-in for an external tool source.

use crate::execution::ExecutionContext;
use crate::tool_registry::{
    domain::{ToolArguments, ToolName, ToolSpec},
    ports::{ToolInvocationError, ToolInvocationResult, ToolInvoker},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// How a scripted tool answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBehaviour {
    /// Return the arguments wrapped as `{"tool": name, "arguments": ...}`.
    Echo,
    /// Return a fixed value.
    Respond(Value),
    /// Fail with the given detail.
    Fail(String),
    /// Fail the first `failures` calls, then return the value.
    Flaky {
        /// Calls that fail before the first success.
        failures: u32,
        /// Value returned once the failures are used up.
        value: Value,
    },
    /// Answer after a delay.
    Slow(Duration),
}

#[derive(Debug)]
struct ScriptedTool {
    spec: ToolSpec,
    behaviour: ToolBehaviour,
    calls: u32,
}

#[derive(Debug, Default)]
struct SourceState {
    tools: HashMap<ToolName, ScriptedTool>,
}

/// External tool source modelled in memory.
///
/// The source publishes a catalog snapshot and answers calls according to
/// per-tool behaviours, without spawning any process. Cloning shares state,
/// so tests can keep a handle while the registry owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolSource {
    state: Arc<RwLock<SourceState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryToolSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a tool in the catalog.
    pub fn offer(&self, spec: ToolSpec, behaviour: ToolBehaviour) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.tools.insert(
            spec.name().clone(),
            ScriptedTool {
                spec,
                behaviour,
                calls: 0,
            },
        );
    }

    /// Removes a tool from the catalog.
    pub fn withdraw(&self, tool: &ToolName) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .remove(tool);
    }

    /// Returns the current catalog, as pushed to the registry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ToolSpec> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut specs: Vec<_> = state.tools.values().map(|tool| tool.spec.clone()).collect();
        specs.sort_by(|left, right| left.name().cmp(right.name()));
        specs
    }

    /// Makes every call fail as unavailable until brought back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns how many calls `tool` received.
    #[must_use]
    pub fn calls(&self, tool: &ToolName) -> u32 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .get(tool)
            .map_or(0, |scripted| scripted.calls)
    }

    fn begin_call(&self, tool: &ToolName) -> ToolInvocationResult<(ToolBehaviour, u32)> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let scripted = state
            .tools
            .get_mut(tool)
            .ok_or_else(|| ToolInvocationError::Unavailable(format!("tool '{tool}' not offered")))?;
        scripted.calls = scripted.calls.saturating_add(1);
        Ok((scripted.behaviour.clone(), scripted.calls))
    }
}

#[async_trait]
impl ToolInvoker for InMemoryToolSource {
    async fn call(
        &self,
        tool: &ToolName,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> ToolInvocationResult<Value> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ToolInvocationError::Unavailable("source offline".to_owned()));
        }
        let (behaviour, call_number) = self.begin_call(tool)?;
        match behaviour {
            ToolBehaviour::Echo => Ok(json!({
                "tool": tool.as_str(),
                "arguments": arguments.to_value(),
            })),
            ToolBehaviour::Respond(value) => Ok(value),
            ToolBehaviour::Fail(detail) => Err(ToolInvocationError::Failed(detail)),
            ToolBehaviour::Flaky { failures, value } => {
                if call_number <= failures {
                    Err(ToolInvocationError::Failed(format!(
                        "transient failure {call_number} of {failures}"
                    )))
                } else {
                    Ok(value)
                }
            }
            ToolBehaviour::Slow(delay) => {
                tokio::select! {
                    () = context.cancellation().cancelled() => {
                        Err(ToolInvocationError::Failed("cancelled".to_owned()))
                    }
                    () = tokio::time::sleep(delay) => Ok(json!({ "tool": tool.as_str() })),
                }
            }
        }
    }
}

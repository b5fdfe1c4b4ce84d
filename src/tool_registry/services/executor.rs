//! Gated tool invocation.

use super::ToolRegistry;
use crate::execution::{CallerRole, ContextInterrupt, ExecutionContext};
use crate::tool_registry::{
    domain::{
        CacheKey, CachedResult, SideEffectClass, ToolArguments, ToolDescriptor, ToolError,
        ToolOutput,
    },
    ports::{ToolInvocationError, ToolInvoker, ToolResultCache},
};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Invokes resolved tools under the request's execution context.
///
/// Each invocation passes, in order: the permission check, the result cache
/// (read-only tools only), and the call itself under a hard timeout. Only
/// `ExecutionFailed` is retried, once, with a fresh timeout.
pub struct ToolExecutor<C>
where
    C: Clock + Send + Sync,
{
    registry: Arc<ToolRegistry<C>>,
    cache: Arc<dyn ToolResultCache>,
    clock: Arc<C>,
    timeout: Duration,
}

impl<C> ToolExecutor<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an executor; `timeout` bounds every single call and is
    /// further capped by the request deadline.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry<C>>,
        cache: Arc<dyn ToolResultCache>,
        clock: Arc<C>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            clock,
            timeout,
        }
    }

    /// Returns the registry tools are resolved against.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry<C>> {
        &self.registry
    }

    /// Resolves `name` and invokes the result.
    ///
    /// # Errors
    ///
    /// Returns the resolution error or any error of [`Self::invoke`].
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let descriptor = self.registry.resolve(name)?;
        self.invoke(&descriptor, arguments, context).await
    }

    /// Invokes a resolved tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::PermissionDenied`] when the context forbids the
    /// call, [`ToolError::InvalidArguments`] when validation fails,
    /// [`ToolError::SourceUnavailable`] or [`ToolError::NotFound`] when the
    /// tool cannot be called any more, [`ToolError::TimedOut`] or
    /// [`ToolError::Cancelled`] when the call was abandoned, and
    /// [`ToolError::ExecutionFailed`] when it failed twice.
    pub async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let (current, invoker) = self.registry.binding(descriptor.qualified_name())?;
        let tool = current.qualified_name().clone();
        check_context(context, &current)?;
        authorize(&current, context)?;
        let validated = current
            .schema()
            .validate(arguments)
            .map_err(|detail| ToolError::InvalidArguments {
                tool: tool.to_string(),
                detail,
            })?;

        let policy = context.cache_policy();
        let cacheable = policy.allows(current.side_effect());
        let key = CacheKey {
            tool: tool.clone(),
            fingerprint: validated.fingerprint(),
        };
        if cacheable
            && policy.reads()
            && let Some(hit) = self.cache.get(&key, self.clock.utc()).await
        {
            tracing::debug!(tool = %tool, "tool result served from cache");
            return Ok(ToolOutput {
                tool,
                value: hit.value,
                executed_at: hit.executed_at,
                served_from_cache: true,
                elapsed: started.elapsed(),
            });
        }

        let executed_at = self.clock.utc();
        let value = match self.attempt(&current, &invoker, &validated, context).await {
            Err(error) if error.is_retryable() => {
                tracing::debug!(tool = %tool, error = %error, "retrying failed tool call");
                self.attempt(&current, &invoker, &validated, context).await?
            }
            other => other?,
        };

        if cacheable && policy.writes() {
            let result = CachedResult {
                value: value.clone(),
                executed_at,
            };
            self.cache.put(key, result, self.clock.utc()).await;
        }
        tracing::debug!(tool = %tool, "tool call completed");
        Ok(ToolOutput {
            tool,
            value,
            executed_at,
            served_from_cache: false,
            elapsed: started.elapsed(),
        })
    }

    async fn attempt(
        &self,
        descriptor: &ToolDescriptor,
        invoker: &Arc<dyn ToolInvoker>,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        let tool = descriptor.qualified_name().to_string();
        let budget = self.timeout.min(context.remaining());
        let scoped = context.with_timeout(self.timeout);
        match scoped
            .run(invoker.call(descriptor.name(), arguments, &scoped))
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ToolInvocationError::Unavailable(reason))) => {
                Err(ToolError::SourceUnavailable { tool, reason })
            }
            Ok(Err(ToolInvocationError::Failed(detail))) => {
                Err(ToolError::ExecutionFailed { tool, detail })
            }
            Ok(Err(err @ ToolInvocationError::Runtime(_))) => Err(ToolError::ExecutionFailed {
                tool,
                detail: err.to_string(),
            }),
            Err(ContextInterrupt::Cancelled) => Err(ToolError::Cancelled(tool)),
            Err(ContextInterrupt::DeadlineExceeded) if context.is_cancelled() => {
                Err(ToolError::Cancelled(tool))
            }
            Err(ContextInterrupt::DeadlineExceeded) => {
                if budget == self.timeout {
                    self.registry.mark_slow(descriptor.source());
                }
                tracing::warn!(tool = %tool, after = ?budget, "tool call timed out");
                Err(ToolError::TimedOut {
                    tool,
                    after: budget,
                })
            }
        }
    }
}

fn check_context(context: &ExecutionContext, descriptor: &ToolDescriptor) -> Result<(), ToolError> {
    let tool = descriptor.qualified_name().to_string();
    context.check().map_err(|interrupt| match interrupt {
        ContextInterrupt::Cancelled => ToolError::Cancelled(tool),
        ContextInterrupt::DeadlineExceeded => ToolError::TimedOut {
            tool,
            after: Duration::ZERO,
        },
    })
}

fn authorize(descriptor: &ToolDescriptor, context: &ExecutionContext) -> Result<(), ToolError> {
    let policy = context.tool_policy();
    let class = descriptor.side_effect();
    let reason = if !policy.is_enabled() {
        Some("tools are disabled for this request")
    } else if class == SideEffectClass::Mutating && context.caller_role() == CallerRole::Observer {
        Some("observers may not run mutating tools")
    } else if !policy.allows(class) {
        Some("mutating tools are not allowed for this request")
    } else {
        None
    };
    reason.map_or(Ok(()), |refusal| {
        tracing::debug!(tool = %descriptor.qualified_name(), refusal, "tool call refused");
        Err(ToolError::PermissionDenied {
            tool: descriptor.qualified_name().to_string(),
            reason: refusal.to_owned(),
        })
    })
}

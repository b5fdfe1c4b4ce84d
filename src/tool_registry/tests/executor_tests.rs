//! Unit tests for gated tool invocation.

use super::support::{StaticTool, spec};
use crate::execution::{CachePolicy, CallerRole, ExecutionContext, SessionId, ToolPolicy, UserId};
use crate::test_support::ManualClock;
use crate::tool_registry::{
    adapters::{InMemoryToolResultCache, InMemoryToolSource, ToolBehaviour},
    domain::{CachedResult, SideEffectClass, SourceName, ToolError, ToolName},
    ports::{MockToolResultCache, ToolResultCache},
    services::{ToolExecutor, ToolRegistry},
};
use mockable::Clock;
use rstest::rstest;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const TOOL_TIMEOUT: Duration = Duration::from_secs(1);

struct Harness {
    clock: Arc<ManualClock>,
    source: InMemoryToolSource,
    registry: Arc<ToolRegistry<ManualClock>>,
    executor: ToolExecutor<ManualClock>,
}

impl Harness {
    fn new(cache: Arc<dyn ToolResultCache>) -> Self {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(ToolRegistry::new(Arc::clone(&clock)));
        let source = InMemoryToolSource::new();
        let source_name = SourceName::new("x").expect("valid source name");
        registry
            .connect_source(source_name, Arc::new(source.clone()))
            .expect("source connects");
        let executor = ToolExecutor::new(
            Arc::clone(&registry),
            cache,
            Arc::clone(&clock),
            TOOL_TIMEOUT,
        );
        Self {
            clock,
            source,
            registry,
            executor,
        }
    }

    fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryToolResultCache::new(
            Duration::from_secs(60),
            16,
        )))
    }

    fn offer(&self, name: &str, side_effect: SideEffectClass, behaviour: ToolBehaviour) {
        self.source.offer(spec(name, side_effect), behaviour);
        let source_name = SourceName::new("x").expect("valid source name");
        self.registry
            .register(&source_name, self.source.snapshot())
            .expect("snapshot registers");
    }

    fn calls(&self, name: &str) -> u32 {
        self.source
            .calls(&ToolName::new(name).expect("valid tool name"))
    }

    async fn call(&self, name: &str, context: &ExecutionContext) -> Result<Value, ToolError> {
        self.executor
            .call(name, json!({"q": "rust"}), context)
            .await
            .map(|output| output.value)
    }
}

fn context(tool_policy: ToolPolicy) -> ExecutionContext {
    ExecutionContext::builder(SessionId::new("session"), UserId::new("user"))
        .tool_policy(tool_policy)
        .build()
}

#[rstest]
#[tokio::test]
async fn mutating_tool_is_never_cached() {
    let mut cache = MockToolResultCache::new();
    cache.expect_get().never();
    cache.expect_put().never();
    let harness = Harness::new(Arc::new(cache));
    harness.offer(
        "write_file",
        SideEffectClass::Mutating,
        ToolBehaviour::Respond(json!("written")),
    );
    let ctx = context(ToolPolicy::allow_mutating());

    let first = harness
        .executor
        .call("write_file", json!({"q": "same"}), &ctx)
        .await
        .expect("first call");
    harness.clock.advance(Duration::from_secs(1));
    let second = harness
        .executor
        .call("write_file", json!({"q": "same"}), &ctx)
        .await
        .expect("second call");

    assert!(!first.served_from_cache);
    assert!(!second.served_from_cache);
    assert!(second.executed_at > first.executed_at);
    assert_eq!(harness.calls("write_file"), 2);
}

#[rstest]
#[tokio::test]
async fn read_only_results_are_served_from_cache() {
    let harness = Harness::in_memory();
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);
    let ctx = context(ToolPolicy::read_only());

    let first = harness
        .executor
        .call("search", json!({"q": "rust"}), &ctx)
        .await
        .expect("first call");
    harness.clock.advance(Duration::from_secs(5));
    let second = harness
        .executor
        .call("x:search", json!({"q": "rust"}), &ctx)
        .await
        .expect("second call");

    assert!(second.served_from_cache);
    assert_eq!(second.executed_at, first.executed_at);
    assert_eq!(second.value, first.value);
    assert_eq!(harness.calls("search"), 1);
}

#[rstest]
#[case::bypass(CachePolicy::Bypass, 2)]
#[case::refresh(CachePolicy::Refresh, 2)]
#[case::use_cache(CachePolicy::Use, 1)]
#[tokio::test]
async fn cache_policy_controls_reads(#[case] policy: CachePolicy, #[case] expected_calls: u32) {
    let harness = Harness::in_memory();
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);
    let ctx = ExecutionContext::builder(SessionId::new("s"), UserId::new("u"))
        .cache_policy(policy)
        .build();

    harness.call("search", &ctx).await.expect("first call");
    harness.call("search", &ctx).await.expect("second call");

    assert_eq!(harness.calls("search"), expected_calls);
}

#[rstest]
#[tokio::test]
async fn cache_hit_skips_the_source() {
    let executed_at = ManualClock::new().utc();
    let mut cache = MockToolResultCache::new();
    cache.expect_get().times(1).returning(move |_, _| {
        Some(CachedResult {
            value: json!("cached"),
            executed_at,
        })
    });
    cache.expect_put().never();
    let harness = Harness::new(Arc::new(cache));
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);

    let output = harness
        .executor
        .call("search", json!({}), &context(ToolPolicy::read_only()))
        .await
        .expect("served from cache");

    assert!(output.served_from_cache);
    assert_eq!(output.value, json!("cached"));
    assert_eq!(harness.calls("search"), 0);
}

#[rstest]
#[case::disabled(ToolPolicy::disabled(), CallerRole::Interactive, SideEffectClass::ReadOnly)]
#[case::read_only_policy(ToolPolicy::read_only(), CallerRole::Interactive, SideEffectClass::Mutating)]
#[case::observer(ToolPolicy::allow_mutating(), CallerRole::Observer, SideEffectClass::Mutating)]
#[tokio::test]
async fn forbidden_calls_are_denied_without_running(
    #[case] policy: ToolPolicy,
    #[case] role: CallerRole,
    #[case] class: SideEffectClass,
) {
    let harness = Harness::in_memory();
    harness.offer("tool", class, ToolBehaviour::Echo);
    let ctx = ExecutionContext::builder(SessionId::new("s"), UserId::new("u"))
        .tool_policy(policy)
        .caller_role(role)
        .build();

    let result = harness.call("tool", &ctx).await;

    assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    assert_eq!(harness.calls("tool"), 0);
}

#[rstest]
#[tokio::test]
async fn invalid_arguments_never_reach_the_source() {
    let harness = Harness::in_memory();
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);

    let result = harness
        .executor
        .call("search", json!({"q": 42}), &context(ToolPolicy::read_only()))
        .await;

    assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    assert_eq!(harness.calls("search"), 0);
}

#[rstest]
#[tokio::test]
async fn execution_failure_is_retried_once() {
    let harness = Harness::in_memory();
    harness.offer(
        "flaky",
        SideEffectClass::ReadOnly,
        ToolBehaviour::Flaky {
            failures: 1,
            value: json!("ok"),
        },
    );

    let value = harness
        .call("flaky", &context(ToolPolicy::read_only()))
        .await
        .expect("retry succeeds");

    assert_eq!(value, json!("ok"));
    assert_eq!(harness.calls("flaky"), 2);
}

#[rstest]
#[tokio::test]
async fn persistent_failure_surfaces_after_one_retry() {
    let harness = Harness::in_memory();
    harness.offer(
        "broken",
        SideEffectClass::ReadOnly,
        ToolBehaviour::Fail("disk full".to_owned()),
    );

    let result = harness
        .call("broken", &context(ToolPolicy::read_only()))
        .await;

    assert_eq!(
        result,
        Err(ToolError::ExecutionFailed {
            tool: "x:broken".to_owned(),
            detail: "disk full".to_owned(),
        })
    );
    assert_eq!(harness.calls("broken"), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn slow_tool_times_out_and_marks_its_source() {
    let harness = Harness::in_memory();
    harness.offer(
        "slow",
        SideEffectClass::ReadOnly,
        ToolBehaviour::Slow(Duration::from_secs(30)),
    );

    let result = harness.call("slow", &context(ToolPolicy::read_only())).await;

    assert_eq!(
        result,
        Err(ToolError::TimedOut {
            tool: "x:slow".to_owned(),
            after: TOOL_TIMEOUT,
        })
    );
    let source = SourceName::new("x").expect("valid source name");
    assert_eq!(harness.registry.slow_marks(&source), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn short_request_deadline_does_not_mark_the_source_slow() {
    let harness = Harness::in_memory();
    harness.offer(
        "slow",
        SideEffectClass::ReadOnly,
        ToolBehaviour::Slow(Duration::from_secs(30)),
    );
    let ctx = ExecutionContext::builder(SessionId::new("session"), UserId::new("user"))
        .timeout(Duration::from_millis(200))
        .build();

    let result = harness.call("slow", &ctx).await;

    assert!(matches!(result, Err(ToolError::TimedOut { after, .. }) if after < TOOL_TIMEOUT));
    let source = SourceName::new("x").expect("valid source name");
    assert_eq!(harness.registry.slow_marks(&source), 0);
}

#[rstest]
#[tokio::test]
async fn cancelled_request_does_not_run_tools() {
    let harness = Harness::in_memory();
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);
    let ctx = context(ToolPolicy::read_only());
    ctx.cancellation().cancel();

    let result = harness.call("search", &ctx).await;

    assert_eq!(result, Err(ToolError::Cancelled("x:search".to_owned())));
    assert_eq!(harness.calls("search"), 0);
}

#[rstest]
#[tokio::test]
async fn offline_source_reports_unavailable() {
    let harness = Harness::in_memory();
    harness.offer("search", SideEffectClass::ReadOnly, ToolBehaviour::Echo);
    harness.source.set_offline(true);

    let result = harness.call("search", &context(ToolPolicy::read_only())).await;

    assert!(matches!(result, Err(ToolError::SourceUnavailable { .. })));
}

#[rstest]
#[tokio::test]
async fn internal_tools_run_in_process() {
    let harness = Harness::in_memory();
    let descriptor = harness
        .registry
        .register_internal(Arc::new(StaticTool::new("version", json!("1.0"))));

    let output = harness
        .executor
        .invoke(&descriptor, Value::Null, &context(ToolPolicy::read_only()))
        .await
        .expect("internal tool runs");

    assert_eq!(output.tool.to_string(), "builtin:version");
    assert_eq!(output.value, json!("1.0"));
}

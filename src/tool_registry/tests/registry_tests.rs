//! Unit tests for namespace registration, resolution and snapshots.

use super::support::{StaticTool, spec};
use crate::test_support::ManualClock;
use crate::tool_registry::{
    adapters::InMemoryToolSource,
    domain::{
        Availability, QualifiedToolName, SideEffectClass, SourceKind, SourceName, ToolError,
        ToolSpec,
    },
    services::{ToolRegistry, ToolRegistryError},
};
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use rstest::{fixture, rstest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    clock: Arc<ManualClock>,
    registry: ToolRegistry<ManualClock>,
}

impl Harness {
    fn connect(&self, source: &str, tools: &[&str]) -> SourceName {
        let name = SourceName::new(source).expect("valid source name");
        self.registry
            .connect_source(name.clone(), Arc::new(InMemoryToolSource::new()))
            .expect("source connects");
        self.publish(&name, tools);
        name
    }

    fn publish(&self, source: &SourceName, tools: &[&str]) {
        self.registry
            .register(source, specs(tools))
            .expect("snapshot registers");
    }

    fn tick(&self) {
        self.clock.advance(Duration::from_secs(1));
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new());
    Harness {
        registry: ToolRegistry::new(Arc::clone(&clock)),
        clock,
    }
}

fn specs(tools: &[&str]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|tool| spec(tool, SideEffectClass::ReadOnly))
        .collect()
}

fn qualified(value: &str) -> QualifiedToolName {
    QualifiedToolName::parse(value).expect("valid qualified name")
}

#[rstest]
fn internal_tool_wins_over_external_bare_name(harness: Harness) {
    harness.connect("x", &["search"]);
    harness.tick();
    let internal = harness
        .registry
        .register_internal(Arc::new(StaticTool::new("search", json!("internal"))));
    assert_eq!(internal.source_kind(), SourceKind::Internal);

    let bare = harness.registry.resolve("search").expect("bare resolves");
    assert_eq!(bare.qualified_name(), &qualified("builtin:search"));

    let explicit = harness.registry.resolve("x:search").expect("qualified resolves");
    assert_eq!(explicit.qualified_name(), &qualified("x:search"));
    assert_eq!(explicit.source_kind(), SourceKind::External);
}

#[rstest]
fn most_recently_discovered_source_wins(harness: Harness) {
    harness.connect("older", &["search"]);
    harness.tick();
    harness.connect("newer", &["search"]);

    let resolved = harness.registry.resolve("search").expect("resolves");

    assert_eq!(resolved.source().as_str(), "newer");
}

#[rstest]
fn same_tick_discovery_is_ambiguous(harness: Harness) {
    harness.connect("alpha", &["search"]);
    harness.connect("beta", &["search"]);

    let error = harness.registry.resolve("search").expect_err("tie");

    assert_eq!(
        error,
        ToolError::Ambiguous {
            name: "search".to_owned(),
            candidates: vec!["alpha:search".to_owned(), "beta:search".to_owned()],
        }
    );
}

#[rstest]
fn back_to_back_discovery_on_the_system_clock_is_ambiguous() {
    let registry = ToolRegistry::new(Arc::new(DefaultClock));
    for source in ["x", "y"] {
        let name = SourceName::new(source).expect("valid source name");
        registry
            .connect_source(name.clone(), Arc::new(InMemoryToolSource::new()))
            .expect("source connects");
        registry
            .register(&name, specs(&["search"]))
            .expect("snapshot registers");
    }

    let error = registry.resolve("search").expect_err("same tick");

    assert!(matches!(error, ToolError::Ambiguous { candidates, .. } if candidates.len() == 2));
}

#[rstest]
#[case::inside_window(Duration::from_millis(100), None)]
#[case::outside_window(Duration::from_secs(1), Some("newer"))]
fn discovery_window_decides_recency_ties(
    harness: Harness,
    #[case] gap: Duration,
    #[case] expected: Option<&str>,
) {
    harness.connect("older", &["search"]);
    harness.clock.advance(gap);
    harness.connect("newer", &["search"]);

    let resolved = harness.registry.resolve("search");

    match expected {
        Some(source) => {
            assert_eq!(resolved.expect("resolves").source().as_str(), source);
        }
        None => assert!(matches!(resolved, Err(ToolError::Ambiguous { .. }))),
    }
}

#[rstest]
fn slow_marks_break_discovery_ties(harness: Harness) {
    let alpha = harness.connect("alpha", &["search"]);
    harness.connect("beta", &["search"]);
    harness.registry.mark_slow(&alpha);

    let resolved = harness.registry.resolve("search").expect("resolves");

    assert_eq!(resolved.source().as_str(), "beta");
    assert_eq!(harness.registry.slow_marks(&alpha), 1);
}

#[rstest]
#[case("nothing")]
#[case("x:nothing")]
#[case("bad name")]
fn unmatched_names_are_not_found(harness: Harness, #[case] name: &str) {
    harness.connect("x", &["search"]);
    assert!(matches!(
        harness.registry.resolve(name),
        Err(ToolError::NotFound(_))
    ));
}

#[rstest]
fn snapshots_withdraw_then_remove_missing_tools(harness: Harness) {
    let source = harness.connect("docs", &["read", "search"]);

    let second = harness
        .registry
        .register(&source, specs(&["read"]))
        .expect("second snapshot");
    assert_eq!(second.retained, vec![qualified("docs:read")]);
    assert_eq!(second.withdrawn, vec![qualified("docs:search")]);
    let withdrawn = harness.registry.resolve("docs:search").expect("still listed");
    assert_eq!(withdrawn.availability(), Availability::Withdrawn);

    let third = harness
        .registry
        .register(&source, specs(&["read"]))
        .expect("third snapshot");
    assert_eq!(third.removed, vec![qualified("docs:search")]);
    assert!(matches!(
        harness.registry.resolve("docs:search"),
        Err(ToolError::NotFound(_))
    ));
}

#[rstest]
fn rediscovered_tool_is_added_again(harness: Harness) {
    let source = harness.connect("docs", &["read", "search"]);
    harness.publish(&source, &["read"]);
    harness.tick();

    let diff = harness
        .registry
        .register(&source, specs(&["read", "search"]))
        .expect("snapshot");

    assert_eq!(diff.added, vec![qualified("docs:search")]);
    let search = harness.registry.resolve("docs:search").expect("listed");
    assert!(search.is_available());
    assert_eq!(search.discovered_at(), harness.now());
}

#[rstest]
fn empty_snapshot_withdraws_everything(harness: Harness) {
    let source = harness.connect("docs", &["read"]);

    let diff = harness
        .registry
        .register(&source, Vec::new())
        .expect("empty snapshot is valid");

    assert_eq!(diff.withdrawn, vec![qualified("docs:read")]);
}

#[rstest]
fn available_tools_are_preferred_over_disconnected_ones(harness: Harness) {
    harness.connect("stable", &["search"]);
    harness.tick();
    let flaky = harness.connect("flaky", &["search"]);

    let affected = harness
        .registry
        .disconnect_source(&flaky)
        .expect("disconnects");
    assert_eq!(affected, 1);
    assert!(!harness.registry.is_connected(&flaky));
    let fallback = harness.registry.resolve("search").expect("resolves");
    assert_eq!(fallback.source().as_str(), "stable");

    harness
        .registry
        .connect_source(flaky, Arc::new(InMemoryToolSource::new()))
        .expect("reconnects");
    let restored = harness.registry.resolve("search").expect("resolves");
    assert_eq!(restored.source().as_str(), "flaky");
}

#[rstest]
fn binding_refuses_unavailable_tools(harness: Harness) {
    let source = harness.connect("docs", &["read"]);
    harness
        .registry
        .disconnect_source(&source)
        .expect("disconnects");

    let result = harness.registry.binding(&qualified("docs:read"));

    assert!(matches!(result, Err(ToolError::SourceUnavailable { .. })));
}

#[rstest]
fn write_operations_validate_the_source(harness: Harness) {
    let unknown = SourceName::new("ghost").expect("valid");
    assert_eq!(
        harness.registry.register(&unknown, Vec::new()),
        Err(ToolRegistryError::UnknownSource(unknown.clone()))
    );
    assert_eq!(
        harness.registry.register(&SourceName::internal(), Vec::new()),
        Err(ToolRegistryError::ReservedSource(SourceName::internal()))
    );

    let source = harness.connect("docs", &[]);
    assert!(matches!(
        harness.registry.register(&source, specs(&["read", "read"])),
        Err(ToolRegistryError::DuplicateTool { .. })
    ));

    harness
        .registry
        .disconnect_source(&source)
        .expect("disconnects");
    assert_eq!(
        harness.registry.register(&source, specs(&["read"])),
        Err(ToolRegistryError::SourceDisconnected(source.clone()))
    );
}

#[rstest]
fn unregister_drops_the_source_and_its_tools(harness: Harness) {
    let source = harness.connect("docs", &["read", "search"]);

    let removed = harness.registry.unregister(&source).expect("unregisters");

    assert_eq!(removed, vec![qualified("docs:read"), qualified("docs:search")]);
    assert!(harness.registry.list().is_empty());
    assert_eq!(
        harness.registry.unregister(&source),
        Err(ToolRegistryError::UnknownSource(source.clone()))
    );
}

#[rstest]
fn listings_are_pinned_to_their_snapshot(harness: Harness) {
    harness.connect("docs", &["read"]);
    let listing = harness.registry.list();

    harness.connect("web", &["fetch", "search"]);

    let first: Vec<String> = listing
        .iter()
        .map(|tool| tool.qualified_name().to_string())
        .collect();
    let second: Vec<String> = (&listing)
        .into_iter()
        .map(|tool| tool.qualified_name().to_string())
        .collect();
    assert_eq!(first, vec!["docs:read".to_owned()]);
    assert_eq!(first, second);
    assert_eq!(harness.registry.list().len(), 3);
}

#[rstest]
fn disconnect_all_leaves_internal_tools_usable(harness: Harness) {
    let docs = harness.connect("docs", &["read"]);
    let descriptor = harness
        .registry
        .register_internal(Arc::new(StaticTool::new("clock", json!("now"))));

    harness.registry.disconnect_all();

    assert!(!harness.registry.is_connected(&docs));
    assert!(harness.registry.is_connected(&SourceName::internal()));
    assert!(harness.registry.binding(descriptor.qualified_name()).is_ok());
}

//! Shared world state for switchboard BDD scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{WrapErr, eyre};
use mockable::DefaultClock;
use rstest::fixture;
use serde_json::json;
use switchboard::{
    backend::{
        adapters::{ScriptStep, ScriptedBackend},
        domain::{
            BackendCapabilities, BackendDescriptor, BackendKind, BackendName, GenerationResponse,
        },
        services::OrchestratorResult,
    },
    config::SwitchboardConfig,
    execution::{ExecutionContext, FallbackPolicy, SessionId, ToolPolicy, UserId},
    runtime::Switchboard,
    streaming::{
        adapters::ConsumerStream,
        domain::{StreamEvent, StreamSessionId},
    },
    tool_registry::{
        adapters::{InMemoryToolSource, ToolBehaviour},
        domain::{SideEffectClass, SourceName, ToolError, ToolOutput, ToolSpec},
    },
};
use tokio_util::sync::CancellationToken;

/// Backend every scenario request prefers.
pub const PREFERRED: &str = "primary";
/// Backend listed second in every scenario request.
pub const FALLBACK: &str = "secondary";

/// Scenario world wrapping a fully wired switchboard.
pub struct SwitchboardWorld {
    /// The switchboard under test.
    pub switchboard: Switchboard<DefaultClock>,
    /// Scripted backends by name.
    pub backends: BTreeMap<BackendName, Arc<ScriptedBackend>>,
    /// External tool sources by name.
    pub sources: BTreeMap<SourceName, InMemoryToolSource>,
    /// Results of served generation requests, in order.
    pub responses: Vec<OrchestratorResult<GenerationResponse>>,
    /// Results of tool calls, in order.
    pub tool_results: Vec<Result<ToolOutput, ToolError>>,
    /// Session driven directly through the stream channel manager.
    pub session: Option<StreamSessionId>,
    /// Cancellation token handed to the session producer.
    pub producer: CancellationToken,
    /// Consumers attached to the session.
    pub consumers: Vec<ConsumerStream>,
    /// Events the caller of a streamed request received.
    pub caller_events: Vec<StreamEvent>,
    /// Events each consumer has read so far, by consumer position.
    pub received: Vec<Vec<StreamEvent>>,
}

impl SwitchboardWorld {
    /// Creates a world around a switchboard with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the default configuration is rejected.
    #[must_use]
    pub fn new() -> Self {
        let switchboard = Switchboard::new(SwitchboardConfig::default(), Arc::new(DefaultClock))
            .expect("default configuration should be accepted");
        Self {
            switchboard,
            backends: BTreeMap::new(),
            sources: BTreeMap::new(),
            responses: Vec::new(),
            tool_results: Vec::new(),
            session: None,
            producer: CancellationToken::new(),
            consumers: Vec::new(),
            caller_events: Vec::new(),
            received: Vec::new(),
        }
    }

    /// Replaces the switchboard with one built from `config`.
    pub fn reconfigure(&mut self, config: SwitchboardConfig) -> Result<(), eyre::Report> {
        self.switchboard =
            Switchboard::new(config, Arc::new(DefaultClock)).wrap_err("build switchboard")?;
        Ok(())
    }

    /// Moves every queued event of the first `count` consumers into
    /// [`Self::received`].
    pub fn read_consumers(&mut self, count: usize) {
        self.received.resize_with(self.consumers.len(), Vec::new);
        for (consumer, events) in self
            .consumers
            .iter_mut()
            .zip(self.received.iter_mut())
            .take(count)
        {
            let delivered = std::iter::from_fn(|| consumer.try_recv());
            events.extend(delivered.map(|delivery| delivery.event));
        }
    }

    /// Builds a request context preferring [`PREFERRED`] over [`FALLBACK`]
    /// and allowing mutating tools.
    pub fn context(&self) -> Result<ExecutionContext, eyre::Report> {
        let fallback = FallbackPolicy::new([backend_name(PREFERRED)?, backend_name(FALLBACK)?]);
        Ok(self
            .switchboard
            .context(SessionId::new("scenario"), UserId::new("tester"))
            .fallback_policy(fallback)
            .tool_policy(ToolPolicy::allow_mutating())
            .build())
    }

    /// Registers a scripted backend that repeats `step`.
    pub fn add_backend(&mut self, value: &str, step: ScriptStep) -> Result<(), eyre::Report> {
        let name = backend_name(value)?;
        let descriptor = BackendDescriptor::new(
            name.clone(),
            BackendKind::HostedApi,
            BackendCapabilities::full(),
            "scenario-model",
        )
        .wrap_err("build backend descriptor")?;
        let adapter = Arc::new(ScriptedBackend::new(descriptor, step));
        self.switchboard
            .register_backend(Arc::clone(&adapter) as _)
            .wrap_err("register backend")?;
        self.backends.insert(name, adapter);
        Ok(())
    }

    /// Returns a registered backend.
    pub fn backend(&self, value: &str) -> Result<&Arc<ScriptedBackend>, eyre::Report> {
        self.backends
            .get(&backend_name(value)?)
            .ok_or_else(|| eyre!("backend '{value}' is not registered"))
    }

    /// Offers a tool from an external source, connecting the source on
    /// first use, and publishes the source's catalog.
    pub fn offer_tool(
        &mut self,
        source: &str,
        tool: &str,
        side_effect: SideEffectClass,
    ) -> Result<(), eyre::Report> {
        let name = SourceName::new(source).wrap_err("source name")?;
        if !self.sources.contains_key(&name) {
            let connected = InMemoryToolSource::new();
            self.switchboard
                .tools()
                .connect_source(name.clone(), Arc::new(connected.clone()))
                .wrap_err("connect source")?;
            self.sources.insert(name.clone(), connected);
        }
        let handle = self.source(source)?;
        handle.offer(tool_spec(tool, side_effect)?, ToolBehaviour::Echo);
        let snapshot = handle.snapshot();
        self.switchboard
            .tools()
            .register(&name, snapshot)
            .wrap_err("publish source catalog")?;
        Ok(())
    }

    /// Returns a connected external source.
    pub fn source(&self, value: &str) -> Result<&InMemoryToolSource, eyre::Report> {
        let name = SourceName::new(value).wrap_err("source name")?;
        self.sources
            .get(&name)
            .ok_or_else(|| eyre!("source '{value}' is not connected"))
    }
}

impl Default for SwitchboardWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> SwitchboardWorld {
    SwitchboardWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// Parses a backend name.
pub fn backend_name(value: &str) -> Result<BackendName, eyre::Report> {
    BackendName::new(value).wrap_err("backend name")
}

/// Builds a tool spec taking an optional string `q`.
pub fn tool_spec(name: &str, side_effect: SideEffectClass) -> Result<ToolSpec, eyre::Report> {
    ToolSpec::new(
        name,
        format!("scenario {name} tool"),
        &json!({
            "type": "object",
            "properties": {"q": {"type": "string"}},
        }),
        side_effect,
    )
    .wrap_err("tool spec")
}

/// Returns the payload of chunk `index` as pushed by scenario producers.
#[must_use]
pub fn chunk_data(index: usize) -> String {
    format!("chunk-{index}")
}

/// Checks that `events` holds `count` chunks in order followed by `last`.
pub fn expect_chunks_then(
    events: &[StreamEvent],
    count: usize,
    last: &StreamEvent,
) -> Result<(), eyre::Report> {
    let (terminal, chunks) = events
        .split_last()
        .ok_or_else(|| eyre!("no events were delivered"))?;
    if chunks.len() != count {
        return Err(eyre!("expected {count} chunks, got {chunks:?}"));
    }
    for (index, event) in chunks.iter().enumerate() {
        let StreamEvent::Chunk { data, sequence, .. } = event else {
            return Err(eyre!("expected a chunk at position {index}, got {event:?}"));
        };
        if *data != chunk_data(index) || usize::try_from(*sequence).ok() != Some(index) {
            return Err(eyre!("chunk {index} out of order: {event:?}"));
        }
    }
    if terminal != last {
        return Err(eyre!("expected {last:?} last, got {terminal:?}"));
    }
    Ok(())
}

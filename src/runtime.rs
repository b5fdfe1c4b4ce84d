//! Explicitly constructed owner of every switchboard component.

use crate::backend::{
    domain::{GenerationRequest, GenerationResponse},
    ports::BackendAdapter,
    services::{HealthTracker, OrchestratorResult, ProviderOrchestrator, StreamHandle},
};
use crate::config::{ConfigError, SwitchboardConfig};
use crate::execution::{ExecutionContext, ExecutionContextBuilder, SessionId, UserId};
use crate::streaming::{
    adapters::ConsumerStream,
    domain::{ConnectionId, RoomName},
    services::StreamChannelManager,
};
use crate::tool_registry::{
    adapters::InMemoryToolResultCache,
    domain::{ToolError, ToolOutput},
    ports::ToolResultCache,
    services::{ToolExecutor, ToolRegistry},
};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The provider orchestration layer, wired together.
///
/// A switchboard is created once by the embedding application and passed by
/// reference to whatever serves requests. [`Switchboard::shutdown`] tears it
/// down: in-flight requests are cancelled, open stream sessions are
/// cancelled, and external tool sources are disconnected.
pub struct Switchboard<C>
where
    C: Clock + Send + Sync + 'static,
{
    config: SwitchboardConfig,
    root: CancellationToken,
    registry: Arc<ToolRegistry<C>>,
    executor: Arc<ToolExecutor<C>>,
    streams: Arc<StreamChannelManager<C>>,
    orchestrator: ProviderOrchestrator<C>,
}

impl<C> Switchboard<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Builds a switchboard with an in-memory tool result cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is unusable.
    pub fn new(config: SwitchboardConfig, clock: Arc<C>) -> Result<Self, ConfigError> {
        let cache = Arc::new(InMemoryToolResultCache::new(
            config.cache_ttl,
            config.cache_capacity,
        ));
        Self::with_cache(config, clock, cache)
    }

    /// Builds a switchboard around an existing tool result cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is unusable.
    pub fn with_cache(
        config: SwitchboardConfig,
        clock: Arc<C>,
        cache: Arc<dyn ToolResultCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let health = Arc::new(HealthTracker::new(
            config.health_policy(),
            Arc::clone(&clock),
        ));
        let registry = Arc::new(
            ToolRegistry::new(Arc::clone(&clock)).with_discovery_window(config.discovery_window),
        );
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&registry),
            cache,
            Arc::clone(&clock),
            config.tool_timeout,
        ));
        let streams = Arc::new(StreamChannelManager::new(
            config.queue_policy(),
            Arc::clone(&clock),
        ));
        let orchestrator = ProviderOrchestrator::new(
            health,
            Arc::clone(&executor),
            Arc::clone(&streams),
            clock,
        )
        .with_default_timeout(config.backend_timeout);
        tracing::info!(
            failure_threshold = config.failure_threshold,
            queue_capacity = config.queue_capacity,
            "switchboard initialised"
        );
        Ok(Self {
            config,
            root: CancellationToken::new(),
            registry,
            executor,
            streams,
            orchestrator,
        })
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SwitchboardConfig {
        &self.config
    }

    /// Returns the provider orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &ProviderOrchestrator<C> {
        &self.orchestrator
    }

    /// Returns the backend health tracker.
    #[must_use]
    pub const fn health(&self) -> &Arc<HealthTracker<C>> {
        self.orchestrator.health()
    }

    /// Returns the tool registry.
    #[must_use]
    pub const fn tools(&self) -> &Arc<ToolRegistry<C>> {
        &self.registry
    }

    /// Returns the tool executor.
    #[must_use]
    pub const fn executor(&self) -> &Arc<ToolExecutor<C>> {
        &self.executor
    }

    /// Returns the stream channel manager.
    #[must_use]
    pub const fn streams(&self) -> &Arc<StreamChannelManager<C>> {
        &self.streams
    }

    /// Registers a backend adapter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::backend::services::OrchestratorError::Configuration`]
    /// for a duplicate backend name.
    pub fn register_backend(&self, adapter: Arc<dyn BackendAdapter>) -> OrchestratorResult<()> {
        self.orchestrator.register(adapter)
    }

    /// Starts a request context whose cancellation follows the switchboard
    /// lifetime.
    #[must_use]
    pub fn context(&self, session_id: SessionId, user_id: UserId) -> ExecutionContextBuilder {
        ExecutionContext::builder(session_id, user_id).cancellation(self.root.child_token())
    }

    /// Serves a one-shot generation request.
    ///
    /// # Errors
    ///
    /// See [`ProviderOrchestrator::execute`].
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<GenerationResponse> {
        self.orchestrator.execute(request, context).await
    }

    /// Serves a streaming generation request.
    ///
    /// # Errors
    ///
    /// See [`ProviderOrchestrator::execute_stream`].
    pub async fn stream(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<StreamHandle> {
        self.orchestrator.execute_stream(request, context).await
    }

    /// Resolves and invokes a tool outside of a generation turn.
    ///
    /// # Errors
    ///
    /// See [`ToolExecutor::call`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        self.executor.call(name, arguments, context).await
    }

    /// Registers a client connection and returns its delivery queue.
    #[must_use]
    pub fn connect(&self, connection: ConnectionId) -> ConsumerStream {
        self.streams.connect(connection)
    }

    /// Forgets a client connection.
    #[must_use]
    pub fn disconnect(&self, connection: &ConnectionId) -> bool {
        self.streams.disconnect(connection)
    }

    /// Adds a connection to a room.
    #[must_use]
    pub fn join_room(&self, connection: ConnectionId, room: RoomName) -> bool {
        self.streams.join_room(connection, room)
    }

    /// Removes a connection from a room.
    #[must_use]
    pub fn leave_room(&self, connection: &ConnectionId, room: &RoomName) -> bool {
        self.streams.leave_room(connection, room)
    }

    /// Sends a payload to every member of a room.
    #[must_use]
    pub fn broadcast_to_room(&self, room: &RoomName, payload: &Value) -> usize {
        self.streams.broadcast_to_room(room, payload)
    }

    /// Sends a payload to every connection.
    #[must_use]
    pub fn broadcast(&self, payload: &Value) -> usize {
        self.streams.broadcast(payload)
    }

    /// Returns whether [`Self::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Tears the switchboard down. Idempotent.
    pub fn shutdown(&self) {
        if self.root.is_cancelled() {
            return;
        }
        self.root.cancel();
        self.streams.cancel_all("switchboard shutting down");
        self.registry.disconnect_all();
        tracing::info!("switchboard shut down");
    }
}

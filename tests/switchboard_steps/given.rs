//! Given steps for switchboard BDD scenarios.

use super::world::{FALLBACK, PREFERRED, SwitchboardWorld, chunk_data, tool_spec};
use async_trait::async_trait;
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::given;
use serde_json::{Value, json};
use std::sync::Arc;
use switchboard::{
    backend::{
        adapters::ScriptStep,
        domain::{BackendError, FatalKind, RetryableKind},
    },
    config::SwitchboardConfig,
    execution::ExecutionContext,
    streaming::{
        domain::{ConnectionId, RoomName},
        services::ProducerHandle,
    },
    tool_registry::{
        domain::{SideEffectClass, ToolArguments, ToolSpec},
        ports::{ToolHandler, ToolInvocationResult},
    },
};

/// Compiled-in tool answering with a fixed marker.
struct LookupTool {
    spec: ToolSpec,
}

#[async_trait]
impl ToolHandler for LookupTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(
        &self,
        _arguments: &ToolArguments,
        _context: &ExecutionContext,
    ) -> ToolInvocationResult<Value> {
        Ok(json!({"served_by": "builtin"}))
    }
}

// ============================================================================
// Backends
// ============================================================================

#[given("a preferred backend that always times out")]
fn preferred_times_out(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.add_backend(
        PREFERRED,
        ScriptStep::Fail(BackendError::timeout("no answer within the deadline")),
    )
}

#[given("a preferred backend that rejects its credentials")]
fn preferred_rejects_credentials(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.add_backend(
        PREFERRED,
        ScriptStep::Fail(BackendError::fatal(
            FatalKind::Authentication,
            "api key rejected",
        )),
    )
}

#[given("a preferred backend that streams {count:usize} chunks")]
fn preferred_streams(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let chunks = (0..count).map(chunk_data).collect();
    world.add_backend(PREFERRED, ScriptStep::Chunks(chunks))
}

#[given("a fallback backend that replies normally")]
fn fallback_replies(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.add_backend(
        FALLBACK,
        ScriptStep::Chunks(vec!["served by the fallback".to_owned()]),
    )
}

#[given("a fallback backend that is rate limited")]
fn fallback_rate_limited(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.add_backend(
        FALLBACK,
        ScriptStep::Fail(BackendError::retryable(
            RetryableKind::RateLimited,
            "slow down",
        )),
    )
}

// ============================================================================
// Tools
// ============================================================================

#[given("an internal lookup tool")]
fn internal_lookup_tool(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    let handler = LookupTool {
        spec: tool_spec("lookup", SideEffectClass::ReadOnly)?,
    };
    let descriptor = world.switchboard.tools().register_internal(Arc::new(handler));
    if !descriptor.qualified_name().source().is_internal() {
        return Err(eyre!("internal tool registered under {descriptor:?}"));
    }
    Ok(())
}

#[given("an external docs source offering a read-only lookup tool")]
fn docs_lookup_tool(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.offer_tool("docs", "lookup", SideEffectClass::ReadOnly)
}

#[given("an external docs source offering a read-only search tool")]
fn docs_search_tool(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.offer_tool("docs", "search", SideEffectClass::ReadOnly)
}

#[given("an external files source offering a mutating write tool")]
fn files_write_tool(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world.offer_tool("files", "write", SideEffectClass::Mutating)
}

// ============================================================================
// Streams
// ============================================================================

#[given("an open stream session with {count:usize} consumers")]
fn open_session(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let streams = world.switchboard.streams();
    let session = streams.open(ProducerHandle::new("scenario", world.producer.clone()));
    for _ in 0..count {
        let consumer = streams.attach(session).wrap_err("attach consumer")?;
        world.consumers.push(consumer);
    }
    world.session = Some(session);
    Ok(())
}

#[given("a switchboard whose consumer queues hold {capacity:usize} deliveries")]
fn small_queues(world: &mut SwitchboardWorld, capacity: usize) -> Result<(), eyre::Report> {
    world.reconfigure(SwitchboardConfig {
        queue_capacity: capacity,
        queue_overflow: 0,
        ..SwitchboardConfig::default()
    })
}

#[given("an open stream session subscribed by {count:usize} lobby members")]
fn lobby_session(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let lobby = RoomName::new("lobby").wrap_err("room name")?;
    for index in 0..count {
        let member = ConnectionId::new(format!("member-{index}")).wrap_err("connection id")?;
        world.consumers.push(world.switchboard.connect(member.clone()));
        if !world.switchboard.join_room(member, lobby.clone()) {
            return Err(eyre!("member {index} was already in the lobby"));
        }
    }
    let streams = world.switchboard.streams();
    let session = streams.open(ProducerHandle::new("scenario", world.producer.clone()));
    let subscribed = streams
        .subscribe_room(session, &lobby)
        .wrap_err("subscribe lobby")?;
    if subscribed != count {
        return Err(eyre!("expected {count} subscriptions, made {subscribed}"));
    }
    world.session = Some(session);
    Ok(())
}

//! When steps for switchboard BDD scenarios.

use super::world::{SwitchboardWorld, chunk_data, run_async};
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::when;
use serde_json::json;
use std::time::Duration;
use switchboard::backend::domain::GenerationRequest;
use switchboard::streaming::domain::StreamSessionId;

fn session(world: &SwitchboardWorld) -> Result<StreamSessionId, eyre::Report> {
    world.session.ok_or_else(|| eyre!("no stream session was opened"))
}

fn call_tool(world: &mut SwitchboardWorld, name: &str) -> Result<(), eyre::Report> {
    let context = world.context()?;
    let result = run_async(
        world
            .switchboard
            .call_tool(name, json!({"q": "rust ownership"}), &context),
    );
    world.tool_results.push(result);
    Ok(())
}

// ============================================================================
// Requests
// ============================================================================

#[when("{count:usize} requests are served")]
fn serve_requests(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let context = world.context()?;
    let request = GenerationRequest::text("summarise the incident report");
    for _ in 0..count {
        let result = run_async(world.switchboard.generate(&request, &context));
        world.responses.push(result);
    }
    Ok(())
}

#[when("a streamed request is served")]
fn serve_streamed_request(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    let context = world.context()?;
    let request = GenerationRequest::text("stream the incident report");
    let mut handle = run_async(world.switchboard.stream(&request, &context))
        .map_err(|err| eyre!("stream set-up failed: {err}"))?;
    let events = run_async(tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = Vec::new();
        while let Some(delivery) = handle.events.recv().await {
            received.push(delivery.event);
        }
        received
    }))
    .wrap_err("stream did not finish")?;
    world.caller_events = events;
    Ok(())
}

// ============================================================================
// Tools
// ============================================================================

#[when("the bare lookup tool is called")]
fn call_bare_lookup(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    call_tool(world, "lookup")
}

#[when("the docs-qualified lookup tool is called")]
fn call_qualified_lookup(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    call_tool(world, "docs:lookup")
}

#[when("the write tool is called {count:usize} times with identical arguments")]
fn call_write_repeatedly(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    for _ in 0..count {
        call_tool(world, "write")?;
    }
    Ok(())
}

#[when("the search tool is called {count:usize} times with identical arguments")]
fn call_search_repeatedly(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    for _ in 0..count {
        call_tool(world, "search")?;
    }
    Ok(())
}

// ============================================================================
// Streams
// ============================================================================

#[when("the producer pushes {count:usize} chunks and completes")]
fn push_and_complete(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    push_chunks(world, count)?;
    world
        .switchboard
        .streams()
        .complete(session(world)?)
        .wrap_err("complete session")?;
    Ok(())
}

#[when("the producer has pushed {count:usize} chunks")]
fn push_chunks(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let target = session(world)?;
    for index in 0..count {
        world
            .switchboard
            .streams()
            .push(target, chunk_data(index))
            .wrap_err("push chunk")?;
    }
    Ok(())
}

#[when("the session owner cancels the session")]
fn cancel_session(world: &mut SwitchboardWorld) -> Result<(), eyre::Report> {
    world
        .switchboard
        .streams()
        .cancel(session(world)?, "owner aborted")
        .wrap_err("cancel session")
}

#[when("{count:usize} chunks are pushed and completed while {readers:usize} members keep up")]
fn push_with_readers(
    world: &mut SwitchboardWorld,
    count: usize,
    readers: usize,
) -> Result<(), eyre::Report> {
    let target = session(world)?;
    for index in 0..count {
        world
            .switchboard
            .streams()
            .push(target, chunk_data(index))
            .wrap_err("push chunk")?;
        world.read_consumers(readers);
    }
    world
        .switchboard
        .streams()
        .complete(target)
        .wrap_err("complete session")?;
    world.read_consumers(world.consumers.len());
    Ok(())
}

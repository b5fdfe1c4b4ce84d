//! Then steps for switchboard BDD scenarios.

use super::world::{FALLBACK, PREFERRED, SwitchboardWorld, backend_name, expect_chunks_then};
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::then;
use switchboard::{
    backend::{
        domain::{AttemptOutcome, CircuitState, GenerationResponse, SkipReason},
        services::{OrchestratorError, OrchestratorResult},
    },
    streaming::{
        adapters::ConsumerStream,
        domain::{StreamError, StreamEvent},
    },
    tool_registry::domain::{ToolName, ToolOutput},
};

// ============================================================================
// Helper Functions
// ============================================================================

/// Assert a condition, returning an error with the given message if false.
fn assert_that(condition: bool, message: impl Into<String>) -> Result<(), eyre::Report> {
    if condition {
        Ok(())
    } else {
        Err(eyre!(message.into()))
    }
}

fn last_response(
    world: &SwitchboardWorld,
) -> Result<&OrchestratorResult<GenerationResponse>, eyre::Report> {
    world
        .responses
        .last()
        .ok_or_else(|| eyre!("no request was served"))
}

/// Returns the successful output of the 1-based tool call `index`.
fn tool_output(world: &SwitchboardWorld, index: usize) -> Result<&ToolOutput, eyre::Report> {
    let result = world
        .tool_results
        .get(index.saturating_sub(1))
        .ok_or_else(|| eyre!("tool call {index} was not made"))?;
    result
        .as_ref()
        .map_err(|err| eyre!("tool call {index} failed: {err}"))
}

fn source_calls(world: &SwitchboardWorld, source: &str, tool: &str) -> Result<u32, eyre::Report> {
    let name = ToolName::new(tool).wrap_err("tool name")?;
    Ok(world.source(source)?.calls(&name))
}

fn drain(consumer: &mut ConsumerStream) -> Vec<StreamEvent> {
    std::iter::from_fn(|| consumer.try_recv())
        .map(|delivery| delivery.event)
        .collect()
}

fn every_consumer_received(
    world: &mut SwitchboardWorld,
    count: usize,
    last: &StreamEvent,
) -> Result<(), eyre::Report> {
    assert_that(!world.consumers.is_empty(), "no consumers were attached")?;
    for consumer in &mut world.consumers {
        expect_chunks_then(&drain(consumer), count, last)?;
    }
    Ok(())
}

// ============================================================================
// Backends
// ============================================================================

#[then("every request was served by the fallback backend")]
fn served_by_fallback(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    let expected = backend_name(FALLBACK)?;
    assert_that(!world.responses.is_empty(), "no request was served")?;
    for result in &world.responses {
        let response = result
            .as_ref()
            .map_err(|err| eyre!("request failed: {err}"))?;
        assert_that(
            response.chosen_backend == expected,
            format!("served by {}", response.chosen_backend),
        )?;
    }
    Ok(())
}

#[then("the preferred backend circuit is open")]
fn preferred_circuit_open(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    let circuit = world.switchboard.health().circuit(&backend_name(PREFERRED)?);
    assert_that(
        circuit == CircuitState::Open,
        format!("expected an open circuit, found {circuit}"),
    )
}

#[then("the last attempt log starts by skipping the preferred backend")]
fn attempt_log_skips_preferred(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    let response = last_response(world)?
        .as_ref()
        .map_err(|err| eyre!("request failed: {err}"))?;
    let first = response
        .attempts
        .first()
        .ok_or_else(|| eyre!("attempt log is empty"))?;
    assert_that(
        first.backend == backend_name(PREFERRED)?
            && first.outcome == AttemptOutcome::Skipped(SkipReason::CircuitOpen),
        format!("unexpected first attempt: {first:?}"),
    )
}

#[then("the preferred backend was called {count:usize} times")]
fn preferred_calls(world: &SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let calls = world.backend(PREFERRED)?.calls();
    assert_that(calls == count, format!("expected {count} calls, got {calls}"))
}

#[then("the fallback backend was called {count:usize} times")]
fn fallback_calls(world: &SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let calls = world.backend(FALLBACK)?.calls();
    assert_that(calls == count, format!("expected {count} calls, got {calls}"))
}

#[then("the last request failed without fallback")]
fn failed_without_fallback(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    match last_response(world)? {
        Err(OrchestratorError::Fatal {
            backend, attempts, ..
        }) => assert_that(
            *backend == backend_name(PREFERRED)? && attempts.len() == 1,
            format!("unexpected fatal failure of {backend}: {attempts:?}"),
        ),
        other => Err(eyre!("expected a fatal failure, got {other:?}")),
    }
}

#[then("the last request exhausted {count:usize} candidates")]
fn exhausted_candidates(world: &SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    match last_response(world)? {
        Err(OrchestratorError::Exhausted { attempts }) => assert_that(
            attempts.len() == count && attempts.iter().all(|record| record.is_failure()),
            format!("unexpected attempt log: {attempts:?}"),
        ),
        other => Err(eyre!("expected exhaustion, got {other:?}")),
    }
}

// ============================================================================
// Tools
// ============================================================================

#[then("call {index:usize} was served by the internal source")]
fn served_by_internal(world: &SwitchboardWorld, index: usize) -> Result<(), eyre::Report> {
    let output = tool_output(world, index)?;
    assert_that(
        output.tool.source().is_internal(),
        format!("call {index} was served by {}", output.tool),
    )
}

#[then("call {index:usize} was served by the docs source")]
fn served_by_docs(world: &SwitchboardWorld, index: usize) -> Result<(), eyre::Report> {
    let output = tool_output(world, index)?;
    assert_that(
        output.tool.source().as_str() == "docs",
        format!("call {index} was served by {}", output.tool),
    )
}

#[then("the docs source received {count:u32} lookup calls")]
fn docs_lookup_calls(world: &SwitchboardWorld, count: u32) -> Result<(), eyre::Report> {
    let calls = source_calls(world, "docs", "lookup")?;
    assert_that(calls == count, format!("expected {count} calls, got {calls}"))
}

#[then("the docs source received {count:u32} search calls")]
fn docs_search_calls(world: &SwitchboardWorld, count: u32) -> Result<(), eyre::Report> {
    let calls = source_calls(world, "docs", "search")?;
    assert_that(calls == count, format!("expected {count} calls, got {calls}"))
}

#[then("the files source received {count:u32} write calls")]
fn files_write_calls(world: &SwitchboardWorld, count: u32) -> Result<(), eyre::Report> {
    let calls = source_calls(world, "files", "write")?;
    assert_that(calls == count, format!("expected {count} calls, got {calls}"))
}

#[then("no tool result came from the cache")]
fn nothing_from_cache(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    for index in 1..=world.tool_results.len() {
        let output = tool_output(world, index)?;
        assert_that(
            !output.served_from_cache,
            format!("call {index} was served from the cache"),
        )?;
    }
    Ok(())
}

#[then("call {index:usize} came from the cache")]
fn came_from_cache(world: &SwitchboardWorld, index: usize) -> Result<(), eyre::Report> {
    let output = tool_output(world, index)?;
    assert_that(
        output.served_from_cache,
        format!("call {index} executed the tool"),
    )
}

// ============================================================================
// Streams
// ============================================================================

#[then("every consumer received {count:usize} chunks followed by completion")]
fn consumers_completed(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    every_consumer_received(world, count, &StreamEvent::Completed)
}

#[then("every consumer received {count:usize} chunks followed by one cancellation")]
fn consumers_cancelled(world: &mut SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    let cancelled = StreamEvent::Cancelled {
        reason: "owner aborted".to_owned(),
    };
    every_consumer_received(world, count, &cancelled)
}

#[then("the producer was told to stop")]
fn producer_stopped(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    assert_that(
        world.producer.is_cancelled(),
        "producer token was not cancelled",
    )
}

#[then("the caller received {count:usize} chunks followed by completion")]
fn caller_completed(world: &SwitchboardWorld, count: usize) -> Result<(), eyre::Report> {
    expect_chunks_then(&world.caller_events, count, &StreamEvent::Completed)
}

#[then("the first {count:usize} members received {chunks:usize} chunks followed by completion")]
fn first_members_completed(
    world: &SwitchboardWorld,
    count: usize,
    chunks: usize,
) -> Result<(), eyre::Report> {
    let members = world
        .received
        .get(..count)
        .ok_or_else(|| eyre!("fewer than {count} members were read"))?;
    for events in members {
        expect_chunks_then(events, chunks, &StreamEvent::Completed)?;
    }
    Ok(())
}

#[then("the last member was dropped as a slow consumer")]
fn last_member_dropped(world: &SwitchboardWorld) -> Result<(), eyre::Report> {
    let events = world
        .received
        .last()
        .ok_or_else(|| eyre!("no member was read"))?;
    let dropped = StreamEvent::Failed {
        error: StreamError::DroppedSlowConsumer,
    };
    assert_that(
        events.as_slice() == [dropped],
        format!("unexpected events for the slow member: {events:?}"),
    )
}

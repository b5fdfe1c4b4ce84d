//! Switchboard: provider orchestration and unified tool execution.
//!
//! This crate sits between client requests and a heterogeneous set of
//! external AI backends and tool sources. It selects a usable backend under
//! partial failure, executes tool calls served in-process or by discovered
//! sources, and exposes consistent streaming output regardless of which
//! backend served a request.
//!
//! # Architecture
//!
//! Switchboard follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports
//!
//! # Modules
//!
//! - [`execution`]: Request-scoped execution context and policies
//! - [`backend`]: Backend descriptors, health tracking and fallback
//! - [`tool_registry`]: Tool namespace, resolution and gated invocation
//! - [`streaming`]: Stream sessions, consumer queues and rooms
//! - [`config`]: Runtime tunables
//! - [`runtime`]: The [`runtime::Switchboard`] owning every component

pub mod backend;
pub mod config;
pub mod execution;
pub mod runtime;
pub mod streaming;
pub mod tool_registry;

#[cfg(test)]
pub(crate) mod test_support;

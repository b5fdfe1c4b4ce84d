//! Backend orchestration: descriptors, health tracking and fallback.
//!
//! The module follows the same hexagonal split as the rest of the crate:
//!
//! - Domain types in [`domain`]: descriptors, circuit state, the backend
//!   failure taxonomy, and the caller-facing request/response shapes
//! - Port contracts in [`ports`]: the [`ports::BackendAdapter`] every
//!   external AI backend is wrapped in
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]: the health tracker and the
//!   provider orchestrator

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;

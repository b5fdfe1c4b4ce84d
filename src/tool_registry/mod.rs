//! Unified tool registry and executor.
//!
//! Compiled-in tools and tools discovered from external sources share one
//! namespace. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]: names, schemas, descriptors, tool errors
//! - Port contracts in [`ports`]: source invokers, compiled-in handlers and
//!   the result cache
//! - Adapter implementations in [`adapters`]
//! - Services in [`services`]: the snapshot-published registry and the gated
//!   executor

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;

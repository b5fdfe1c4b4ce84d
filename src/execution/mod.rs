//! Request-scoped execution context.
//!
//! Every request entering the switchboard carries an [`ExecutionContext`]:
//! caller identity, the deadline and cancellation signal, and the cache,
//! fallback and tool policies that govern how the request is served. The
//! context is immutable; narrower contexts are derived, never patched.

mod context;
mod ids;
mod policy;

pub use context::{ContextInterrupt, ExecutionContext, ExecutionContextBuilder};
pub use ids::{RequestId, SessionId, UserId};
pub use policy::{CachePolicy, CallerRole, FallbackPolicy, ToolPolicy};

#[cfg(test)]
mod tests;

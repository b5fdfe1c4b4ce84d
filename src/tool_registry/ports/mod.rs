//! Port contracts for tool sources and the result cache.

mod cache;
mod handler;
mod invoker;

#[cfg(test)]
pub use cache::MockToolResultCache;
pub use cache::ToolResultCache;
pub use handler::ToolHandler;
pub use invoker::{ToolInvocationError, ToolInvocationResult, ToolInvoker};

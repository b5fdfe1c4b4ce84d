//! Adapter implementations for tool registry ports.

mod builtin;
mod cache;
mod source;

pub use builtin::BuiltinTools;
pub use cache::InMemoryToolResultCache;
pub use source::{InMemoryToolSource, ToolBehaviour};

//! Port contracts for backend adapters.
//!
//! Each external AI backend is wrapped in a [`BackendAdapter`] implemented
//! outside this crate's core.

mod adapter;

pub use adapter::{BackendAdapter, ChunkStream};

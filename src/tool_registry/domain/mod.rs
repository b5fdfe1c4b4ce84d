//! Domain model for the unified tool namespace.
//!
//! Tools are published by sources (the compiled-in `builtin` source and any
//! number of discovered external sources) and addressed either by bare name
//! or as `source:name`. Parameter schemas are parsed at registration so
//! arguments are validated once, at the registry boundary.

mod descriptor;
mod error;
mod names;
mod output;
mod schema;

pub use descriptor::{Availability, SideEffectClass, SourceKind, ToolDescriptor, ToolSpec};
pub use error::{ToolError, ToolRegistryDomainError};
pub use names::{INTERNAL_SOURCE, QualifiedToolName, SourceName, ToolName, ToolReference};
pub use output::{CacheKey, CachedResult, ToolOutput};
pub use schema::{ParameterSchema, ParameterSpec, ParameterType, ToolArguments};

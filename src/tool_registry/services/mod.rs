//! Tool registry and executor services.

mod executor;
mod registry;

pub use executor::ToolExecutor;
pub use registry::{
    DEFAULT_DISCOVERY_WINDOW, RegistrationDiff, ToolListing, ToolRegistry, ToolRegistryError,
};

//! Domain model for backend selection.
//!
//! Descriptors are immutable once registered. Health state is mutated only
//! by the health tracker, through the transition methods on
//! [`HealthState`].

mod descriptor;
mod error;
mod failure;
mod health;
mod name;
mod request;
mod response;

pub use descriptor::{AuthRequirement, BackendCapabilities, BackendDescriptor, BackendKind};
pub use error::BackendDomainError;
pub use failure::{BackendError, FailureClass, FatalKind, RetryableKind};
pub use health::{CircuitState, HealthPolicy, HealthState, HealthTransition};
pub use name::BackendName;
pub use request::{GenerationRequest, RequestInput};
pub use response::{
    AttemptOutcome, AttemptRecord, BackendReply, GenerationResponse, SkipReason, ToolCallRecord,
    ToolCallRequest,
};

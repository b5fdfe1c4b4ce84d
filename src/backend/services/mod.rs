//! Backend orchestration services.

mod health;
mod orchestrator;

pub use health::{Admission, HealthTracker, ProbePermit};
pub use orchestrator::{
    BackendPlan, OrchestratorError, OrchestratorResult, ProviderOrchestrator, StreamHandle,
};

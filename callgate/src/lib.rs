pub mod simulate;

pub use simulate::{SimulationPlan, SimulationReport};

// Re-export commonly used types
pub use callgate_core::{
    config::Profile,
    error::{ApiError, CallgateError, CallgateResult},
    orchestrator::ResilienceOrchestrator,
    ResilienceConfig,
};

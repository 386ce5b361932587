mod orchestrator;
pub mod readiness;

pub use orchestrator::{
    DEFAULT_SETTLE_DELAY, Orchestrator, OrchestratorOptions, OrchestratorSession,
    should_provision,
};

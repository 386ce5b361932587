pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Public so integration tests can drive the orchestrator without a real runtime
pub mod test_support;

pub use domain::{
    ContainerRuntime, ContainerSpec, Environment, EnvironmentRequirement, PortMapping,
    ProvisioningError, ReadinessProbe, RunningService, ServiceSpec, SessionConfig, TeardownError,
    VolumeMount,
};
pub use infra::{ContainerCli, Manifest, load_manifest};
pub use services::{Orchestrator, OrchestratorOptions, OrchestratorSession, should_provision};

mod container;
pub mod duration;
mod environment;
mod error;
mod service;
pub mod traits;

pub use container::{ContainerSpec, MANAGED_LABEL, RunningService};
pub use duration::parse_duration;
pub use environment::{Environment, EnvironmentRequirement, SessionConfig};
pub use error::{ProvisioningError, TeardownError};
pub use service::{PortMapping, Protocol, ReadinessProbe, ServiceSpec, VolumeMount};
pub use traits::ContainerRuntime;

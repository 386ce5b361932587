use super::ContainerSpec;
use anyhow::Result;
use std::fmt::Debug;

/// Container runtime control plane used by the orchestrator
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Check whether the runtime can be reached at all
    fn is_available(&self) -> bool;

    /// Check whether a container with this name exists, running or not
    fn container_exists(&self, name: &str) -> Result<bool>;

    /// Whether the named container carries `MANAGED_LABEL`
    fn is_managed(&self, name: &str) -> Result<bool>;

    /// Start a detached container from a spec, returning its id
    fn run_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Forcefully stop and remove a container, addressed by id or name
    fn remove_container(&self, target: &str) -> Result<()>;

    /// Run a command inside a running container; `Ok(true)` on exit status 0
    fn exec(&self, name: &str, command: &[String]) -> Result<bool>;
}

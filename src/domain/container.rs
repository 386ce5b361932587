use super::service::{PortMapping, VolumeMount};
use std::collections::BTreeMap;

/// Label put on every container this crate starts. Only labelled containers
/// are ever replaced as stale.
pub const MANAGED_LABEL: &str = "testrig.managed";

/// Everything a runtime needs to start one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub ports: &'a [PortMapping],
    pub env: &'a BTreeMap<String, String>,
    pub volumes: &'a [VolumeMount],
    pub command: &'a [String],
    pub auto_remove: bool,
    /// Attach `MANAGED_LABEL`
    pub managed: bool,
}

/// Handle to a container started during a session.
///
/// Owned by the session that created it and consumed by teardown, so it is
/// intentionally not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct RunningService {
    name: String,
    container_id: String,
}

impl RunningService {
    pub fn new(name: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_id: container_id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn short_id(&self) -> &str {
        let end = self
            .container_id
            .char_indices()
            .nth(12)
            .map_or(self.container_id.len(), |(idx, _)| idx);
        &self.container_id[..end]
    }
}

use crate::domain::{ContainerRuntime, ContainerSpec};
use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockContainer {
    pub name: String,
    pub id: String,
    pub running: bool,
    pub managed: bool,
    pub spec: Option<MockContainerSpec>,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockContainerSpec {
    pub image: String,
    pub ports: Vec<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub command: Vec<String>,
    pub auto_remove: bool,
    pub managed: bool,
}

/// In-memory `ContainerRuntime` that records every call as `op:name`.
///
/// `set_fail_on` accepts either an operation (`"run"`) or an operation bound
/// to one container (`"run:minio-tests"`). `remove` accepts a name or an id
/// and records the name it resolved to, or the raw target when nothing
/// matched.
#[derive(Debug, Default)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Vec<String>>,
    not_ready: RwLock<HashMap<String, u32>>,
    next_id: AtomicUsize,
    unavailable: RwLock<bool>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a container started by someone else before the session.
    pub fn add_container(&self, name: &str) {
        self.seed(name, false);
    }

    /// Seeds a labelled container left behind by an earlier session.
    pub fn add_stale_container(&self, name: &str) {
        self.seed(name, true);
    }

    fn seed(&self, name: &str, managed: bool) {
        self.containers.write().unwrap().insert(
            name.to_string(),
            MockContainer {
                name: name.to_string(),
                id: format!("preexisting-{name}"),
                running: true,
                managed,
                spec: None,
            },
        );
    }

    /// Drops a container the way `--rm` does once its process exits.
    pub fn simulate_exit(&self, name: &str) {
        self.containers.write().unwrap().remove(name);
    }

    pub fn container_id(&self, name: &str) -> Option<String> {
        self.containers
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.id.clone())
    }

    pub fn set_fail_on(&self, operation: &str) {
        self.fail_on.write().unwrap().push(operation.to_string());
    }

    /// Makes `exec` on `name` report "not ready" for the next `attempts` calls.
    pub fn set_ready_after(&self, name: &str, attempts: u32) {
        self.not_ready
            .write()
            .unwrap()
            .insert(name.to_string(), attempts);
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.write().unwrap() = true;
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands
            .read()
            .unwrap()
            .iter()
            .filter(|c| *c == command)
            .count()
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.containers.read().unwrap().contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.containers
            .read()
            .unwrap()
            .get(name)
            .is_some_and(|c| c.running)
    }

    pub fn get_spec(&self, name: &str) -> Option<MockContainerSpec> {
        self.containers
            .read()
            .unwrap()
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn check_fail(&self, operation: &str, name: &str) -> Result<()> {
        let scoped = format!("{operation}:{name}");
        let fail_on = self.fail_on.read().unwrap();
        if fail_on.iter().any(|f| *f == operation || *f == scoped) {
            bail!("Mock failure on: {}", scoped);
        }
        Ok(())
    }
}

impl ContainerRuntime for MockRuntime {
    fn is_available(&self) -> bool {
        self.record_command("is_available");
        !*self.unavailable.read().unwrap()
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        self.record_command(&format!("exists:{}", name));
        self.check_fail("exists", name)?;
        Ok(self.containers.read().unwrap().contains_key(name))
    }

    fn is_managed(&self, name: &str) -> Result<bool> {
        self.record_command(&format!("managed:{}", name));
        self.check_fail("managed", name)?;

        match self.containers.read().unwrap().get(name) {
            Some(container) => Ok(container.managed),
            None => bail!("no such container: {}", name),
        }
    }

    fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record_command(&format!("run:{}", spec.name));
        self.check_fail("run", spec.name)?;

        let mut containers = self.containers.write().unwrap();
        if containers.contains_key(spec.name) {
            bail!("container name {} is already in use", spec.name);
        }

        let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        containers.insert(
            spec.name.to_string(),
            MockContainer {
                name: spec.name.to_string(),
                id: id.clone(),
                running: true,
                managed: spec.managed,
                spec: Some(MockContainerSpec {
                    image: spec.image.to_string(),
                    ports: spec.ports.iter().map(ToString::to_string).collect(),
                    env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
                    volumes: spec.volumes.iter().map(ToString::to_string).collect(),
                    command: spec.command.to_vec(),
                    auto_remove: spec.auto_remove,
                    managed: spec.managed,
                }),
            },
        );

        Ok(id)
    }

    fn remove_container(&self, target: &str) -> Result<()> {
        let mut containers = self.containers.write().unwrap();
        let name = containers
            .values()
            .find(|c| c.id == target)
            .or_else(|| containers.get(target))
            .map(|c| c.name.clone());

        let recorded = name.as_deref().unwrap_or(target);
        self.record_command(&format!("remove:{}", recorded));
        self.check_fail("remove", recorded)?;

        match name {
            Some(name) => {
                containers.remove(&name);
                Ok(())
            }
            None => bail!("no such container: {}", target),
        }
    }

    fn exec(&self, name: &str, _command: &[String]) -> Result<bool> {
        self.record_command(&format!("exec:{}", name));
        self.check_fail("exec", name)?;

        let mut not_ready = self.not_ready.write().unwrap();
        match not_ready.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

use super::container::ContainerSpec;
use super::duration::deserialize_duration;
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// A published port, `host:container[/proto]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PortMapping {
    host: u16,
    container: u16,
    protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(host: u16, container: u16) -> Self {
        Self {
            host,
            container,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(host: u16, container: u16) -> Self {
        Self {
            host,
            container,
            protocol: Protocol::Udp,
        }
    }

    pub fn host(&self) -> u16 {
        self.host
    }

    pub fn container(&self) -> u16 {
        self.container
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Tcp => write!(f, "{}:{}", self.host, self.container),
            Protocol::Udp => write!(f, "{}:{}/udp", self.host, self.container),
        }
    }
}

impl FromStr for PortMapping {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, other)) => bail!("unsupported protocol '{other}' in port mapping '{s}'"),
            None => (s, Protocol::Tcp),
        };

        let (host, container) = ports
            .split_once(':')
            .ok_or_else(|| anyhow!("port mapping '{s}' must look like host:container"))?;

        let host = host
            .trim()
            .parse()
            .with_context(|| format!("invalid host port in '{s}'"))?;
        let container = container
            .trim()
            .parse()
            .with_context(|| format!("invalid container port in '{s}'"))?;

        Ok(Self {
            host,
            container,
            protocol,
        })
    }
}

impl TryFrom<String> for PortMapping {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A bind mount, `host:container[:ro|rw]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct VolumeMount {
    host: PathBuf,
    container: String,
    read_only: bool,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn host(&self) -> &Path {
        &self.host
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn resolved(mut self, base_dir: &Path) -> Self {
        let expanded = shellexpand::tilde(self.host.to_string_lossy().as_ref()).into_owned();
        let expanded = PathBuf::from(expanded);
        self.host = if expanded.is_absolute() {
            expanded
        } else {
            base_dir.join(expanded)
        };
        self
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.read_only { "ro" } else { "rw" };
        write!(f, "{}:{}:{mode}", self.host.display(), self.container)
    }
}

impl FromStr for VolumeMount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (*host, *container, false),
            [host, container, "rw"] => (*host, *container, false),
            [host, container, "ro"] => (*host, *container, true),
            [_, _, mode] => bail!("unsupported mount mode '{mode}' in volume '{s}'"),
            _ => bail!("volume '{s}' must look like host:container[:ro|rw]"),
        };

        if host.is_empty() || container.is_empty() {
            bail!("volume '{s}' has an empty path");
        }

        Ok(Self {
            host: PathBuf::from(host),
            container: container.to_string(),
            read_only,
        })
    }
}

impl TryFrom<String> for VolumeMount {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

const DEFAULT_PROBE_RETRIES: u32 = 30;

fn default_probe_retries() -> u32 {
    DEFAULT_PROBE_RETRIES
}

fn default_tcp_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_command_interval() -> Duration {
    Duration::from_secs(1)
}

/// How to tell that a started service is usable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReadinessProbe {
    /// Connect to a published host port on the loopback interface.
    Tcp {
        port: u16,
        #[serde(default = "default_probe_retries")]
        retries: u32,
        #[serde(
            default = "default_tcp_interval",
            deserialize_with = "deserialize_duration"
        )]
        interval: Duration,
    },
    /// Run a command inside the container until it exits with status 0.
    Command {
        command: Vec<String>,
        #[serde(default = "default_probe_retries")]
        retries: u32,
        #[serde(
            default = "default_command_interval",
            deserialize_with = "deserialize_duration"
        )]
        interval: Duration,
    },
}

impl ReadinessProbe {
    pub fn tcp(port: u16) -> Self {
        Self::Tcp {
            port,
            retries: DEFAULT_PROBE_RETRIES,
            interval: default_tcp_interval(),
        }
    }

    pub fn command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Command {
            command: command.into_iter().map(Into::into).collect(),
            retries: DEFAULT_PROBE_RETRIES,
            interval: default_command_interval(),
        }
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        match &mut self {
            Self::Tcp { retries, .. } | Self::Command { retries, .. } => *retries = attempts,
        }
        self
    }

    pub fn with_interval(mut self, every: Duration) -> Self {
        match &mut self {
            Self::Tcp { interval, .. } | Self::Command { interval, .. } => *interval = every,
        }
        self
    }

    pub fn retries(&self) -> u32 {
        match self {
            Self::Tcp { retries, .. } | Self::Command { retries, .. } => *retries,
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Tcp { interval, .. } | Self::Command { interval, .. } => *interval,
        }
    }
}

/// Declarative description of one external dependency.
///
/// The `name` doubles as the container name. `exports` lists the variables a
/// caller needs to locate the service once it is running.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    name: String,
    image: String,
    #[serde(default)]
    ports: Vec<PortMapping>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    volumes: Vec<VolumeMount>,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    exports: BTreeMap<String, String>,
    #[serde(default)]
    readiness: Option<ReadinessProbe>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            command: Vec::new(),
            exports: BTreeMap::new(),
            readiness: None,
        }
    }

    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.insert(key.into(), value.into());
        self
    }

    pub fn with_readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = Some(probe);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn volumes(&self) -> &[VolumeMount] {
        &self.volumes
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn exports(&self) -> &BTreeMap<String, String> {
        &self.exports
    }

    pub fn readiness(&self) -> Option<&ReadinessProbe> {
        self.readiness.as_ref()
    }

    pub fn to_spec(&self) -> ContainerSpec<'_> {
        ContainerSpec {
            name: &self.name,
            image: &self.image,
            ports: &self.ports,
            env: &self.env,
            volumes: &self.volumes,
            command: &self.command,
            auto_remove: true,
            managed: true,
        }
    }

    /// Checks the container-name rules and that an image is set.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            bail!("service with empty name");
        }

        if !name.chars().next().is_some_and(char::is_alphanumeric) {
            bail!("service name '{name}' must start with a letter or digit");
        }

        if let Some(c) = name
            .chars()
            .find(|c| !c.is_alphanumeric() && !matches!(c, '_' | '.' | '-'))
        {
            bail!("service name '{name}' contains invalid character '{c}'");
        }

        if self.image.trim().is_empty() {
            bail!("service '{name}' has no image");
        }

        if let Some(ReadinessProbe::Command { command, .. }) = &self.readiness {
            if command.is_empty() {
                bail!("service '{name}' has an empty readiness command");
            }
        }

        Ok(())
    }

    /// Anchors relative volume host paths at `base_dir`.
    pub(crate) fn with_base_dir(mut self, base_dir: &Path) -> Self {
        self.volumes = self
            .volumes
            .into_iter()
            .map(|volume| volume.resolved(base_dir))
            .collect();
        self
    }
}

use crate::domain::duration::deserialize_optional_duration;
use crate::domain::{EnvironmentRequirement, ServiceSpec};
use crate::services::OrchestratorOptions;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MANIFEST_NAME: &str = "testrig.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Yaml,
}

impl ManifestFormat {
    /// Picks the format from the file extension; anything unknown is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml" | "yaml") => Self::Yaml,
            _ => Self::Toml,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    /// Runtime binary, `docker` or `podman`
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub settle_delay: Option<Duration>,
    /// Explicit requirement; derived from service exports when empty
    #[serde(default)]
    pub requirement: Vec<String>,
    #[serde(default)]
    pub replace_stale: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    session: SessionSettings,
    #[serde(default, rename = "service", alias = "services")]
    services: Vec<ServiceSpec>,
}

/// A validated session description loaded from `testrig.toml` or `testrig.yml`.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub settings: SessionSettings,
    services: Vec<ServiceSpec>,
    requirement: EnvironmentRequirement,
}

impl Manifest {
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn requirement(&self) -> &EnvironmentRequirement {
        &self.requirement
    }

    pub fn runtime(&self) -> Option<&str> {
        self.settings.runtime.as_deref()
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        let mut options = OrchestratorOptions::default();
        if let Some(delay) = self.settings.settle_delay {
            options.settle_delay = delay;
        }
        if let Some(replace) = self.settings.replace_stale {
            options.replace_stale = replace;
        }
        options
    }
}

pub fn default_manifest_path() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST_NAME)
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        bail!("manifest not found at {:?}", path);
    }

    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = fs::canonicalize(&base_dir).unwrap_or(base_dir);

    let manifest = parse_manifest(&content, ManifestFormat::from_path(path), &base_dir)
        .with_context(|| format!("parsing {:?}", path))?;

    info!(
        "Loaded {} service(s) from {:?}",
        manifest.services.len(),
        path
    );

    Ok(manifest)
}

pub fn parse_manifest(content: &str, format: ManifestFormat, base_dir: &Path) -> Result<Manifest> {
    let raw: RawManifest = match format {
        ManifestFormat::Toml => toml::from_str(content)?,
        ManifestFormat::Yaml => serde_yml::from_str(content)?,
    };

    let services = validate_services(raw.services, base_dir)?;
    let requirement = resolve_requirement(&raw.session, &services)?;

    Ok(Manifest {
        settings: raw.session,
        services,
        requirement,
    })
}

fn validate_services(services: Vec<ServiceSpec>, base_dir: &Path) -> Result<Vec<ServiceSpec>> {
    let mut names = HashSet::new();
    let mut host_ports = HashSet::new();
    let mut validated = Vec::with_capacity(services.len());

    for service in services {
        service.validate()?;

        if !names.insert(service.name().to_string()) {
            bail!("service '{}' is declared more than once", service.name());
        }

        for port in service.ports() {
            if !host_ports.insert((port.host(), port.protocol())) {
                bail!(
                    "host port {} of service '{}' is already published by another service",
                    port.host(),
                    service.name()
                );
            }
        }

        validated.push(service.with_base_dir(base_dir));
    }

    Ok(validated)
}

fn resolve_requirement(
    settings: &SessionSettings,
    services: &[ServiceSpec],
) -> Result<EnvironmentRequirement> {
    let derived: BTreeSet<String> = services
        .iter()
        .flat_map(|svc| svc.exports().keys().cloned())
        .collect();

    if !settings.requirement.is_empty() {
        if !services.is_empty() {
            let unexported: Vec<&str> = settings
                .requirement
                .iter()
                .filter(|name| !derived.contains(*name))
                .map(String::as_str)
                .collect();

            if !unexported.is_empty() {
                bail!(
                    "required variable(s) {} not exported by any service",
                    unexported.join(", ")
                );
            }
        }

        return EnvironmentRequirement::new(settings.requirement.iter().cloned());
    }

    if derived.is_empty() {
        bail!("no requirement declared and no service exports any variable");
    }

    debug!("Requirement derived from exports: {:?}", derived);
    EnvironmentRequirement::new(derived)
}

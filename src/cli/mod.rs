pub mod check;
pub mod doctor;
pub mod run;
mod signals;

pub use run::RunOptions;

use crate::infra::ContainerCli;
use crate::infra::cli_adapter::DEFAULT_RUNTIME;
use crate::infra::config::Manifest;
use std::path::PathBuf;

/// Global options shared by every subcommand
#[derive(Debug, Clone)]
pub struct CliContext {
    pub manifest: PathBuf,
    /// Runtime from `--runtime` / `TESTRIG_RUNTIME`, wins over the manifest
    pub runtime: Option<String>,
}

impl CliContext {
    pub fn new(manifest: PathBuf, runtime: Option<String>) -> Self {
        Self { manifest, runtime }
    }

    pub fn runtime_program(&self, manifest: Option<&Manifest>) -> String {
        self.runtime
            .clone()
            .or_else(|| manifest.and_then(|m| m.runtime().map(str::to_string)))
            .unwrap_or_else(|| DEFAULT_RUNTIME.to_string())
    }

    pub fn runtime_for(&self, manifest: Option<&Manifest>) -> ContainerCli {
        ContainerCli::new(self.runtime_program(manifest))
    }
}

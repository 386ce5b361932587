use crate::domain::{ContainerRuntime, ContainerSpec, MANAGED_LABEL};
use anyhow::{Context, Result, bail};
use std::ffi::OsStr;
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::debug;

pub const DEFAULT_RUNTIME: &str = "docker";

/// `ContainerRuntime` backed by a docker-compatible command line
/// (`docker` or `podman`).
#[derive(Debug, Clone)]
pub struct ContainerCli {
    program: String,
}

impl ContainerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn status<I, S>(&self, args: I, context: &str) -> Result<ExitStatus>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("{context} ({})", self.program))
    }

    fn output<I, S>(&self, args: I, context: &str) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("{context} ({})", self.program))?;

        ensure_success(&self.program, &output, context)?;
        Ok(output)
    }
}

impl Default for ContainerCli {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME)
    }
}

impl ContainerRuntime for ContainerCli {
    fn is_available(&self) -> bool {
        self.status(["--version"], "checking runtime version")
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .status(
                ["container", "inspect", name],
                &format!("inspecting container {name}"),
            )?
            .success())
    }

    fn is_managed(&self, name: &str) -> Result<bool> {
        let format = format!("{{{{ index .Config.Labels \"{MANAGED_LABEL}\" }}}}");
        let output = self.output(
            ["container", "inspect", "--format", format.as_str(), name],
            &format!("reading labels of {name}"),
        )?;

        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        let args = run_args(spec);
        debug!("{} {}", self.program, args.join(" "));

        let output = self.output(&args, &format!("starting container {}", spec.name))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if id.is_empty() {
            bail!("{} did not report a container id for {}", self.program, spec.name);
        }

        Ok(id)
    }

    fn remove_container(&self, target: &str) -> Result<()> {
        self.output(["rm", "-f", target], &format!("removing container {target}"))?;
        Ok(())
    }

    fn exec(&self, name: &str, command: &[String]) -> Result<bool> {
        let mut args = vec!["exec".to_string(), name.to_string()];
        args.extend(command.iter().cloned());

        Ok(self
            .status(&args, &format!("running readiness command in {name}"))?
            .success())
    }
}

/// Arguments for a detached `run` of `spec`, image and command last.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["run".into(), "-d".into()];

    if spec.auto_remove {
        args.push("--rm".into());
    }

    args.push("--name".into());
    args.push(spec.name.into());

    if spec.managed {
        args.push("--label".into());
        args.push(format!("{MANAGED_LABEL}=true"));
    }

    for port in spec.ports {
        args.push("-p".into());
        args.push(port.to_string());
    }

    for (key, value) in spec.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    for volume in spec.volumes {
        args.push("-v".into());
        args.push(volume.to_string());
    }

    args.push(spec.image.into());

    for arg in spec.command {
        args.push(arg.clone());
    }

    args
}

fn ensure_success(program: &str, output: &Output, context: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!(
        "{program} exited with {:?} ({context}): {}",
        output.status.code(),
        stderr.trim()
    )
}

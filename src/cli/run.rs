use super::CliContext;
use super::signals::InterruptGuard;
use crate::domain::{Environment, SessionConfig};
use crate::infra::load_manifest;
use crate::services::Orchestrator;
use anyhow::{Context, Result};
use clap::Args;
use std::process::{Command, ExitCode, ExitStatus};
use std::sync::Arc;
use tracing::{info, warn};

const INTERRUPTED_EXIT: u8 = 130;

#[derive(Args, Debug)]
pub struct RunOptions {
    /// Program to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub fn run(options: RunOptions, ctx: &CliContext) -> Result<ExitCode> {
    let manifest = load_manifest(&ctx.manifest)?;
    let runtime = Arc::new(ctx.runtime_for(Some(&manifest)));
    let environment = Environment::capture();

    let signals = InterruptGuard::install()?;
    let orchestrator = Orchestrator::new(runtime, manifest.orchestrator_options())
        .with_interrupt(signals.flag());

    let outcome = orchestrator.run_session(
        manifest.requirement(),
        &environment,
        manifest.services(),
        |config| run_child(&options.command, config),
    );

    if signals.interrupted() {
        warn!("Interrupted, services were torn down");
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    }

    Ok(exit_code(outcome?))
}

fn run_child(command: &[String], config: &SessionConfig) -> Result<ExitStatus> {
    let (program, args) = command.split_first().context("no command given")?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    config.apply_to(&mut cmd);

    info!("Running {}", command.join(" "));

    cmd.status().with_context(|| format!("running {program}"))
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}

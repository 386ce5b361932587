use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use testrig::cli::{self, CliContext, RunOptions};
use testrig::infra::config::DEFAULT_MANIFEST_NAME;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "testrig",
    about = "Starts test dependencies in containers when the environment does not provide them"
)]
struct Cli {
    /// Manifest describing the services (testrig.toml or testrig.yml)
    #[arg(long, short, env = "TESTRIG_MANIFEST", default_value = DEFAULT_MANIFEST_NAME)]
    manifest: PathBuf,

    /// Container runtime binary (docker, podman); overrides the manifest
    #[arg(long, env = "TESTRIG_RUNTIME")]
    runtime: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether the environment already provides the services
    Check,
    /// Run a command with the services available for its whole lifetime
    Run(RunOptions),
    /// Check that the runtime is installed and the manifest is valid
    Doctor,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> Result<ExitCode> {
    init_logging();

    let args = Cli::parse();
    let ctx = CliContext::new(args.manifest, args.runtime);

    match args.command {
        Commands::Check => cli::check::run(&ctx),
        Commands::Run(options) => cli::run::run(options, &ctx),
        Commands::Doctor => cli::doctor::run(&ctx),
    }
}

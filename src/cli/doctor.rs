use super::CliContext;
use crate::domain::ContainerRuntime;
use crate::infra::load_manifest;
use anyhow::Result;
use std::process::ExitCode;

pub fn run(ctx: &CliContext) -> Result<ExitCode> {
    println!("🔍 Checking runtime and manifest...");
    let mut healthy = true;

    let manifest = match load_manifest(&ctx.manifest) {
        Ok(manifest) => {
            println!(
                "✅ Manifest {:?}: {} service(s)",
                ctx.manifest,
                manifest.services().len()
            );
            Some(manifest)
        }
        Err(e) => {
            println!("⚠️  Manifest {:?}: {:#}", ctx.manifest, e);
            healthy = false;
            None
        }
    };

    let runtime = ctx.runtime_for(manifest.as_ref());
    if runtime.is_available() {
        println!("✅ {} available", runtime.program());
    } else {
        println!("⚠️  {} not found in PATH", runtime.program());
        healthy = false;
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

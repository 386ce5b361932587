use super::CliContext;
use crate::domain::Environment;
use crate::infra::config::Manifest;
use crate::infra::load_manifest;
use crate::services::should_provision;
use anyhow::Result;
use std::process::ExitCode;

pub fn run(ctx: &CliContext) -> Result<ExitCode> {
    let manifest = load_manifest(&ctx.manifest)?;
    println!("{}", report(&manifest, &Environment::capture()));
    Ok(ExitCode::SUCCESS)
}

/// Human-readable verdict on whether a session would provision anything.
pub fn report(manifest: &Manifest, environment: &Environment) -> String {
    let requirement = manifest.requirement();

    if !should_provision(requirement, environment) {
        let count = requirement.names().count();
        return format!("✅ All {count} required variable(s) are set, services are managed externally");
    }

    let names: Vec<_> = manifest.services().iter().map(|s| s.name()).collect();
    let mut lines = vec![format!(
        "⚠️  Missing: {}",
        requirement.missing(environment).join(", ")
    )];

    if names.is_empty() {
        lines.push("No services declared, nothing would be started".to_string());
    } else {
        lines.push(format!(
            "{} service(s) would be provisioned: {}",
            names.len(),
            names.join(", ")
        ));
    }

    lines.join("\n")
}

//! OS package installation.
use crate::config::Config;
use crate::error::StepError;

use super::{Context, ConvergenceStep, Probe};

/// Install every configured package in one batch.
#[derive(Debug, Clone, Copy)]
pub struct InstallPackages;

/// Configured packages not currently installed, in configuration order.
fn missing(ctx: &Context) -> Result<Vec<String>, StepError> {
    let mut missing = Vec::new();
    for name in &ctx.config.packages {
        if !ctx.host.packages.is_installed(name)? && !missing.contains(name) {
            missing.push(name.clone());
        }
    }
    Ok(missing)
}

impl ConvergenceStep for InstallPackages {
    fn name(&self) -> &str {
        "install-packages"
    }

    fn description(&self, config: &Config) -> String {
        format!("install {} OS packages", config.packages.len())
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let missing = missing(ctx)?;
        if missing.is_empty() {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied(format!("missing: {}", missing.join(", "))))
        }
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let wanted = missing(ctx)?;
        if wanted.is_empty() {
            return Ok(());
        }
        ctx.log.info(&format!("installing {} packages", wanted.len()));
        ctx.log.debug(&wanted.join(" "));
        ctx.host.packages.install_all(&wanted)?;

        let failed = missing(ctx)?;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(StepError::PartialInstall { failed })
        }
    }
}

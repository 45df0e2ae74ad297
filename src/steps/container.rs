//! Container runtime installation and service start.
use crate::config::Config;
use crate::error::StepError;

use super::{Context, ConvergenceStep, Probe};

/// Install the container runtime if its binary is missing and keep its
/// service running.
#[derive(Debug, Clone, Copy)]
pub struct InstallContainerRuntime;

impl ConvergenceStep for InstallContainerRuntime {
    fn name(&self) -> &str {
        "install-container-runtime"
    }

    fn description(&self, config: &Config) -> String {
        format!(
            "install {} from {} and start the {} service",
            config.container.binary, config.container.install_script, config.container.service
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let settings = &ctx.config.container;
        if !ctx.host.container.is_installed(&settings.binary) {
            return Ok(Probe::Unsatisfied(format!(
                "{} not found on PATH",
                settings.binary
            )));
        }
        if !ctx.host.services.is_active(&settings.service)? {
            return Ok(Probe::Unsatisfied(format!(
                "service {} is not running",
                settings.service
            )));
        }
        Ok(Probe::Satisfied)
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let settings = &ctx.config.container;
        if !ctx.host.container.is_installed(&settings.binary) {
            ctx.log.info(&format!("running installer from {}", settings.install_script));
            if settings.script_sha256.is_none() {
                ctx.log.debug("installer checksum not configured");
            }
            ctx.host.container.install(settings)?;
        }
        if !ctx.host.services.is_active(&settings.service)? {
            ctx.log.info(&format!("starting {}", settings.service));
            ctx.host.services.start(&settings.service)?;
        }
        Ok(())
    }
}

//! Interpreter build and global selection.
use crate::config::Config;
use crate::error::StepError;

use super::{Context, ConvergenceStep, Probe};

/// Build the configured interpreter version and make it the global default.
#[derive(Debug, Clone, Copy)]
pub struct InstallLanguageRuntime;

impl ConvergenceStep for InstallLanguageRuntime {
    fn name(&self) -> &str {
        "install-language-runtime"
    }

    fn description(&self, config: &Config) -> String {
        format!("build python {} and select it globally", config.runtime.version)
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let version = &ctx.config.runtime.version;
        if !ctx.host.versions.is_installed(version)? {
            return Ok(Probe::Unsatisfied(format!("{version} is not installed")));
        }
        match ctx.host.versions.global()? {
            Some(global) if global == *version => Ok(Probe::Satisfied),
            Some(global) => Ok(Probe::Unsatisfied(format!("global version is {global}"))),
            None => Ok(Probe::Unsatisfied("no global version".to_string())),
        }
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let version = &ctx.config.runtime.version;
        if !ctx.host.versions.is_installed(version)? {
            ctx.log.info(&format!("building {version}"));
            ctx.host.versions.install_version(version)?;
        }
        if ctx.host.versions.global()?.as_deref() != Some(version.as_str()) {
            ctx.host.versions.set_global(version)?;
        }
        Ok(())
    }
}

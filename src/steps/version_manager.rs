//! Interpreter version manager checkout and login-profile wiring.
use crate::config::Config;
use crate::error::StepError;
use crate::host::LineMatcher;

use super::{Context, ConvergenceStep, Probe};

/// Clone the version manager into the runtime root and add its init lines
/// to the login profile.
#[derive(Debug, Clone, Copy)]
pub struct InstallVersionManager;

impl ConvergenceStep for InstallVersionManager {
    fn name(&self) -> &str {
        "install-version-manager"
    }

    fn description(&self, config: &Config) -> String {
        format!(
            "clone {} into {} and initialise it from {}",
            config.version_manager.repository,
            config.runtime.root_path.display(),
            config.version_manager.profile.display()
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let settings = &ctx.config.version_manager;
        let root = &ctx.config.runtime.root_path;
        if !ctx.host.sources.is_checkout_of(&settings.repository, root)? {
            return Ok(Probe::Unsatisfied(format!(
                "{} is not a checkout of {}",
                root.display(),
                settings.repository
            )));
        }
        for line in &settings.init_lines {
            if !ctx
                .host
                .text
                .has_line(&settings.profile, &LineMatcher::exact(line)?)?
            {
                return Ok(Probe::Unsatisfied(format!(
                    "{} lacks `{line}`",
                    settings.profile.display()
                )));
            }
        }
        Ok(Probe::Satisfied)
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let settings = &ctx.config.version_manager;
        let root = &ctx.config.runtime.root_path;
        if !ctx.host.sources.is_checkout_of(&settings.repository, root)? {
            ctx.log.info(&format!(
                "cloning {} into {}",
                settings.repository,
                root.display()
            ));
            ctx.host
                .sources
                .clone_repo(&settings.repository, root, &settings.branch)?;
        }
        for line in &settings.init_lines {
            if ctx
                .host
                .text
                .ensure_line(&settings.profile, &LineMatcher::exact(line)?, line)?
            {
                ctx.log.debug(&format!(
                    "added to {}: {line}",
                    settings.profile.display()
                ));
            }
        }
        Ok(())
    }
}

//! Kernel network tuning persisted in the sysctl file.
use crate::config::{Config, KernelSettings};
use crate::error::StepError;
use crate::host::LineMatcher;
use crate::host::kernel::split_parameter;

use super::{Context, ConvergenceStep, Probe};

/// Append the header and each parameter line once, then load the file.
#[derive(Debug, Clone, Copy)]
pub struct ApplyKernelParameters;

/// Keys whose value in the running kernel differs from the file.
fn stale_parameters<'a>(
    ctx: &Context,
    kernel: &'a KernelSettings,
) -> Result<Vec<&'a str>, StepError> {
    let mut stale = Vec::new();
    for (key, value) in kernel.parameters.iter().map(String::as_str).filter_map(split_parameter) {
        if ctx.host.kernel.live_value(key)?.as_deref() != Some(value.as_str()) {
            stale.push(key);
        }
    }
    Ok(stale)
}

impl ConvergenceStep for ApplyKernelParameters {
    fn name(&self) -> &str {
        "apply-kernel-parameters"
    }

    fn description(&self, config: &Config) -> String {
        format!(
            "write {} kernel parameters to {}",
            config.kernel.parameters.len(),
            config.kernel.file.display()
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let kernel = &ctx.config.kernel;
        let mut missing = Vec::new();
        for line in std::iter::once(&kernel.header).chain(&kernel.parameters) {
            if !ctx
                .host
                .text
                .has_line(&kernel.file, &LineMatcher::exact(line)?)?
            {
                missing.push(line.as_str());
            }
        }
        if !missing.is_empty() {
            return Ok(Probe::Unsatisfied(format!(
                "{} lacks {}",
                kernel.file.display(),
                missing.join("; ")
            )));
        }
        if kernel.reload {
            let stale = stale_parameters(ctx, kernel)?;
            if !stale.is_empty() {
                return Ok(Probe::Unsatisfied(format!(
                    "running kernel differs for {}",
                    stale.join(", ")
                )));
            }
        }
        Ok(Probe::Satisfied)
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let kernel = &ctx.config.kernel;
        let text = &ctx.host.text;

        let mut written = text.ensure_line(
            &kernel.file,
            &LineMatcher::exact(&kernel.header)?,
            &format!("\n{}", kernel.header),
        )?;
        for parameter in &kernel.parameters {
            if text.ensure_line(&kernel.file, &LineMatcher::exact(parameter)?, parameter)? {
                ctx.log.debug(&format!("added {parameter}"));
                written = true;
            }
        }

        if !kernel.reload {
            if written {
                ctx.log.info("kernel.reload is off; parameters apply at next boot");
            }
            return Ok(());
        }
        // A load that failed on an earlier run leaves the file complete but
        // the kernel behind.
        if written || !stale_parameters(ctx, kernel)?.is_empty() {
            ctx.log.info(&format!("loading {}", kernel.file.display()));
            ctx.host.kernel.load(&kernel.file)?;
        }
        Ok(())
    }
}

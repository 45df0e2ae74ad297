//! Command: list the steps in run order.
use anyhow::{Context as _, Result};

use crate::cli::GlobalOpts;
use crate::config::Config;
use crate::logging::Logger;
use crate::steps::Plan;

/// One line per step: position, name and what it will converge.
#[must_use]
pub fn render(plan: &Plan, config: &Config) -> Vec<String> {
    let width = plan.steps().iter().map(|s| s.name().len()).max().unwrap_or(0);
    plan.steps()
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let optional = if config.policy.optional_steps.iter().any(|s| s == step.name())
                || !step.critical()
            {
                " (optional)"
            } else {
                ""
            };
            format!(
                "{:>2}. {:<width$}  {}{optional}",
                i + 1,
                step.name(),
                step.description(config)
            )
        })
        .collect()
}

/// Run the plan command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
pub fn run(global: &GlobalOpts, log: &Logger) -> Result<()> {
    let path = Config::resolve_path(global.config.as_deref());
    let config = Config::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    log.debug(&format!("config: {}", path.display()));

    for line in render(&Plan::standard(), &config) {
        println!("{line}");
    }
    Ok(())
}

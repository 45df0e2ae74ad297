//! Command: bring the host to the configured state.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};

use super::{CommandSetup, run_plan};
use crate::cli::{ApplyOpts, GlobalOpts};
use crate::logging::Logger;
use crate::orchestrator::{Policy, RunMode};

/// Policy from the configuration with command-line overrides applied.
#[must_use]
pub fn policy(setup: &CommandSetup, opts: &ApplyOpts) -> Policy {
    let mut policy = Policy::from(&setup.config.policy);
    if opts.continue_on_error {
        policy.continue_on_error = true;
    }
    if let Some(secs) = opts.step_timeout {
        policy.step_timeout = Some(Duration::from_secs(secs));
    }
    policy
}

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if configuration loading fails or any step did not end
/// satisfied or applied.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, log: &Arc<Logger>) -> Result<()> {
    log.info(&format!("oradock-provision {}", super::version::version()));
    let setup = CommandSetup::init(global, log)?;
    let policy = policy(&setup, opts);
    let report = run_plan(&setup, policy, RunMode::Apply, opts.json, log)?;

    if let Some(failed) = report.failed_step() {
        bail!(
            "step '{}' failed: {}",
            failed.name,
            failed.result.detail().unwrap_or_default()
        );
    }
    if !report.is_success() {
        bail!("{} step(s) did not run", report.count("skipped"));
    }
    Ok(())
}

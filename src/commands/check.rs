//! Command: report what `apply` would change.
use std::sync::Arc;

use anyhow::{Result, bail};

use super::{CommandSetup, run_plan};
use crate::cli::{CheckOpts, GlobalOpts};
use crate::logging::Logger;
use crate::orchestrator::{Policy, RunMode};

/// Check-only runs report every step, so a failing probe never halts them.
#[must_use]
pub fn policy(setup: &CommandSetup) -> Policy {
    Policy {
        continue_on_error: true,
        ..Policy::from(&setup.config.policy)
    }
}

/// Run the check command.
///
/// # Errors
///
/// Returns an error if configuration loading fails or any step is not
/// already satisfied.
pub fn run(global: &GlobalOpts, opts: &CheckOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let report = run_plan(&setup, policy(&setup), RunMode::Check, opts.json, log)?;

    if let Some(failed) = report.failed_step() {
        bail!(
            "check of '{}' failed: {}",
            failed.name,
            failed.result.detail().unwrap_or_default()
        );
    }
    let pending = report.count("would_apply");
    if pending > 0 {
        bail!("{pending} step(s) would change the host");
    }
    if !report.is_success() {
        bail!("{} step(s) did not run", report.count("skipped"));
    }
    Ok(())
}

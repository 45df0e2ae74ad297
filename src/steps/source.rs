//! Application source checkout kept identical to upstream.
use crate::config::Config;
use crate::error::StepError;
use crate::host::CheckoutState;

use super::{Context, ConvergenceStep, Probe};

/// Clone the application repository, or force an existing checkout back to
/// the upstream branch.
#[derive(Debug, Clone, Copy)]
pub struct FetchSource;

fn state(ctx: &Context) -> Result<CheckoutState, StepError> {
    let source = &ctx.config.source;
    Ok(ctx
        .host
        .sources
        .checkout_state(&source.repository, &source.directory, &source.branch)?)
}

/// A directory that holds something else is never overwritten.
fn refuse(ctx: &Context, reason: &str) -> StepError {
    StepError::CollaboratorFailure(format!(
        "{} cannot be synced: {reason}",
        ctx.config.source.directory.display()
    ))
}

impl ConvergenceStep for FetchSource {
    fn name(&self) -> &str {
        "fetch-source"
    }

    fn description(&self, config: &Config) -> String {
        format!(
            "sync {} ({}) into {}",
            config.source.repository,
            config.source.branch,
            config.source.directory.display()
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        Ok(match state(ctx)? {
            CheckoutState::UpToDate => Probe::Satisfied,
            CheckoutState::Absent => Probe::Unsatisfied("not cloned".to_string()),
            CheckoutState::Drifted(reason) => Probe::Unsatisfied(reason),
            CheckoutState::Foreign(reason) => return Err(refuse(ctx, &reason)),
        })
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let source = &ctx.config.source;
        match state(ctx)? {
            CheckoutState::UpToDate => {}
            CheckoutState::Absent => {
                ctx.log.info(&format!(
                    "cloning {} into {}",
                    source.repository,
                    source.directory.display()
                ));
                ctx.host
                    .sources
                    .clone_repo(&source.repository, &source.directory, &source.branch)?;
            }
            CheckoutState::Foreign(reason) => return Err(refuse(ctx, &reason)),
            CheckoutState::Drifted(reason) => {
                ctx.log.info(&format!(
                    "resetting {} to origin/{} ({reason})",
                    source.directory.display(),
                    source.branch
                ));
                ctx.host
                    .sources
                    .sync(&source.repository, &source.directory, &source.branch)?;
            }
        }
        Ok(())
    }
}

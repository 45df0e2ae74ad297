//! Sequential execution of a [`Plan`] into a [`RunReport`].
//!
//! Steps run one at a time, each on its own worker thread so that a per-step
//! timeout can be enforced and a panic inside a step is contained. The
//! orchestrator itself never fails: every problem ends up as a
//! [`StepResult`] in the report.
mod report;

pub use report::{RunMode, RunReport, SkipReason, StepRecord, StepResult};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::PolicySettings;
use crate::error::StepError;
use crate::steps::{Context, ConvergenceStep, Plan, Probe};

/// Failure handling for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Keep going after a failed step (a timeout still halts).
    pub continue_on_error: bool,
    /// Steps whose failure never halts the run.
    pub optional_steps: Vec<String>,
    /// Upper bound on a single step.
    pub step_timeout: Option<Duration>,
    /// Re-check after `apply` and fail with `NotConverged` if unsatisfied.
    pub verify: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            optional_steps: Vec::new(),
            step_timeout: None,
            verify: true,
        }
    }
}

impl From<&PolicySettings> for Policy {
    fn from(settings: &PolicySettings) -> Self {
        Self {
            continue_on_error: settings.continue_on_error,
            optional_steps: settings.optional_steps.clone(),
            step_timeout: settings.step_timeout,
            verify: settings.verify,
        }
    }
}

impl Policy {
    /// Whether a failure of `step` halts a fail-fast run.
    #[must_use]
    pub fn is_critical(&self, step: &dyn ConvergenceStep) -> bool {
        step.critical() && !self.optional_steps.iter().any(|n| n == step.name())
    }
}

/// Shared flag requesting that no further step be started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from a signal handler thread.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a plan under a policy.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    policy: Policy,
    mode: RunMode,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Create an orchestrator with its own cancel token.
    #[must_use]
    pub fn new(policy: Policy, mode: RunMode) -> Self {
        Self {
            policy,
            mode,
            cancel: CancelToken::new(),
        }
    }

    /// Observe `token` between steps.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every step of `plan` in order and report the outcome of each.
    pub fn run(&self, plan: &Plan, ctx: &Arc<Context>) -> RunReport {
        let started_at = Utc::now();
        let mut records = Vec::with_capacity(plan.len());
        let mut halted: Option<SkipReason> = None;

        for step in plan.steps() {
            if halted.is_none() && self.cancel.is_cancelled() {
                ctx.log.warn("interrupted; remaining steps will not start");
                halted = Some(SkipReason::Cancelled);
            }
            if let Some(reason) = &halted {
                ctx.log.debug(&format!("skipping {}: {reason}", step.name()));
                records.push(StepRecord::new(
                    step.name(),
                    StepResult::Skipped(reason.clone()),
                    Duration::ZERO,
                ));
                continue;
            }

            ctx.log.stage(step.name());
            ctx.log.debug(&step.description(&ctx.config));
            let start = Instant::now();
            let result = self.run_step(step, ctx);
            let duration = start.elapsed();

            match &result {
                StepResult::AlreadySatisfied => ctx.log.info("already satisfied"),
                StepResult::Applied => ctx.log.info("applied"),
                StepResult::WouldApply(_) | StepResult::Skipped(_) => {}
                StepResult::Failed(err) => {
                    ctx.log.error(&format!("{}: {err}", step.name()));
                    if err.always_halts()
                        || (self.policy.is_critical(step.as_ref())
                            && !self.policy.continue_on_error)
                    {
                        halted = Some(SkipReason::PriorFailure(step.name().to_string()));
                    }
                }
            }
            records.push(StepRecord::new(step.name(), result, duration));
        }

        RunReport::new(self.mode, started_at, Utc::now(), records)
    }

    /// Run one step on a worker thread and wait for it, up to the timeout.
    fn run_step(&self, step: &Arc<dyn ConvergenceStep>, ctx: &Arc<Context>) -> StepResult {
        let (tx, rx) = mpsc::channel();
        let worker_step = Arc::clone(step);
        let worker_ctx = Arc::clone(ctx);
        let mode = self.mode;
        let verify = self.policy.verify;
        let span = tracing::info_span!("converge", step = step.name());

        let spawned = thread::Builder::new()
            .name(format!("step-{}", step.name()))
            .spawn(move || {
                let _entered = span.entered();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    converge(worker_step.as_ref(), &worker_ctx, mode, verify)
                }));
                let result = outcome.unwrap_or_else(|payload| {
                    StepResult::Failed(StepError::CollaboratorFailure(format!(
                        "step panicked: {}",
                        panic_message(&*payload)
                    )))
                });
                tx.send(result).ok();
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return StepResult::Failed(StepError::CollaboratorFailure(format!(
                    "cannot start worker thread: {e}"
                )));
            }
        };

        let received = match self.policy.step_timeout {
            Some(limit) => match rx.recv_timeout(limit) {
                Ok(result) => Some(result),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // The worker is abandoned; it may still be running.
                    return StepResult::Failed(StepError::Timeout(limit));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => None,
            },
            None => rx.recv().ok(),
        };
        handle.join().ok();
        received.unwrap_or_else(|| {
            StepResult::Failed(StepError::CollaboratorFailure(
                "step worker exited without a result".to_string(),
            ))
        })
    }
}

/// Check, then apply if needed, then optionally verify.
fn converge(step: &dyn ConvergenceStep, ctx: &Context, mode: RunMode, verify: bool) -> StepResult {
    let reason = match step.check(ctx) {
        Ok(Probe::Satisfied) => return StepResult::AlreadySatisfied,
        Ok(Probe::Unsatisfied(reason)) => reason,
        Err(err) => return StepResult::Failed(err),
    };

    if mode == RunMode::Check {
        ctx.log.dry_run(&format!("would apply: {reason}"));
        return StepResult::WouldApply(reason);
    }

    ctx.log.debug(&format!("unsatisfied: {reason}"));
    if let Err(err) = step.apply(ctx) {
        return StepResult::Failed(err);
    }
    if !verify {
        return StepResult::Applied;
    }
    match step.check(ctx) {
        Ok(Probe::Satisfied) => StepResult::Applied,
        Ok(Probe::Unsatisfied(reason)) => StepResult::Failed(StepError::NotConverged(reason)),
        Err(err) => StepResult::Failed(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::test_helpers::FakeHost;
    use crate::steps::test_helpers::context;

    /// Satisfied once applied.
    #[derive(Debug)]
    struct Converges {
        name: &'static str,
        done: AtomicBool,
    }

    impl Converges {
        fn new(name: &'static str) -> Arc<dyn ConvergenceStep> {
            Arc::new(Self {
                name,
                done: AtomicBool::new(false),
            })
        }
    }

    impl ConvergenceStep for Converges {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self, _config: &Config) -> String {
            format!("converge {}", self.name)
        }
        fn check(&self, _ctx: &Context) -> Result<Probe, StepError> {
            Ok(if self.done.load(Ordering::SeqCst) {
                Probe::Satisfied
            } else {
                Probe::Unsatisfied("pending".to_string())
            })
        }
        fn apply(&self, _ctx: &Context) -> Result<(), StepError> {
            self.done.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Misbehaves in `apply` in the chosen way.
    #[derive(Debug)]
    enum Broken {
        Fails(&'static str),
        Panics,
        Sleeps(Duration),
        NeverConverges,
        Cancels(CancelToken),
    }

    impl ConvergenceStep for Broken {
        fn name(&self) -> &str {
            match self {
                Self::Fails(name) => name,
                Self::Panics => "panics",
                Self::Sleeps(_) => "sleeps",
                Self::NeverConverges => "never-converges",
                Self::Cancels(_) => "cancels",
            }
        }
        fn description(&self, _config: &Config) -> String {
            String::new()
        }
        fn check(&self, _ctx: &Context) -> Result<Probe, StepError> {
            Ok(Probe::Unsatisfied("broken".to_string()))
        }
        fn apply(&self, _ctx: &Context) -> Result<(), StepError> {
            match self {
                Self::Fails(_) => Err(StepError::CollaboratorFailure("boom".to_string())),
                Self::Panics => panic!("collaborator exploded"),
                Self::Sleeps(d) => {
                    thread::sleep(*d);
                    Ok(())
                }
                Self::NeverConverges => Ok(()),
                Self::Cancels(token) => {
                    token.cancel();
                    Ok(())
                }
            }
        }
    }

    fn ctx() -> Arc<Context> {
        Arc::new(context(&FakeHost::new()))
    }

    fn statuses(report: &RunReport) -> Vec<&'static str> {
        report.records().iter().map(|r| r.result.status()).collect()
    }

    // -----------------------------------------------------------------------
    // Failure policy
    // -----------------------------------------------------------------------

    #[test]
    fn fail_fast_skips_remaining_steps() {
        let plan = Plan::from_steps(vec![
            Converges::new("a"),
            Arc::new(Broken::Fails("b")),
            Converges::new("c"),
        ]);
        let report = Orchestrator::default().run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["applied", "failed", "skipped"]);
        assert_eq!(
            report.result_of("c"),
            Some(&StepResult::Skipped(SkipReason::PriorFailure("b".to_string())))
        );
        assert_eq!(report.failed_step().map(|r| r.name.as_str()), Some("b"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn continue_on_error_runs_everything() {
        let plan = Plan::from_steps(vec![Arc::new(Broken::Fails("a")), Converges::new("b")]);
        let policy = Policy {
            continue_on_error: true,
            ..Policy::default()
        };
        let report = Orchestrator::new(policy, RunMode::Apply).run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["failed", "applied"]);
        assert!(!report.is_success());
    }

    #[test]
    fn optional_step_failure_does_not_halt() {
        let plan = Plan::from_steps(vec![Arc::new(Broken::Fails("a")), Converges::new("b")]);
        let policy = Policy {
            optional_steps: vec!["a".to_string()],
            ..Policy::default()
        };
        let report = Orchestrator::new(policy, RunMode::Apply).run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["failed", "applied"]);
    }

    #[test]
    fn timeout_halts_even_with_continue_on_error() {
        let plan = Plan::from_steps(vec![
            Arc::new(Broken::Sleeps(Duration::from_secs(5))),
            Converges::new("after"),
        ]);
        let policy = Policy {
            continue_on_error: true,
            step_timeout: Some(Duration::from_millis(50)),
            ..Policy::default()
        };
        let started = Instant::now();
        let report = Orchestrator::new(policy, RunMode::Apply).run(&plan, &ctx());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            report.result_of("sleeps"),
            Some(&StepResult::Failed(StepError::Timeout(Duration::from_millis(50))))
        );
        assert_eq!(
            report.result_of("after"),
            Some(&StepResult::Skipped(SkipReason::PriorFailure(
                "sleeps".to_string()
            )))
        );
    }

    #[test]
    fn panic_is_contained_as_failure() {
        let plan = Plan::from_steps(vec![Arc::new(Broken::Panics), Converges::new("after")]);
        let report = Orchestrator::default().run(&plan, &ctx());
        assert_eq!(
            report.result_of("panics"),
            Some(&StepResult::Failed(StepError::CollaboratorFailure(
                "step panicked: collaborator exploded".to_string()
            )))
        );
        assert_eq!(statuses(&report), vec!["failed", "skipped"]);
    }

    #[test]
    fn unconverged_apply_is_a_failure() {
        let plan = Plan::from_steps(vec![Arc::new(Broken::NeverConverges)]);
        let report = Orchestrator::default().run(&plan, &ctx());
        assert_eq!(
            report.result_of("never-converges"),
            Some(&StepResult::Failed(StepError::NotConverged(
                "broken".to_string()
            )))
        );
    }

    #[test]
    fn verify_off_trusts_apply() {
        let plan = Plan::from_steps(vec![Arc::new(Broken::NeverConverges)]);
        let policy = Policy {
            verify: false,
            ..Policy::default()
        };
        let report = Orchestrator::new(policy, RunMode::Apply).run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["applied"]);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn cancellation_lets_current_step_finish_and_skips_the_rest() {
        let token = CancelToken::new();
        let plan = Plan::from_steps(vec![
            Arc::new(Broken::Cancels(token.clone())),
            Converges::new("b"),
            Converges::new("c"),
        ]);
        let policy = Policy {
            verify: false,
            ..Policy::default()
        };
        let report = Orchestrator::new(policy, RunMode::Apply)
            .with_cancel_token(token)
            .run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["applied", "skipped", "skipped"]);
        assert_eq!(
            report.result_of("b"),
            Some(&StepResult::Skipped(SkipReason::Cancelled))
        );
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let step = Converges::new("a");
        let plan = Plan::from_steps(vec![Arc::clone(&step)]);
        let report = Orchestrator::default()
            .with_cancel_token(token)
            .run(&plan, &ctx());
        assert_eq!(statuses(&report), vec!["skipped"]);
        assert!(matches!(
            step.check(&ctx()).unwrap(),
            Probe::Unsatisfied(_)
        ));
    }

    // -----------------------------------------------------------------------
    // Standard plan against the fake host
    // -----------------------------------------------------------------------

    #[test]
    fn first_run_applies_everything_second_run_changes_nothing() {
        let host = FakeHost::new();
        let ctx = Arc::new(context(&host));
        let plan = Plan::standard();

        let first = Orchestrator::default().run(&plan, &ctx);
        assert!(
            first
                .records()
                .iter()
                .all(|r| r.result == StepResult::Applied),
            "{first:?}"
        );
        let ops = host.operations();
        let pos = |prefix: &str| ops.iter().position(|op| op.starts_with(prefix)).unwrap();
        assert!(pos("mount /dev/sdb") < pos("pip install"));
        assert!(pos("mount /dev/sdc") < pos("pip install"));
        assert!(ops.contains(&"pip install boto docopt docker-py==1.9.0".to_string()));

        let second = Orchestrator::default().run(&plan, &ctx);
        assert!(
            second
                .records()
                .iter()
                .all(|r| r.result == StepResult::AlreadySatisfied),
            "{second:?}"
        );
        assert_eq!(host.operations(), ops, "second run must not touch the host");
        assert_eq!(second.exit_code(), 0);
    }

    #[test]
    fn check_mode_reports_pending_work_without_changes() {
        let host = FakeHost::new();
        let ctx = Arc::new(context(&host));
        let report = Orchestrator::new(Policy::default(), RunMode::Check)
            .run(&Plan::standard(), &ctx);
        assert_eq!(report.count("would_apply"), Plan::standard().len());
        assert!(host.operations().is_empty());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.mode(), RunMode::Check);
    }

    #[test]
    fn mount_conflict_halts_before_packages() {
        let host = FakeHost::new();
        host.state()
            .mounts
            .insert("/backup".into(), "/dev/sdd".into());
        let ctx = Arc::new(context(&host));
        let report = Orchestrator::default().run(&Plan::standard(), &ctx);
        assert!(matches!(
            report.result_of("mount-backup"),
            Some(StepResult::Failed(StepError::MountConflict { .. }))
        ));
        assert_eq!(report.count("skipped"), Plan::standard().len() - 1);
        assert!(host.operations().is_empty());
    }

    #[test]
    fn policy_from_settings_copies_every_field() {
        let settings = PolicySettings {
            continue_on_error: true,
            optional_steps: vec!["fetch-source".to_string()],
            step_timeout: Some(Duration::from_secs(600)),
            verify: false,
        };
        let policy = Policy::from(&settings);
        assert!(policy.continue_on_error);
        assert_eq!(policy.optional_steps, vec!["fetch-source"]);
        assert_eq!(policy.step_timeout, Some(Duration::from_secs(600)));
        assert!(!policy.verify);
    }
}

//! Idempotent convergence steps and the fixed plan that orders them.
pub mod container;
mod context;
pub mod dependencies;
pub mod kernel;
pub mod mount;
pub mod packages;
pub mod runtime;
pub mod source;
pub mod version_manager;

pub use context::Context;

use std::sync::Arc;

use crate::config::Config;
use crate::error::StepError;

/// What a step's `check` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The host already is in the desired state.
    Satisfied,
    /// `apply` is needed, for the given reason.
    Unsatisfied(String),
}

/// A named unit of work that brings one aspect of the host to a desired state.
///
/// `check` must not change the host. `apply` must be safe to run again after
/// a partial or complete earlier run.
pub trait ConvergenceStep: Send + Sync + std::fmt::Debug {
    /// Stable identifier used in reports and `policy.optional_steps`.
    fn name(&self) -> &str;

    /// One-line summary for `plan` output.
    fn description(&self, config: &Config) -> String;

    /// Whether a failure of this step halts a fail-fast run.
    ///
    /// `policy.optional_steps` can still downgrade a critical step.
    fn critical(&self) -> bool {
        true
    }

    /// Inspect the host.
    ///
    /// # Errors
    ///
    /// Returns an error when the host cannot be inspected or is in a state
    /// the step must not touch.
    fn check(&self, ctx: &Context) -> Result<Probe, StepError>;

    /// Change the host so that `check` becomes satisfied.
    ///
    /// # Errors
    ///
    /// Returns an error if any collaborator fails or a guard refuses.
    fn apply(&self, ctx: &Context) -> Result<(), StepError>;
}

/// The ordered list of steps a run executes.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<Arc<dyn ConvergenceStep>>,
}

impl Plan {
    /// The provisioning sequence: volumes first, then packages, the container
    /// runtime, the interpreter toolchain, the checkout and kernel tuning.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            steps: vec![
                Arc::new(mount::MountFilesystem::backup()),
                Arc::new(mount::MountFilesystem::data()),
                Arc::new(packages::InstallPackages),
                Arc::new(container::InstallContainerRuntime),
                Arc::new(version_manager::InstallVersionManager),
                Arc::new(runtime::InstallLanguageRuntime),
                Arc::new(dependencies::InstallDependencies),
                Arc::new(source::FetchSource),
                Arc::new(kernel::ApplyKernelParameters),
            ],
        }
    }

    /// Build a plan from arbitrary steps.
    #[cfg(test)]
    pub fn from_steps(steps: Vec<Arc<dyn ConvergenceStep>>) -> Self {
        Self { steps }
    }

    /// Steps in run order.
    #[must_use]
    pub fn steps(&self) -> &[Arc<dyn ConvergenceStep>] {
        &self.steps
    }

    /// Step names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}


#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::test_helpers::scenario_config;

    #[test]
    fn standard_plan_order_is_fixed() {
        assert_eq!(
            Plan::standard().names(),
            vec![
                "mount-backup",
                "mount-data",
                "install-packages",
                "install-container-runtime",
                "install-version-manager",
                "install-language-runtime",
                "install-dependencies",
                "fetch-source",
                "apply-kernel-parameters",
            ]
        );
    }

    #[test]
    fn mounts_precede_dependencies() {
        let plan = Plan::standard();
        let names = plan.names();
        let pos = |n: &str| names.iter().position(|s| *s == n).unwrap();
        assert!(pos("mount-backup") < pos("install-dependencies"));
        assert!(pos("mount-data") < pos("install-dependencies"));
        assert!(pos("install-version-manager") < pos("install-language-runtime"));
        assert!(pos("install-language-runtime") < pos("install-dependencies"));
    }

    #[test]
    fn step_names_are_unique() {
        let plan = Plan::standard();
        let mut names = plan.names();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn every_step_describes_itself() {
        let config = scenario_config();
        for step in Plan::standard().steps() {
            assert!(!step.description(&config).is_empty(), "{}", step.name());
            assert!(step.critical(), "{} should be critical", step.name());
        }
    }
}

//! Per-step outcomes and the run report.
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct as _, Serializer};

use crate::error::StepError;

/// Whether steps are applied or only checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Check each step and apply the unsatisfied ones.
    #[default]
    Apply,
    /// Check only; never change the host.
    Check,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Check => write!(f, "check"),
        }
    }
}

/// Why a step was not started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// An earlier step failed and the policy halted the run.
    PriorFailure(String),
    /// The run was interrupted.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriorFailure(step) => write!(f, "{step} failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// `check` was satisfied; nothing was done.
    AlreadySatisfied,
    /// `apply` ran and the host converged.
    Applied,
    /// Check-only run: `apply` would have run for this reason.
    WouldApply(String),
    /// The step failed.
    Failed(StepError),
    /// The step never started.
    Skipped(SkipReason),
}

impl StepResult {
    /// Stable lowercase status used in JSON output.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::AlreadySatisfied => "already_satisfied",
            Self::Applied => "applied",
            Self::WouldApply(_) => "would_apply",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    /// Human-readable detail, if the outcome carries one.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::AlreadySatisfied | Self::Applied => None,
            Self::WouldApply(reason) => Some(reason.clone()),
            Self::Failed(err) => Some(err.to_string()),
            Self::Skipped(reason) => Some(reason.to_string()),
        }
    }

    /// Whether the host is in the desired state for this step.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::AlreadySatisfied | Self::Applied)
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Outcome.
    pub result: StepResult,
    /// Wall-clock time spent in the step.
    pub duration: Duration,
}

impl StepRecord {
    /// Create a record.
    #[must_use]
    pub fn new(name: impl Into<String>, result: StepResult, duration: Duration) -> Self {
        Self {
            name: name.into(),
            result,
            duration,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Serialize for StepRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("StepRecord", 4)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("status", self.result.status())?;
        s.serialize_field("detail", &self.result.detail())?;
        s.serialize_field("duration_ms", &millis(self.duration))?;
        s.end()
    }
}

/// Ordered record of one run. Read-only once returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    mode: RunMode,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    records: Vec<StepRecord>,
}

impl RunReport {
    pub(crate) const fn new(
        mode: RunMode,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        records: Vec<StepRecord>,
    ) -> Self {
        Self {
            mode,
            started_at,
            finished_at,
            records,
        }
    }

    /// Mode the run was executed in.
    #[must_use]
    pub const fn mode(&self) -> RunMode {
        self.mode
    }

    /// Records in plan order.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Result recorded for `name`, if the step is part of the report.
    #[must_use]
    pub fn result_of(&self, name: &str) -> Option<&StepResult> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.result)
    }

    /// First failed step.
    #[must_use]
    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.records
            .iter()
            .find(|r| matches!(r.result, StepResult::Failed(_)))
    }

    /// Whether every step ended `AlreadySatisfied` or `Applied`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| r.result.is_converged())
    }

    /// Process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Number of records with the given status.
    #[must_use]
    pub fn count(&self, status: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.result.status() == status)
            .count()
    }

    /// Total wall-clock time of the run.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Pretty-printed JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for RunReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RunReport", 6)?;
        s.serialize_field("mode", &self.mode.to_string())?;
        s.serialize_field("started_at", &self.started_at)?;
        s.serialize_field("finished_at", &self.finished_at)?;
        s.serialize_field("success", &self.is_success())?;
        s.serialize_field("failed_step", &self.failed_step().map(|r| r.name.as_str()))?;
        s.serialize_field("steps", &self.records)?;
        s.end()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn report(results: Vec<(&str, StepResult)>) -> RunReport {
        let now = Utc::now();
        RunReport::new(
            RunMode::Apply,
            now,
            now,
            results
                .into_iter()
                .map(|(n, r)| StepRecord::new(n, r, Duration::from_millis(5)))
                .collect(),
        )
    }

    #[test]
    fn success_requires_every_step_converged() {
        let ok = report(vec![
            ("mount-backup", StepResult::AlreadySatisfied),
            ("install-packages", StepResult::Applied),
        ]);
        assert!(ok.is_success());
        assert_eq!(ok.exit_code(), 0);

        let pending = report(vec![(
            "install-packages",
            StepResult::WouldApply("missing: git".to_string()),
        )]);
        assert!(!pending.is_success());
        assert_eq!(pending.exit_code(), 1);
    }

    #[test]
    fn failed_step_is_first_failure() {
        let r = report(vec![
            ("mount-backup", StepResult::Applied),
            (
                "mount-data",
                StepResult::Failed(StepError::CollaboratorFailure("boom".to_string())),
            ),
            (
                "install-packages",
                StepResult::Skipped(SkipReason::PriorFailure("mount-data".to_string())),
            ),
        ]);
        assert_eq!(r.failed_step().map(|s| s.name.as_str()), Some("mount-data"));
        assert_eq!(r.count("skipped"), 1);
    }

    #[test]
    fn json_names_failed_step_and_reason() {
        let r = report(vec![(
            "install-packages",
            StepResult::Failed(StepError::PartialInstall {
                failed: vec!["gcc44.x86_64".to_string()],
            }),
        )]);
        let json: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "apply");
        assert_eq!(json["success"], false);
        assert_eq!(json["failed_step"], "install-packages");
        assert_eq!(json["steps"][0]["status"], "failed");
        assert_eq!(
            json["steps"][0]["detail"],
            "packages not installed: gcc44.x86_64"
        );
        assert_eq!(json["steps"][0]["duration_ms"], 5);
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(
            SkipReason::PriorFailure("mount-data".to_string()).to_string(),
            "mount-data failed"
        );
        assert_eq!(SkipReason::Cancelled.to_string(), "cancelled");
    }
}

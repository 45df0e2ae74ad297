//! OS package queries and batch installation.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::Executor;

/// System package manager.
#[cfg_attr(test, mockall::automock)]
pub trait PackageManager: Send + Sync + std::fmt::Debug {
    /// Whether `name` is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be queried.
    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Install every package in `names` in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the package tool fails.
    fn install_all(&self, names: &[String]) -> Result<()>;
}

/// RPM-based package manager driving `yum` or `dnf`.
#[derive(Debug)]
pub struct RpmPackageManager {
    tool: &'static str,
    executor: Arc<dyn Executor>,
}

impl RpmPackageManager {
    /// Create a package manager using `tool` (`yum` or `dnf`) for installs.
    #[must_use]
    pub const fn new(tool: &'static str, executor: Arc<dyn Executor>) -> Self {
        Self { tool, executor }
    }
}

impl PackageManager for RpmPackageManager {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let result = self
            .executor
            .run_unchecked("rpm", &["-q", "--quiet", name])
            .context("querying rpm database")?;
        Ok(result.success)
    }

    fn install_all(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "-y"];
        args.extend(names.iter().map(String::as_str));
        tracing::debug!("{} {}", self.tool, args.join(" "));
        self.executor
            .run(self.tool, &args)
            .with_context(|| format!("{} install failed", self.tool))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    #[test]
    fn is_installed_follows_rpm_exit_status() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (true, String::new()),
            (false, String::new()),
        ]));
        let pm = RpmPackageManager::new("yum", executor.clone());

        assert!(pm.is_installed("git.x86_64").unwrap());
        assert!(!pm.is_installed("gcc44.x86_64").unwrap());
        assert_eq!(
            executor.calls(),
            vec!["rpm -q --quiet git.x86_64", "rpm -q --quiet gcc44.x86_64"]
        );
    }

    #[test]
    fn install_all_issues_one_batch() {
        let executor = Arc::new(MockExecutor::ok(""));
        let pm = RpmPackageManager::new("dnf", executor.clone());

        pm.install_all(&["wget.x86_64".to_string(), "patch.x86_64".to_string()])
            .unwrap();
        assert_eq!(executor.calls(), vec!["dnf install -y wget.x86_64 patch.x86_64"]);
    }

    #[test]
    fn install_all_with_nothing_runs_nothing() {
        let executor = Arc::new(MockExecutor::with_responses(vec![]));
        let pm = RpmPackageManager::new("yum", executor.clone());
        pm.install_all(&[]).unwrap();
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn install_failure_is_propagated() {
        let executor = Arc::new(MockExecutor::fail());
        let pm = RpmPackageManager::new("yum", executor);
        let err = pm.install_all(&["git".to_string()]).unwrap_err();
        assert!(format!("{err:#}").contains("yum install failed"));
    }
}

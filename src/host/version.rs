//! Interpreter versions managed through pyenv.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::Executor;

/// Language version manager.
#[cfg_attr(test, mockall::automock)]
pub trait VersionManager: Send + Sync + std::fmt::Debug {
    /// Whether `version` has been built.
    ///
    /// # Errors
    ///
    /// Returns an error if the version manager cannot be invoked.
    fn is_installed(&self, version: &str) -> Result<bool>;

    /// The global default version, if one is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the version manager cannot be invoked.
    fn global(&self) -> Result<Option<String>>;

    /// Build and install `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails.
    fn install_version(&self, version: &str) -> Result<()>;

    /// Make `version` the global default.
    ///
    /// # Errors
    ///
    /// Returns an error if the version manager rejects the version.
    fn set_global(&self, version: &str) -> Result<()>;

    /// Run a program of `version` (e.g. `pip`) and return its stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the program exits non-zero.
    fn run_script(&self, version: &str, args: &[String]) -> Result<String>;
}

/// [`VersionManager`] driving a pyenv checkout.
#[derive(Debug)]
pub struct Pyenv {
    root: PathBuf,
    executor: Arc<dyn Executor>,
}

impl Pyenv {
    /// Create a pyenv driver for the checkout at `root` (`PYENV_ROOT`).
    #[must_use]
    pub const fn new(root: PathBuf, executor: Arc<dyn Executor>) -> Self {
        Self { root, executor }
    }

    fn binary(&self) -> String {
        self.root.join("bin").join("pyenv").to_string_lossy().into_owned()
    }

    /// Whether the checkout exists yet. Queries against a missing checkout
    /// mean "nothing installed", not a failure.
    fn is_present(&self) -> bool {
        self.executor.which(&self.binary())
    }

    fn pyenv(&self, args: &[&str], version: Option<&str>) -> Result<String> {
        let root = self.root.to_string_lossy();
        let mut env = vec![("PYENV_ROOT", &*root)];
        if let Some(version) = version {
            env.push(("PYENV_VERSION", version));
        }
        let result = self
            .executor
            .run_with_env(&self.binary(), args, &env)
            .with_context(|| format!("pyenv {}", args.join(" ")))?;
        Ok(result.stdout)
    }
}

impl VersionManager for Pyenv {
    fn is_installed(&self, version: &str) -> Result<bool> {
        if !self.is_present() {
            return Ok(false);
        }
        let versions = self.pyenv(&["versions", "--bare"], None)?;
        Ok(versions.lines().any(|v| v.trim() == version))
    }

    fn global(&self) -> Result<Option<String>> {
        if !self.is_present() {
            return Ok(None);
        }
        let current = self.pyenv(&["global"], None)?;
        Ok(current
            .lines()
            .next()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }

    fn install_version(&self, version: &str) -> Result<()> {
        self.pyenv(&["install", "-s", version], None)?;
        Ok(())
    }

    fn set_global(&self, version: &str) -> Result<()> {
        self.pyenv(&["global", version], None)?;
        Ok(())
    }

    fn run_script(&self, version: &str, args: &[String]) -> Result<String> {
        let mut full = vec!["exec"];
        full.extend(args.iter().map(String::as_str));
        self.pyenv(&full, Some(version))
    }
}

//! Python module requirements and their installation through pip.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::VersionManager;

/// Installed modules keyed by normalized name, valued by version.
pub type InstalledModules = BTreeMap<String, String>;

/// Fold a module name the way pip compares names.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['_', '.'], "-")
}

/// A module that must be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any installed version satisfies; pip installs the latest.
    Latest(String),
    /// Exactly this version must be installed.
    Pinned {
        /// Module name.
        name: String,
        /// Required version.
        version: String,
    },
}

impl Requirement {
    /// Module name as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Latest(name) | Self::Pinned { name, .. } => name,
        }
    }

    /// Whether the installed set already satisfies this requirement.
    #[must_use]
    pub fn is_satisfied_by(&self, installed: &InstalledModules) -> bool {
        let current = installed.get(&normalize_name(self.name()));
        match self {
            Self::Latest(_) => current.is_some(),
            Self::Pinned { version, .. } => current.is_some_and(|v| v == version),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest(name) => write!(f, "{name}"),
            Self::Pinned { name, version } => write!(f, "{name}=={version}"),
        }
    }
}

/// Parse `pip freeze` output.
#[must_use]
pub fn parse_freeze(output: &str) -> InstalledModules {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            if let Some((name, version)) = line.split_once("==") {
                Some((normalize_name(name), version.trim().to_string()))
            } else {
                // direct references ("name @ url") carry no comparable version
                line.split_once(" @ ")
                    .map(|(name, _)| (normalize_name(name), String::new()))
            }
        })
        .collect()
}

/// Installs language modules for an interpreter version.
#[cfg_attr(test, mockall::automock)]
pub trait DependencyInstaller: Send + Sync + std::fmt::Debug {
    /// Modules installed for `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the installer cannot list modules.
    fn installed(&self, version: &str) -> Result<InstalledModules>;

    /// Install all `requirements` in one invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the install fails.
    fn install(&self, version: &str, requirements: &[Requirement]) -> Result<()>;
}

/// [`DependencyInstaller`] running pip through the version manager.
#[derive(Debug)]
pub struct PipInstaller {
    versions: Arc<dyn VersionManager>,
}

impl PipInstaller {
    /// Create an installer that resolves `pip` through `versions`.
    #[must_use]
    pub const fn new(versions: Arc<dyn VersionManager>) -> Self {
        Self { versions }
    }
}

impl DependencyInstaller for PipInstaller {
    fn installed(&self, version: &str) -> Result<InstalledModules> {
        if !self.versions.is_installed(version)? {
            return Ok(InstalledModules::new());
        }
        // `--format` is missing from the pip bundled with older interpreters
        let args = ["pip", "freeze"].map(String::from);
        let output = self
            .versions
            .run_script(version, &args)
            .context("listing installed modules")?;
        Ok(parse_freeze(&output))
    }

    fn install(&self, version: &str, requirements: &[Requirement]) -> Result<()> {
        if requirements.is_empty() {
            return Ok(());
        }
        let upgrade = ["pip", "install", "--upgrade", "pip"].map(String::from);
        self.versions
            .run_script(version, &upgrade)
            .context("upgrading pip")?;

        let mut args = vec!["pip".to_string(), "install".to_string()];
        args.extend(requirements.iter().map(ToString::to_string));
        tracing::debug!("{}", args.join(" "));
        self.versions
            .run_script(version, &args)
            .context("pip install failed")?;
        Ok(())
    }
}

//! Loading kernel parameters into the running kernel.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::Executor;

/// Applies a sysctl configuration file to the running kernel.
#[cfg_attr(test, mockall::automock)]
pub trait KernelParameterWriter: Send + Sync + std::fmt::Debug {
    /// Load every parameter in `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the file.
    fn load(&self, file: &Path) -> Result<()>;

    /// Value the running kernel holds for `key`, whitespace collapsed, or
    /// `None` when the kernel does not know the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be run.
    fn live_value(&self, key: &str) -> Result<Option<String>>;
}

/// Split a `key = value` parameter line into its key and normalized value.
///
/// Comments and lines without `=` yield `None`.
#[must_use]
pub fn split_parameter(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.starts_with('#') || line.starts_with(';') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key, normalize_value(value)))
}

/// Collapse runs of whitespace, the way `sysctl -n` prints multi-field values
/// with tabs.
#[must_use]
pub fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`KernelParameterWriter`] using `sysctl -p`.
#[derive(Debug)]
pub struct Sysctl {
    executor: Arc<dyn Executor>,
}

impl Sysctl {
    /// Create a writer running `sysctl` through `executor`.
    #[must_use]
    pub const fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl KernelParameterWriter for Sysctl {
    fn load(&self, file: &Path) -> Result<()> {
        self.executor
            .run("sysctl", &["-p", &file.to_string_lossy()])
            .with_context(|| format!("loading kernel parameters from {}", file.display()))?;
        Ok(())
    }

    fn live_value(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .executor
            .run_unchecked("sysctl", &["-n", key])
            .with_context(|| format!("reading kernel parameter {key}"))?;
        Ok(result.success.then(|| normalize_value(&result.stdout)))
    }
}

//! Container runtime installation from the vendor install script.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use sha2::{Digest as _, Sha256};

use crate::config::ContainerSettings;
use crate::exec::Executor;

/// Installs the container runtime.
#[cfg_attr(test, mockall::automock)]
pub trait ContainerRuntimeInstaller: Send + Sync + std::fmt::Debug {
    /// Whether the runtime binary is on `PATH`.
    fn is_installed(&self, binary: &str) -> bool;

    /// Download and run the install script.
    ///
    /// # Errors
    ///
    /// Returns an error if the download, checksum verification or script fails.
    fn install(&self, settings: &ContainerSettings) -> Result<()>;
}

/// Check `body` against an expected lowercase hex SHA-256 digest.
///
/// # Errors
///
/// Returns an error naming both digests on mismatch.
pub fn verify_checksum(body: &[u8], expected: &str) -> Result<()> {
    let actual = format!("{:x}", Sha256::digest(body));
    if actual != expected {
        bail!("install script checksum mismatch: expected {expected}, got {actual}");
    }
    Ok(())
}

fn download(url: &str) -> Result<String> {
    let mut response = ureq::get(url)
        .call()
        .with_context(|| format!("downloading {url}"))?;
    response
        .body_mut()
        .read_to_string()
        .with_context(|| format!("reading response body from {url}"))
}

/// [`ContainerRuntimeInstaller`] that pipes the vendor script through `sh`.
#[derive(Debug)]
pub struct ScriptInstaller {
    executor: Arc<dyn Executor>,
    scratch: PathBuf,
}

impl ScriptInstaller {
    /// Create an installer staging scripts in the system temp directory.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            scratch: std::env::temp_dir(),
        }
    }

    /// Stage scripts under `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch = dir;
        self
    }

    /// Verify and execute an already downloaded script.
    ///
    /// # Errors
    ///
    /// Returns an error on checksum mismatch or if the script fails.
    pub fn run_script(&self, script: &str, sha256: Option<&str>) -> Result<()> {
        if let Some(expected) = sha256 {
            verify_checksum(script.as_bytes(), expected)?;
        }
        let path = self
            .scratch
            .join(format!("oradock-container-install-{}.sh", std::process::id()));
        std::fs::write(&path, script)
            .with_context(|| format!("writing {}", path.display()))?;
        let result = self.execute(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!("leaving {} behind: {e}", path.display());
        }
        result
    }

    fn execute(&self, path: &Path) -> Result<()> {
        self.executor
            .run("sh", &[&path.to_string_lossy()])
            .context("container runtime install script failed")?;
        Ok(())
    }
}

impl ContainerRuntimeInstaller for ScriptInstaller {
    fn is_installed(&self, binary: &str) -> bool {
        self.executor.which(binary)
    }

    fn install(&self, settings: &ContainerSettings) -> Result<()> {
        tracing::debug!("fetching {}", settings.install_script);
        let script = download(&settings.install_script)?;
        self.run_script(&script, settings.script_sha256.as_deref())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    /// SHA-256 of the empty input.
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn checksum_matches_known_digest() {
        verify_checksum(b"", EMPTY_SHA256).unwrap();
    }

    #[test]
    fn checksum_mismatch_is_an_error() {
        let err = verify_checksum(b"echo hi", EMPTY_SHA256).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn run_script_executes_with_sh_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::ok(""));
        let installer = ScriptInstaller::new(executor.clone()).with_scratch_dir(dir.path().into());

        installer.run_script("echo install", None).unwrap();
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls.iter().all(|c| c.starts_with("sh ")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn run_script_refuses_tampered_script() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::ok(""));
        let installer = ScriptInstaller::new(executor.clone()).with_scratch_dir(dir.path().into());

        assert!(installer.run_script("rm -rf /", Some(EMPTY_SHA256)).is_err());
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn is_installed_uses_path_lookup() {
        let installer = ScriptInstaller::new(Arc::new(MockExecutor::ok("").with_which(true)));
        assert!(installer.is_installed("docker"));
    }
}

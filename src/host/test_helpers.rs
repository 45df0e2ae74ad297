//! Stateful in-memory host for step and orchestrator tests.
//!
//! [`FakeHost`] implements every collaborator trait against one shared
//! [`FakeState`], so an `apply` on one step is visible to the next `check`.
//! Every mutating call is appended to [`FakeState::operations`].
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};

use super::dependency::{InstalledModules, normalize_name};
use super::kernel::split_parameter;
use super::{
    CheckoutState, ContainerRuntimeInstaller, DependencyInstaller, FilesystemManager, Host,
    KernelParameterWriter, LineMatcher, MountRequest, PackageManager, Requirement,
    ServiceManager, SourceFetcher, TextConfigEditor, VersionManager,
};
use crate::config::ContainerSettings;
use crate::error::StepError;

/// A git checkout as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCheckout {
    /// Origin URL.
    pub url: String,
    /// Checked out branch.
    pub branch: String,
    /// Whether it matches upstream.
    pub up_to_date: bool,
}

/// Everything the fake host knows.
#[derive(Debug, Default)]
pub struct FakeState {
    /// Mount point to device.
    pub mounts: BTreeMap<PathBuf, PathBuf>,
    /// Device to filesystem type.
    pub filesystems: BTreeMap<PathBuf, String>,
    /// Installed OS packages.
    pub packages: BTreeSet<String>,
    /// Packages the package tool silently fails to install.
    pub broken_packages: BTreeSet<String>,
    /// Running services.
    pub active_services: BTreeSet<String>,
    /// Binaries on `PATH`.
    pub binaries: BTreeSet<String>,
    /// Directory to checkout.
    pub checkouts: BTreeMap<PathBuf, FakeCheckout>,
    /// Directories holding something other than a checkout.
    pub foreign_dirs: BTreeSet<PathBuf>,
    /// Built interpreter versions.
    pub versions: BTreeSet<String>,
    /// Global interpreter version.
    pub global: Option<String>,
    /// Installed modules per interpreter version.
    pub modules: BTreeMap<String, InstalledModules>,
    /// Text files as lines.
    pub files: BTreeMap<PathBuf, Vec<String>>,
    /// Parameters loaded into the running kernel.
    pub kernel_values: BTreeMap<String, String>,
    /// Number of upcoming `sysctl -p` calls that fail.
    pub failing_loads: usize,
    /// Log of mutating operations, in order.
    pub operations: Vec<String>,
}

/// In-memory implementation of every collaborator.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// A host where nothing is provisioned yet.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock the state for inspection or setup.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutating operations performed so far.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.state().operations.clone()
    }

    /// Contents of a fake text file.
    #[must_use]
    pub fn file(&self, path: &str) -> Vec<String> {
        self.state().files.get(Path::new(path)).cloned().unwrap_or_default()
    }

    /// Build a [`Host`] whose collaborators all point at this fake.
    #[must_use]
    pub fn host(self: &Arc<Self>) -> Host {
        Host {
            packages: Arc::clone(self) as Arc<dyn PackageManager>,
            filesystems: Arc::clone(self) as Arc<dyn FilesystemManager>,
            services: Arc::clone(self) as Arc<dyn ServiceManager>,
            container: Arc::clone(self) as Arc<dyn ContainerRuntimeInstaller>,
            sources: Arc::clone(self) as Arc<dyn SourceFetcher>,
            versions: Arc::clone(self) as Arc<dyn VersionManager>,
            dependencies: Arc::clone(self) as Arc<dyn DependencyInstaller>,
            text: Arc::clone(self) as Arc<dyn TextConfigEditor>,
            kernel: Arc::clone(self) as Arc<dyn KernelParameterWriter>,
        }
    }

    fn record(&self, op: String) {
        self.state().operations.push(op);
    }
}

impl PackageManager for FakeHost {
    fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.state().packages.contains(name))
    }

    fn install_all(&self, names: &[String]) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("install {}", names.join(" ")));
        for name in names {
            if !state.broken_packages.contains(name) {
                state.packages.insert(name.clone());
            }
        }
        Ok(())
    }
}

impl FilesystemManager for FakeHost {
    fn mounted_device(&self, directory: &Path) -> Result<Option<PathBuf>> {
        Ok(self.state().mounts.get(directory).cloned())
    }

    fn existing_filesystem(&self, device: &Path) -> Result<Option<String>> {
        Ok(self.state().filesystems.get(device).cloned())
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!(
            "mount {} {}",
            request.device.display(),
            request.directory.display()
        ));
        state
            .mounts
            .insert(request.directory.clone(), request.device.clone());
        Ok(())
    }

    fn format_and_mount(&self, request: &MountRequest, force: bool) -> Result<()> {
        {
            let mut state = self.state();
            if let Some(existing) = state.filesystems.get(&request.device)
                && !force
            {
                return Err(StepError::DestructiveActionBlocked {
                    device: request.device.clone(),
                    existing: existing.clone(),
                }
                .into());
            }
            state.operations.push(format!(
                "mkfs.{} {}",
                request.fstype,
                request.device.display()
            ));
            state
                .filesystems
                .insert(request.device.clone(), request.fstype.clone());
        }
        self.mount(request)
    }
}

impl ServiceManager for FakeHost {
    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.state().active_services.contains(name))
    }

    fn start(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("start {name}"));
        state.active_services.insert(name.to_string());
        Ok(())
    }
}

impl ContainerRuntimeInstaller for FakeHost {
    fn is_installed(&self, binary: &str) -> bool {
        self.state().binaries.contains(binary)
    }

    fn install(&self, settings: &ContainerSettings) -> Result<()> {
        let mut state = self.state();
        state
            .operations
            .push(format!("container-install {}", settings.install_script));
        state.binaries.insert(settings.binary.clone());
        Ok(())
    }
}

impl SourceFetcher for FakeHost {
    fn is_checkout_of(&self, url: &str, dir: &Path) -> Result<bool> {
        Ok(self.state().checkouts.get(dir).is_some_and(|c| c.url == url))
    }

    fn checkout_state(&self, url: &str, dir: &Path, branch: &str) -> Result<CheckoutState> {
        let state = self.state();
        if state.foreign_dirs.contains(dir) {
            return Ok(CheckoutState::Foreign(format!(
                "{} is not a git repository",
                dir.display()
            )));
        }
        Ok(match state.checkouts.get(dir) {
            None => CheckoutState::Absent,
            Some(c) if c.url != url => CheckoutState::Foreign(format!("checkout of {}", c.url)),
            Some(c) if c.branch != branch || !c.up_to_date => {
                CheckoutState::Drifted("behind upstream".to_string())
            }
            Some(_) => CheckoutState::UpToDate,
        })
    }

    fn sync(&self, url: &str, dir: &Path, branch: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("sync {}", dir.display()));
        match state.checkouts.get_mut(dir) {
            Some(c) if c.url == url => {
                c.branch = branch.to_string();
                c.up_to_date = true;
                Ok(())
            }
            _ => bail!("refusing to sync {}", dir.display()),
        }
    }

    fn clone_repo(&self, url: &str, dir: &Path, branch: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("clone {url} {}", dir.display()));
        state.checkouts.insert(
            dir.to_path_buf(),
            FakeCheckout {
                url: url.to_string(),
                branch: branch.to_string(),
                up_to_date: true,
            },
        );
        Ok(())
    }
}

impl VersionManager for FakeHost {
    fn is_installed(&self, version: &str) -> Result<bool> {
        Ok(self.state().versions.contains(version))
    }

    fn global(&self) -> Result<Option<String>> {
        Ok(self.state().global.clone())
    }

    fn install_version(&self, version: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("pyenv install {version}"));
        state.versions.insert(version.to_string());
        Ok(())
    }

    fn set_global(&self, version: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("pyenv global {version}"));
        state.global = Some(version.to_string());
        Ok(())
    }

    fn run_script(&self, version: &str, args: &[String]) -> Result<String> {
        self.record(format!("pyenv exec {version} {}", args.join(" ")));
        Ok(String::new())
    }
}

impl DependencyInstaller for FakeHost {
    fn installed(&self, version: &str) -> Result<InstalledModules> {
        Ok(self.state().modules.get(version).cloned().unwrap_or_default())
    }

    fn install(&self, version: &str, requirements: &[Requirement]) -> Result<()> {
        let mut state = self.state();
        let args: Vec<String> = requirements.iter().map(ToString::to_string).collect();
        state.operations.push(format!("pip install {}", args.join(" ")));
        let modules = state.modules.entry(version.to_string()).or_default();
        for req in requirements {
            let installed_version = match req {
                Requirement::Latest(_) => "99.0".to_string(),
                Requirement::Pinned { version, .. } => version.clone(),
            };
            modules.insert(normalize_name(req.name()), installed_version);
        }
        Ok(())
    }
}

impl TextConfigEditor for FakeHost {
    fn find_line(&self, file: &Path, matcher: &LineMatcher) -> Result<Option<String>> {
        Ok(self
            .state()
            .files
            .get(file)
            .and_then(|lines| lines.iter().find(|l| matcher.matches(l)).cloned()))
    }

    fn ensure_line(&self, file: &Path, matcher: &LineMatcher, line: &str) -> Result<bool> {
        if self.has_line(file, matcher)? {
            return Ok(false);
        }
        let mut state = self.state();
        state
            .operations
            .push(format!("append {} {}", file.display(), line.trim()));
        state
            .files
            .entry(file.to_path_buf())
            .or_default()
            .extend(line.split('\n').map(str::to_string));
        Ok(true)
    }
}

impl KernelParameterWriter for FakeHost {
    fn load(&self, file: &Path) -> Result<()> {
        let mut state = self.state();
        state.operations.push(format!("sysctl -p {}", file.display()));
        if state.failing_loads > 0 {
            state.failing_loads -= 1;
            bail!("sysctl -p {}: permission denied", file.display());
        }
        // Steps wired to a real text editor write to disk instead of the fake.
        let lines = state.files.get(file).cloned().unwrap_or_else(|| {
            std::fs::read_to_string(file)
                .map(|content| content.lines().map(str::to_string).collect())
                .unwrap_or_default()
        });
        for line in &lines {
            if let Some((key, value)) = split_parameter(line) {
                state.kernel_values.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state().kernel_values.get(key).cloned())
    }
}

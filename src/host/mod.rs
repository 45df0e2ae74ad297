//! Collaborators that touch the host.
//!
//! Every external effect a step needs goes through one of the traits in this
//! module. [`Host`] bundles one implementation of each; [`Host::system`]
//! wires the real ones, tests wire fakes or `mockall` mocks.
pub mod container;
pub mod dependency;
pub mod filesystem;
pub mod kernel;
pub mod package;
pub mod service;
pub mod source;
pub mod text;
pub mod version;

#[cfg(test)]
pub mod test_helpers;

use std::sync::Arc;

use crate::config::Config;
use crate::exec::Executor;
use crate::platform::Platform;

pub use container::{ContainerRuntimeInstaller, ScriptInstaller};
pub use dependency::{DependencyInstaller, PipInstaller, Requirement};
pub use filesystem::{FilesystemManager, MountRequest, SystemFilesystem};
pub use kernel::{KernelParameterWriter, Sysctl};
pub use package::{PackageManager, RpmPackageManager};
pub use service::{ServiceManager, SystemServiceManager};
pub use source::{CheckoutState, GitSourceFetcher, SourceFetcher};
pub use text::{FileTextEditor, LineMatcher, TextConfigEditor};
pub use version::{Pyenv, VersionManager};

/// The collaborator bundle handed to every step.
#[derive(Debug, Clone)]
pub struct Host {
    /// OS package manager.
    pub packages: Arc<dyn PackageManager>,
    /// Mounts and filesystems.
    pub filesystems: Arc<dyn FilesystemManager>,
    /// Service supervisor.
    pub services: Arc<dyn ServiceManager>,
    /// Container runtime installer.
    pub container: Arc<dyn ContainerRuntimeInstaller>,
    /// Git checkouts.
    pub sources: Arc<dyn SourceFetcher>,
    /// Language version manager.
    pub versions: Arc<dyn VersionManager>,
    /// Language package installer.
    pub dependencies: Arc<dyn DependencyInstaller>,
    /// Line-oriented config file editor.
    pub text: Arc<dyn TextConfigEditor>,
    /// Kernel parameter loader.
    pub kernel: Arc<dyn KernelParameterWriter>,
}

impl Host {
    /// Wire the production collaborators for `platform`.
    #[must_use]
    pub fn system(platform: &Platform, executor: Arc<dyn Executor>, config: &Config) -> Self {
        let versions: Arc<dyn VersionManager> = Arc::new(Pyenv::new(
            config.runtime.root_path.clone(),
            Arc::clone(&executor),
        ));
        Self {
            packages: Arc::new(RpmPackageManager::new(
                platform.package_tool(),
                Arc::clone(&executor),
            )),
            filesystems: Arc::new(SystemFilesystem::new(Arc::clone(&executor))),
            services: Arc::new(SystemServiceManager::new(platform.init, Arc::clone(&executor))),
            container: Arc::new(ScriptInstaller::new(Arc::clone(&executor))),
            sources: Arc::new(GitSourceFetcher),
            dependencies: Arc::new(PipInstaller::new(Arc::clone(&versions))),
            versions,
            text: Arc::new(FileTextEditor),
            kernel: Arc::new(Sysctl::new(executor)),
        }
    }
}

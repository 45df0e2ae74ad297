//! Provisioning configuration.
//!
//! The TOML document is deserialized into raw structs by [`toml_loader`],
//! then validated field by field into the immutable [`Config`] shared with
//! every step through `Arc<Config>`.
mod toml_loader;
pub mod validation;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use toml_loader::RawConfig;
use validation::{
    absolute_path, kernel_parameter, non_empty, octal_mode, require, sha256, token, token_list,
    url,
};
pub use validation::ValidationWarning;

/// Default configuration path when neither `--config` nor the environment
/// variable is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/oradock/provision.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV_VAR: &str = "ORADOCK_PROVISION_CONFIG";

/// A block device mounted at a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Mount point directory.
    pub directory: PathBuf,
    /// Block device, e.g. `/dev/sdb`.
    pub device: PathBuf,
}

/// How mounted filesystems are created and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemSettings {
    /// Filesystem type passed to `mkfs.<fstype>` and `mount -t`.
    pub fstype: String,
    /// Owner of the mount point directory.
    pub owner: String,
    /// Group of the mount point directory.
    pub group: String,
    /// Permission bits of the mount point directory.
    pub mode: u32,
    /// Allow reformatting a device that already holds a different filesystem.
    pub force: bool,
    /// Record the mount in fstab so it survives reboots.
    pub enable: bool,
    /// Path of the fstab file.
    pub fstab: PathBuf,
    /// Mount options written to fstab.
    pub options: String,
}

/// Container runtime installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// URL of the vendor install script.
    pub install_script: String,
    /// Expected SHA-256 of the script, when pinned.
    pub script_sha256: Option<String>,
    /// Service name to start.
    pub service: String,
    /// Binary whose presence marks the runtime as installed.
    pub binary: String,
}

/// Language version manager checkout and shell integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionManagerSettings {
    /// Git URL of the version manager.
    pub repository: String,
    /// Branch cloned into the runtime root.
    pub branch: String,
    /// Login profile receiving the init lines.
    pub profile: PathBuf,
    /// Lines that must be present in the profile.
    pub init_lines: Vec<String>,
}

/// Interpreter and Python modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Interpreter version, e.g. `3.5.1`.
    pub version: String,
    /// Root of the version manager checkout (`PYENV_ROOT`).
    pub root_path: PathBuf,
    /// Modules installed at their latest version.
    pub default_modules: Vec<String>,
    /// Module installed at a pinned version.
    pub extra_module: String,
    /// Pinned version of [`Self::extra_module`].
    pub extra_module_version: String,
}

/// Deployment repository checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Git URL.
    pub repository: String,
    /// Checkout directory.
    pub directory: PathBuf,
    /// Tracked branch.
    pub branch: String,
}

/// Kernel parameter file management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSettings {
    /// sysctl configuration file.
    pub file: PathBuf,
    /// Comment written once before the parameters.
    pub header: String,
    /// `key = value` lines.
    pub parameters: Vec<String>,
    /// Run `sysctl -p` after writing.
    pub reload: bool,
}

/// Failure policy defaults, overridable from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySettings {
    /// Keep running after a failed step.
    pub continue_on_error: bool,
    /// Step names whose failure never halts the run.
    pub optional_steps: Vec<String>,
    /// Per-step time limit.
    pub step_timeout: Option<Duration>,
    /// Re-check each step after applying it.
    pub verify: bool,
}

/// Fully validated provisioning configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backup volume.
    pub backup: MountPoint,
    /// Data volume.
    pub data: MountPoint,
    /// Filesystem creation settings shared by both volumes.
    pub filesystem: FilesystemSettings,
    /// OS packages to install.
    pub packages: Vec<String>,
    /// Container runtime.
    pub container: ContainerSettings,
    /// Version manager.
    pub version_manager: VersionManagerSettings,
    /// Interpreter and modules.
    pub runtime: RuntimeSettings,
    /// Deployment repository.
    pub source: SourceSettings,
    /// Kernel parameters.
    pub kernel: KernelSettings,
    /// Failure policy.
    pub policy: PolicySettings,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, is not valid
    /// TOML, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_raw(toml_loader::load_file(path)?)
    }

    /// Parse and validate configuration from an in-memory TOML document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is not valid TOML or fails
    /// validation.
    pub fn from_toml_str(content: &str, source: &str) -> Result<Self, ConfigError> {
        Self::from_raw(toml_loader::parse(content, source)?)
    }

    /// Non-fatal findings worth logging before a run.
    #[must_use]
    pub fn warnings(&self) -> Vec<ValidationWarning> {
        validation::warnings(self)
    }

    /// Resolve the configuration path from an explicit flag, the environment
    /// or the default location.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(
            || {
                std::env::var_os(CONFIG_ENV_VAR)
                    .filter(|v| !v.is_empty())
                    .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
            },
            Path::to_path_buf,
        )
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let backup = mount_point(raw.backup, "backup")?;
        let data = mount_point(raw.data, "data")?;

        let packages = raw
            .packages
            .ok_or_else(|| ConfigError::MissingKey("packages".to_string()))?;
        let packages = token_list(packages.install, "packages.install")?;

        let runtime = raw
            .runtime
            .ok_or_else(|| ConfigError::MissingKey("runtime".to_string()))?;
        let runtime = RuntimeSettings {
            version: token(require(runtime.version, "runtime.version")?, "runtime.version")?,
            root_path: absolute_path(
                require(runtime.root_path, "runtime.root_path")?,
                "runtime.root_path",
            )?,
            default_modules: token_list(runtime.default_modules, "runtime.default_modules")?,
            extra_module: token(
                require(runtime.extra_module, "runtime.extra_module")?,
                "runtime.extra_module",
            )?,
            extra_module_version: token(
                require(runtime.extra_module_version, "runtime.extra_module_version")?,
                "runtime.extra_module_version",
            )?,
        };

        let fs = raw.filesystem;
        let filesystem = FilesystemSettings {
            fstype: token(fs.fstype, "filesystem.fstype")?,
            owner: token(fs.owner, "filesystem.owner")?,
            group: token(fs.group, "filesystem.group")?,
            mode: octal_mode(fs.mode.trim(), "filesystem.mode")?,
            force: fs.force,
            enable: fs.enable,
            fstab: absolute_path(fs.fstab, "filesystem.fstab")?,
            options: token(fs.options, "filesystem.options")?,
        };

        let c = raw.container;
        let container = ContainerSettings {
            install_script: url(c.install_script, "container.install_script")?,
            script_sha256: c
                .script_sha256
                .map(|s| sha256(s, "container.script_sha256"))
                .transpose()?,
            service: token(c.service, "container.service")?,
            binary: token(c.binary, "container.binary")?,
        };

        let vm = raw.version_manager;
        let version_manager = VersionManagerSettings {
            repository: url(vm.repository, "version_manager.repository")?,
            branch: token(vm.branch, "version_manager.branch")?,
            profile: absolute_path(vm.profile, "version_manager.profile")?,
            init_lines: vm
                .init_lines
                .into_iter()
                .map(|l| non_empty(l, "version_manager.init_lines"))
                .collect::<Result<_, _>>()?,
        };

        let src = raw.source;
        let source = SourceSettings {
            repository: url(src.repository, "source.repository")?,
            directory: absolute_path(src.directory, "source.directory")?,
            branch: token(src.branch, "source.branch")?,
        };

        let k = raw.kernel;
        let kernel = KernelSettings {
            file: absolute_path(k.file, "kernel.file")?,
            header: non_empty(k.header, "kernel.header")?,
            parameters: k
                .parameters
                .into_iter()
                .map(|p| kernel_parameter(p, "kernel.parameters"))
                .collect::<Result<_, _>>()?,
            reload: k.reload,
        };

        let p = raw.policy;
        if p.step_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "policy.step_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let policy = PolicySettings {
            continue_on_error: p.continue_on_error,
            optional_steps: p.optional_steps,
            step_timeout: p.step_timeout_secs.map(Duration::from_secs),
            verify: p.verify,
        };

        let config = Self {
            backup,
            data,
            filesystem,
            packages,
            container,
            version_manager,
            runtime,
            source,
            kernel,
            policy,
        };
        validation::distinct_mounts(&config)?;
        Ok(config)
    }
}

fn mount_point(raw: Option<toml_loader::RawMount>, group: &str) -> Result<MountPoint, ConfigError> {
    let raw = raw.ok_or_else(|| ConfigError::MissingKey(group.to_string()))?;
    let directory_key = format!("{group}.directory");
    let device_key = format!("{group}.device");
    Ok(MountPoint {
        directory: absolute_path(require(raw.directory, &directory_key)?, &directory_key)?,
        device: absolute_path(require(raw.device, &device_key)?, &device_key)?,
    })
}

/// Test fixtures shared by unit tests across the crate.
#[cfg(test)]
pub mod test_helpers {
    use super::Config;

    /// Configuration for a typical two-volume Amazon Linux host.
    pub const SCENARIO_TOML: &str = r#"
[backup]
directory = "/backup"
device = "/dev/sdb"

[data]
directory = "/data"
device = "/dev/sdc"

[runtime]
version = "3.5.1"
root_path = "/root/.pyenv"
default_modules = ["boto", "docopt"]
extra_module = "docker-py"
extra_module_version = "1.9.0"

[packages]
install = ["wget.x86_64", "git.x86_64", "gcc44.x86_64"]
"#;

    /// Parse [`SCENARIO_TOML`].
    ///
    /// # Panics
    ///
    /// Panics if the fixture no longer validates.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn scenario_config() -> Config {
        Config::from_toml_str(SCENARIO_TOML, "scenario").expect("scenario config is valid")
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::test_helpers::{SCENARIO_TOML, scenario_config};
    use super::*;

    #[test]
    fn scenario_loads_with_defaults() {
        let config = scenario_config();
        assert_eq!(config.backup.device, PathBuf::from("/dev/sdb"));
        assert_eq!(config.data.directory, PathBuf::from("/data"));
        assert_eq!(config.filesystem.mode, 0o775);
        assert_eq!(config.filesystem.fstype, "xfs");
        assert!(!config.filesystem.force);
        assert_eq!(config.runtime.default_modules, vec!["boto", "docopt"]);
        assert_eq!(config.kernel.parameters.len(), 5);
        assert_eq!(config.source.branch, "master");
        assert!(config.policy.verify);
        assert!(config.policy.step_timeout.is_none());
    }

    #[test]
    fn missing_group_is_reported_by_name() {
        let doc = SCENARIO_TOML.replace("[backup]\ndirectory = \"/backup\"\ndevice = \"/dev/sdb\"\n", "");
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "backup"));
    }

    #[test]
    fn missing_device_is_reported_by_dotted_key() {
        let doc = SCENARIO_TOML.replace("device = \"/dev/sdc\"\n", "");
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "data.device"));
    }

    #[test]
    fn empty_version_is_rejected() {
        let doc = SCENARIO_TOML.replace("version = \"3.5.1\"", "version = \"\"");
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "runtime.version"));
    }

    #[test]
    fn empty_package_list_is_rejected() {
        let doc = SCENARIO_TOML.replace(
            "install = [\"wget.x86_64\", \"git.x86_64\", \"gcc44.x86_64\"]",
            "install = []",
        );
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "packages.install"));
    }

    #[test]
    fn shared_device_is_rejected() {
        let doc = SCENARIO_TOML.replace("/dev/sdc", "/dev/sdb");
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "data.device"));
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let doc = format!("{SCENARIO_TOML}\n[filesystem]\nmode = \"999\"\n");
        let err = Config::from_toml_str(&doc, "t").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "filesystem.mode"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let doc = format!("{SCENARIO_TOML}\n[policy]\nstep_timeout_secs = 0\n");
        assert!(Config::from_toml_str(&doc, "t").is_err());
    }

    #[test]
    fn policy_timeout_becomes_duration() {
        let doc = format!("{SCENARIO_TOML}\n[policy]\nstep_timeout_secs = 600\noptional_steps = [\"fetch-source\"]\n");
        let config = Config::from_toml_str(&doc, "t").unwrap();
        assert_eq!(config.policy.step_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.policy.optional_steps, vec!["fetch-source"]);
    }

    #[test]
    fn scenario_warns_about_unpinned_script_only() {
        let warnings = scenario_config().warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].key, "container.script_sha256");
    }

    #[test]
    fn duplicate_packages_produce_warning() {
        let doc = SCENARIO_TOML.replace("\"gcc44.x86_64\"]", "\"gcc44.x86_64\", \"git.x86_64\"]");
        let config = Config::from_toml_str(&doc, "t").unwrap();
        assert!(
            config
                .warnings()
                .iter()
                .any(|w| w.key == "packages.install" && w.item == "git.x86_64")
        );
    }

    #[test]
    fn resolve_path_prefers_explicit_flag() {
        let path = Config::resolve_path(Some(Path::new("/tmp/custom.toml")));
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, SCENARIO_TOML).unwrap();
        assert_eq!(Config::load(&path).unwrap(), scenario_config());
    }
}
